pub mod detector;
pub mod enricher;
pub mod merger;
pub mod ocr;
pub mod orchestrator;
pub mod queue;
pub mod reaper;
pub mod retention;
pub mod schedule;
pub mod storage;
pub mod vision;
