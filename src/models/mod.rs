pub mod book;
pub mod detection;
pub mod error_code;
pub mod job;
