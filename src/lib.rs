//! Bookshelf photo detection for a community book-lending catalog.
//!
//! A submitted photo becomes a detection job. The worker runs it through a
//! vision model (optionally aided by OCR), enriches each guess against an
//! online book catalog, and stores a ranked, deduplicated list of candidates
//! tagged with what the caller's household already owns. Maintenance sweeps
//! fail stuck jobs and remove expired images.

pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
