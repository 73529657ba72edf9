// Library interface for testing

// Declare all modules
pub mod audio;
pub mod cache;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod events;
pub mod model;
pub mod queries;
pub mod queue;
pub mod quota;
pub mod schema;
pub mod scoring;
pub mod storage;
pub mod store;
pub mod transcribe;
pub mod transform;
pub mod upload;

// Re-export the expected database version for convenience
pub use constants::EXPECTED_DB_VERSION;
