//! Durable job + chunk state, plus atomic JSON checkpoints (C2 JobStore).

pub mod database;
pub mod models;
pub mod repository;

pub use database::{DatabaseManager, DatabasePool};
pub use models::*;
pub use repository::{atomic_write_json, ChunkUpdate, JobStatusUpdate, JobStore, NewChunk};