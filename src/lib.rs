//! Resumable, crash-safe interview transcription worker.
//!
//! `transkriptor` is a CLI, not a library consumed by other crates; this root
//! only wires together the modules the binary in `main.rs` dispatches through.

pub mod chunker;
pub mod cli;
pub mod config;
pub mod driver;
pub mod editor;
pub mod engines;
pub mod error;
pub mod events;
pub mod export;
pub mod paths;
pub mod postprocess;
pub mod storage;
