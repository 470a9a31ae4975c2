//! Transcription engines: remote diarize+ASR (C3) and local fallback (C4).

pub mod fallback;
pub mod remote;
pub mod types;

pub use fallback::{FallbackEngine, LocalDiarizer};
pub use remote::{transcribe_chunk_remote, HttpRemoteClient, RemoteTranscriber};
