//! Sum-type result of one chunk attempt (§4.5 Design Notes), so the driver's
//! per-chunk loop body is a single exhaustive `match` instead of nested
//! exception handling.

use crate::storage::models::Segment;

pub enum ChunkOutcome {
    Done {
        engine: &'static str,
        segments: Vec<Segment>,
        avg_confidence: Option<f64>,
    },
    Paused {
        reason: String,
    },
    Failed {
        remote_error: String,
        fallback_error: Option<String>,
    },
}
