//! Match recording
//!
//! The only component that mutates players and matches.

pub mod recorder;

pub use recorder::{validate_report, MatchRecorder, ValidatedReport};
