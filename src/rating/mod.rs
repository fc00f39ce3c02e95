//! Rating engine
//!
//! A single fixed pairwise Elo rule (K = 32). The calculator is a pure
//! function over integer ratings with no failure modes.

pub mod elo;

// Re-export commonly used items
pub use elo::{compute_new_ratings, expected_score, rating_delta, INITIAL_RATING, K_FACTOR};
