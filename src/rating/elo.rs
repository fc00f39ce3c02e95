//! Fixed pairwise Elo rating update
//!
//! Each side's new rating is rounded independently, so the two deltas of a
//! match are not forced to cancel out. Ratings are never clamped.

use crate::types::Rating;

/// Sensitivity of a single result
pub const K_FACTOR: f64 = 32.0;

/// Rating assigned to newly registered players
pub const INITIAL_RATING: Rating = 1500;

/// Rating difference at which the favourite is expected to score 10:1
const RATING_SCALE: f64 = 400.0;

/// Probability-like score `rating` is expected to take against `opponent`
pub fn expected_score(rating: Rating, opponent: Rating) -> f64 {
    let difference = opponent as f64 - rating as f64;
    1.0 / (1.0 + 10f64.powf(difference / RATING_SCALE))
}

/// Unrounded rating change for `rating` after a result against `opponent`
pub fn rating_delta(rating: Rating, opponent: Rating, won: bool) -> f64 {
    let actual = if won { 1.0 } else { 0.0 };
    K_FACTOR * (actual - expected_score(rating, opponent))
}

/// New ratings for both sides of a decided match
///
/// `round` is half-away-from-zero (`f64::round`), applied per side.
pub fn compute_new_ratings(
    rating_a: Rating,
    rating_b: Rating,
    a_is_winner: bool,
) -> (Rating, Rating) {
    let new_a = apply_delta(rating_a, rating_delta(rating_a, rating_b, a_is_winner));
    let new_b = apply_delta(rating_b, rating_delta(rating_b, rating_a, !a_is_winner));
    (new_a, new_b)
}

fn apply_delta(rating: Rating, delta: f64) -> Rating {
    (rating as f64 + delta).round() as Rating
}
