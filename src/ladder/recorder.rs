//! Match transaction coordinator
//!
//! Turns a match report into one committed unit of work: a match row with
//! before/after rating snapshots plus the post-match update of both players.
//! Participants are read inside the unit, so the ratings the calculation is
//! based on cannot change before the unit commits.

use crate::error::{MatchSide, RecordMatchError, ValidationError};
use crate::metrics::MetricsCollector;
use crate::rating::compute_new_ratings;
use crate::storage::{MatchStore, NewMatch, StagedMatch, UnitOfWork};
use crate::types::{MatchRecord, MatchReport, PlayerId, PlayerRef};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A match report whose ids are present and mutually consistent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedReport {
    pub player1_id: PlayerId,
    pub player2_id: PlayerId,
    pub winner_id: PlayerId,
}

impl ValidatedReport {
    pub fn player1_won(&self) -> bool {
        self.winner_id == self.player1_id
    }
}

/// Check a report without touching any store
///
/// Ids that are absent or zero count as missing. Any other id is left to
/// the lookup inside the unit of work.
pub fn validate_report(report: &MatchReport) -> Result<ValidatedReport, ValidationError> {
    let present = |id: Option<PlayerId>| id.filter(|id| id.get() != 0);

    let (Some(player1_id), Some(player2_id), Some(winner_id)) = (
        present(report.player1_id),
        present(report.player2_id),
        present(report.winner_id),
    ) else {
        return Err(ValidationError::MissingParameters);
    };

    if player1_id == player2_id {
        return Err(ValidationError::SelfMatch);
    }

    if winner_id != player1_id && winner_id != player2_id {
        return Err(ValidationError::WinnerNotParticipant);
    }

    Ok(ValidatedReport {
        player1_id,
        player2_id,
        winner_id,
    })
}

/// Records match outcomes against a [`MatchStore`]
#[derive(Clone)]
pub struct MatchRecorder {
    store: Arc<dyn MatchStore>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MatchRecorder {
    pub fn new(store: Arc<dyn MatchStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(store: Arc<dyn MatchStore>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            store,
            metrics: Some(metrics),
        }
    }

    /// The store this recorder writes to
    pub fn store(&self) -> Arc<dyn MatchStore> {
        self.store.clone()
    }

    /// Validate, rate and durably record one match
    ///
    /// On success the match and both player updates are committed together.
    /// On any error nothing has been written. Calling again after a success
    /// records a second match.
    pub async fn record_match(&self, report: &MatchReport) -> Result<MatchRecord, RecordMatchError> {
        let start = Instant::now();
        let result = self.try_record(report).await;

        match &result {
            Ok(record) => {
                info!(
                    match_id = %record.id,
                    player1 = %record.player1_id,
                    player2 = %record.player2_id,
                    winner = %record.winner_id,
                    "Recorded match: {} {} -> {}, {} {} -> {}",
                    record.player1.username,
                    record.player1_rating_before,
                    record.player1_rating_after,
                    record.player2.username,
                    record.player2_rating_before,
                    record.player2_rating_after,
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_match_recorded(record, start.elapsed());
                }
            }
            Err(e) => {
                warn!(kind = e.kind(), report = ?report, "Match not recorded: {}", e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_match_failure(e.kind(), start.elapsed());
                }
            }
        }

        result
    }

    async fn try_record(&self, report: &MatchReport) -> Result<MatchRecord, RecordMatchError> {
        let report = validate_report(report)?;

        let mut unit = self
            .store
            .begin([report.player1_id, report.player2_id])
            .await?;

        match stage(unit.as_mut(), &report).await {
            Ok(record) => {
                unit.commit().await?;
                Ok(record)
            }
            Err(e) => {
                if let Err(rollback_err) = unit.rollback().await {
                    // The unit is discarded either way; the original error wins
                    warn!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for MatchRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchRecorder")
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

/// Stage every write of one match and build the record it will commit as
async fn stage(
    unit: &mut dyn UnitOfWork,
    report: &ValidatedReport,
) -> Result<MatchRecord, RecordMatchError> {
    let player1 = unit
        .get_player(report.player1_id)
        .await?
        .ok_or(RecordMatchError::PlayerNotFound {
            side: MatchSide::Player1,
            player_id: report.player1_id,
        })?;
    let player2 = unit
        .get_player(report.player2_id)
        .await?
        .ok_or(RecordMatchError::PlayerNotFound {
            side: MatchSide::Player2,
            player_id: report.player2_id,
        })?;

    let player1_won = report.player1_won();
    let (player1_rating_after, player2_rating_after) =
        compute_new_ratings(player1.rating, player2.rating, player1_won);
    let new_match = NewMatch {
        player1_id: player1.id,
        player2_id: player2.id,
        winner_id: report.winner_id,
        player1_rating_before: player1.rating,
        player1_rating_after,
        player2_rating_before: player2.rating,
        player2_rating_after,
    };

    let StagedMatch {
        id: match_id,
        created_at: played_at,
    } = unit.insert_match(&new_match).await?;
    debug!(match_id = %match_id, "staged match row");

    unit.update_player_after_match(player1.id, player1_rating_after, player1_won, played_at)
        .await?;
    unit.update_player_after_match(player2.id, player2_rating_after, !player1_won, played_at)
        .await?;

    let player1 = PlayerRef {
        id: player1.id,
        username: player1.username,
    };
    let player2 = PlayerRef {
        id: player2.id,
        username: player2.username,
    };
    let winner = if player1_won {
        player1.clone()
    } else {
        player2.clone()
    };

    Ok(MatchRecord {
        id: match_id,
        player1_id: new_match.player1_id,
        player2_id: new_match.player2_id,
        winner_id: new_match.winner_id,
        player1_rating_before: new_match.player1_rating_before,
        player1_rating_after,
        player2_rating_before: new_match.player2_rating_before,
        player2_rating_after,
        created_at: played_at,
        player1,
        player2,
        winner,
    })
}
