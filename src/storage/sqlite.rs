//! SQLite match store
//!
//! Units of work map onto SQLite transactions. SQLite allows a single writer
//! per database, so units of work are additionally serialized by an
//! in-process write gate taken before the transaction begins; this keeps the
//! read-then-write sequence of a unit from failing with `SQLITE_BUSY` when
//! another unit commits in between.

use super::{MatchStore, NewMatch, PlayerSnapshot, StagedMatch, StorageResult, UnitOfWork};
use crate::error::StorageError;
use crate::rating::INITIAL_RATING;
use crate::types::{MatchId, MatchRecord, Player, PlayerId, PlayerRef, Rating};
use crate::utils::{current_timestamp, normalize_username};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    migrate, query, query_as,
    sqlite::{Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Transaction,
};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const PLAYER_COLUMNS: &str =
    "id, username, rating, matches_played, wins, created_at, last_match_at";

const MATCH_SELECT: &str = "SELECT m.id, m.player1_id, m.player2_id, m.winner_id, \
     m.player1_rating_before, m.player1_rating_after, \
     m.player2_rating_before, m.player2_rating_after, m.created_at, \
     p1.username AS player1_username, p2.username AS player2_username, \
     w.username AS winner_username \
     FROM matches m \
     JOIN players p1 ON p1.id = m.player1_id \
     JOIN players p2 ON p2.id = m.player2_id \
     JOIN players w ON w.id = m.winner_id";

#[derive(Debug, sqlx::FromRow)]
struct PlayerRow {
    id: i64,
    username: String,
    rating: i64,
    matches_played: u32,
    wins: u32,
    created_at: DateTime<Utc>,
    last_match_at: Option<DateTime<Utc>>,
}

impl From<PlayerRow> for Player {
    fn from(row: PlayerRow) -> Self {
        Player {
            id: PlayerId::new(row.id),
            username: row.username,
            rating: row.rating,
            matches_played: row.matches_played,
            wins: row.wins,
            last_match_at: row.last_match_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MatchRow {
    id: i64,
    player1_id: i64,
    player2_id: i64,
    winner_id: i64,
    player1_rating_before: i64,
    player1_rating_after: i64,
    player2_rating_before: i64,
    player2_rating_after: i64,
    created_at: DateTime<Utc>,
    player1_username: String,
    player2_username: String,
    winner_username: String,
}

impl From<MatchRow> for MatchRecord {
    fn from(row: MatchRow) -> Self {
        let player1_id = PlayerId::new(row.player1_id);
        let player2_id = PlayerId::new(row.player2_id);
        let winner_id = PlayerId::new(row.winner_id);

        MatchRecord {
            id: MatchId::new(row.id),
            player1_id,
            player2_id,
            winner_id,
            player1_rating_before: row.player1_rating_before,
            player1_rating_after: row.player1_rating_after,
            player2_rating_before: row.player2_rating_before,
            player2_rating_after: row.player2_rating_after,
            created_at: row.created_at,
            player1: PlayerRef {
                id: player1_id,
                username: row.player1_username,
            },
            player2: PlayerRef {
                id: player2_id,
                username: row.player2_username,
            },
            winner: PlayerRef {
                id: winner_id,
                username: row.winner_username,
            },
        }
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Match store backed by a SQLite database
#[derive(Debug, Clone)]
pub struct SqliteMatchStore {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl SqliteMatchStore {
    /// Open the database named by a `sqlite:` URL, creating it if missing
    pub async fn open(url: &str, max_connections: u32) -> StorageResult<Self> {
        if is_memory_url(url) {
            return Self::memory().await;
        }

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!("Opened SQLite database at {}", url);
        Self::new(pool).await
    }

    /// Open a database file, creating it if missing
    pub async fn open_path(path: &Path, max_connections: u32) -> StorageResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        info!("Opened SQLite database at {}", path.display());
        Self::new(pool).await
    }

    /// Fresh private in-memory database
    ///
    /// Every connection to `:memory:` sees its own database, so the pool is
    /// pinned to a single connection that is never recycled.
    pub async fn memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::default().foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        debug!("Opened in-memory SQLite database");
        Self::new(pool).await
    }

    async fn new(pool: SqlitePool) -> StorageResult<Self> {
        migrate!("db/migrations").run(&pool).await?;
        Ok(Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        })
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MatchStore for SqliteMatchStore {
    async fn begin(&self, participants: [PlayerId; 2]) -> StorageResult<Box<dyn UnitOfWork>> {
        // All writers share one gate, whichever players they touch
        let gate = self.write_gate.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        debug!(participants = ?participants, "opened SQLite unit of work");

        Ok(Box::new(SqliteUnitOfWork { tx, _gate: gate }))
    }

    async fn create_player(&self, username: &str) -> StorageResult<Player> {
        let username = normalize_username(username).ok_or(StorageError::EmptyUsername)?;
        let _gate = self.write_gate.lock().await;

        let sql = format!(
            "INSERT INTO players (username, rating, matches_played, wins, created_at) \
             VALUES (?, ?, 0, 0, ?) RETURNING {PLAYER_COLUMNS}"
        );
        let inserted = query_as::<_, PlayerRow>(&sql)
            .bind(&username)
            .bind(INITIAL_RATING)
            .bind(current_timestamp())
            .fetch_one(&self.pool)
            .await;

        match inserted {
            Ok(row) => Ok(row.into()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateUsername { username })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_player(&self, player_id: PlayerId) -> StorageResult<Option<Player>> {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = ?");
        let row = query_as::<_, PlayerRow>(&sql)
            .bind(player_id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Player::from))
    }

    async fn list_players(&self) -> StorageResult<Vec<Player>> {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players ORDER BY rating DESC, id ASC");
        let rows = query_as::<_, PlayerRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Player::from).collect())
    }

    async fn ranking(&self, limit: usize) -> StorageResult<Vec<Player>> {
        let sql = format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE matches_played > 0 \
             ORDER BY rating DESC, id ASC LIMIT ?"
        );
        let rows = query_as::<_, PlayerRow>(&sql)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Player::from).collect())
    }

    async fn recent_matches(&self, limit: usize) -> StorageResult<Vec<MatchRecord>> {
        let sql = format!("{MATCH_SELECT} ORDER BY m.id DESC LIMIT ?");
        let rows = query_as::<_, MatchRow>(&sql)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(MatchRecord::from).collect())
    }

    async fn matches_for_player(
        &self,
        player_id: PlayerId,
        limit: usize,
    ) -> StorageResult<Vec<MatchRecord>> {
        let sql = format!(
            "{MATCH_SELECT} WHERE m.player1_id = ?1 OR m.player2_id = ?1 \
             ORDER BY m.id DESC LIMIT ?2"
        );
        let rows = query_as::<_, MatchRow>(&sql)
            .bind(player_id.get())
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(MatchRecord::from).collect())
    }

    async fn get_match(&self, match_id: MatchId) -> StorageResult<Option<MatchRecord>> {
        let sql = format!("{MATCH_SELECT} WHERE m.id = ?");
        let row = query_as::<_, MatchRow>(&sql)
            .bind(match_id.get())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(MatchRecord::from))
    }

    async fn player_count(&self) -> StorageResult<usize> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM players")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

/// Unit of work wrapping one SQLite transaction
///
/// Field order matters: the transaction is dropped (and so rolled back)
/// before the write gate is released.
pub struct SqliteUnitOfWork {
    tx: Transaction<'static, Sqlite>,
    _gate: OwnedMutexGuard<()>,
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    async fn get_player(&mut self, player_id: PlayerId) -> StorageResult<Option<PlayerSnapshot>> {
        let row: Option<(i64, String, i64)> =
            query_as("SELECT id, username, rating FROM players WHERE id = ?")
                .bind(player_id.get())
                .fetch_optional(&mut *self.tx)
                .await?;

        Ok(row.map(|(id, username, rating)| PlayerSnapshot {
            id: PlayerId::new(id),
            username,
            rating,
        }))
    }

    async fn insert_match(&mut self, new_match: &NewMatch) -> StorageResult<StagedMatch> {
        // Writers hold the gate, so stamps taken here follow id order
        let created_at = current_timestamp();
        let (id,): (i64,) = query_as(
            "INSERT INTO matches (player1_id, player2_id, winner_id, \
             player1_rating_before, player1_rating_after, \
             player2_rating_before, player2_rating_after, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(new_match.player1_id.get())
        .bind(new_match.player2_id.get())
        .bind(new_match.winner_id.get())
        .bind(new_match.player1_rating_before)
        .bind(new_match.player1_rating_after)
        .bind(new_match.player2_rating_before)
        .bind(new_match.player2_rating_after)
        .bind(created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(StagedMatch {
            id: MatchId::new(id),
            created_at,
        })
    }

    async fn update_player_after_match(
        &mut self,
        player_id: PlayerId,
        new_rating: Rating,
        is_winner: bool,
        played_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let result = query(
            "UPDATE players SET rating = ?, matches_played = matches_played + 1, \
             wins = wins + ?, last_match_at = ? WHERE id = ?",
        )
        .bind(new_rating)
        .bind(i64::from(is_winner))
        .bind(played_at)
        .bind(player_id.get())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StorageError::UnknownPlayer { player_id });
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let SqliteUnitOfWork { tx, _gate } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        let SqliteUnitOfWork { tx, _gate } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_match(p1: PlayerId, p2: PlayerId) -> NewMatch {
        NewMatch {
            player1_id: p1,
            player2_id: p2,
            winner_id: p2,
            player1_rating_before: 1500,
            player1_rating_after: 1484,
            player2_rating_before: 1500,
            player2_rating_after: 1516,
        }
    }

    async fn record_sample(store: &SqliteMatchStore, p1: PlayerId, p2: PlayerId) -> MatchId {
        let now = current_timestamp();
        let mut unit = store.begin([p1, p2]).await.unwrap();
        let id = unit.insert_match(&sample_match(p1, p2)).await.unwrap().id;
        unit.update_player_after_match(p1, 1484, false, now)
            .await
            .unwrap();
        unit.update_player_after_match(p2, 1516, true, now)
            .await
            .unwrap();
        unit.commit().await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_create_and_get_player() {
        let store = SqliteMatchStore::memory().await.unwrap();
        let alice = store.create_player(" alice ").await.unwrap();

        assert_eq!(alice.username, "alice");
        assert_eq!(alice.rating, 1500);
        assert_eq!(alice.matches_played, 0);
        assert!(alice.last_match_at.is_none());

        let fetched = store.get_player(alice.id).await.unwrap().unwrap();
        assert_eq!(fetched, alice);
        assert!(store.get_player(PlayerId::new(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_is_rejected() {
        let store = SqliteMatchStore::memory().await.unwrap();
        store.create_player("alice").await.unwrap();

        let err = store.create_player("alice").await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateUsername { ref username } if username == "alice"));
        assert!(matches!(
            store.create_player("").await,
            Err(StorageError::EmptyUsername)
        ));
        assert_eq!(store.player_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_committed_unit_is_visible() {
        let store = SqliteMatchStore::memory().await.unwrap();
        let alice = store.create_player("alice").await.unwrap().id;
        let bob = store.create_player("bob").await.unwrap().id;

        let match_id = record_sample(&store, alice, bob).await;

        let bob_now = store.get_player(bob).await.unwrap().unwrap();
        assert_eq!(bob_now.rating, 1516);
        assert_eq!(bob_now.matches_played, 1);
        assert_eq!(bob_now.wins, 1);
        assert!(bob_now.last_match_at.is_some());

        let record = store.get_match(match_id).await.unwrap().unwrap();
        assert_eq!(record.player1.username, "alice");
        assert_eq!(record.winner.username, "bob");
        assert_eq!(record.player2_rating_after, 1516);
    }

    #[tokio::test]
    async fn test_rolled_back_and_dropped_units_leave_no_trace() {
        let store = SqliteMatchStore::memory().await.unwrap();
        let alice = store.create_player("alice").await.unwrap().id;
        let bob = store.create_player("bob").await.unwrap().id;
        let now = current_timestamp();

        let mut unit = store.begin([alice, bob]).await.unwrap();
        unit.insert_match(&sample_match(alice, bob)).await.unwrap();
        unit.update_player_after_match(alice, 1484, false, now)
            .await
            .unwrap();
        unit.rollback().await.unwrap();

        {
            let mut unit = store.begin([alice, bob]).await.unwrap();
            unit.insert_match(&sample_match(alice, bob)).await.unwrap();
        }

        assert!(store.recent_matches(50).await.unwrap().is_empty());
        let alice_now = store.get_player(alice).await.unwrap().unwrap();
        assert_eq!(alice_now.rating, 1500);
        assert_eq!(alice_now.matches_played, 0);
    }

    #[tokio::test]
    async fn test_update_missing_player_fails() {
        let store = SqliteMatchStore::memory().await.unwrap();
        let mut unit = store
            .begin([PlayerId::new(1), PlayerId::new(2)])
            .await
            .unwrap();

        assert!(unit.get_player(PlayerId::new(1)).await.unwrap().is_none());
        let err = unit
            .update_player_after_match(PlayerId::new(1), 1516, true, current_timestamp())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownPlayer { .. }));
    }

    #[tokio::test]
    async fn test_history_queries() {
        let store = SqliteMatchStore::memory().await.unwrap();
        let alice = store.create_player("alice").await.unwrap().id;
        let bob = store.create_player("bob").await.unwrap().id;
        let carol = store.create_player("carol").await.unwrap().id;

        let first = record_sample(&store, alice, bob).await;
        let second = record_sample(&store, carol, bob).await;

        let recent: Vec<_> = store
            .recent_matches(50)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(recent, vec![second, first]);
        assert_eq!(store.recent_matches(1).await.unwrap().len(), 1);

        assert_eq!(store.matches_for_player(bob, 10).await.unwrap().len(), 2);
        assert_eq!(store.matches_for_player(alice, 10).await.unwrap().len(), 1);

        let ranking = store.ranking(100).await.unwrap();
        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking[0].id, bob);
        assert_eq!(store.list_players().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ladder.db");

        let (alice, bob) = {
            let store = SqliteMatchStore::open_path(&path, 4).await.unwrap();
            let alice = store.create_player("alice").await.unwrap().id;
            let bob = store.create_player("bob").await.unwrap().id;
            record_sample(&store, alice, bob).await;
            store.close().await;
            (alice, bob)
        };

        let url = format!("sqlite://{}", path.display());
        let store = SqliteMatchStore::open(&url, 4).await.unwrap();
        assert_eq!(store.player_count().await.unwrap(), 2);
        assert_eq!(store.get_player(bob).await.unwrap().unwrap().rating, 1516);
        assert_eq!(store.matches_for_player(alice, 10).await.unwrap().len(), 1);
    }

    #[test]
    fn test_memory_url_detection() {
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://ladder?mode=memory"));
        assert!(!is_memory_url("sqlite://data/ladder.db"));
    }
}
