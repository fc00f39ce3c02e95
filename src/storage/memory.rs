//! In-process match store
//!
//! Each player row sits behind its own async mutex. A unit of work locks the
//! rows of both participants in ascending id order before reading them and
//! holds the locks until it is committed, rolled back or dropped, so two
//! units touching the same player never interleave and never deadlock.
//! Writes are staged inside the unit and applied in one step on commit.

use super::{
    lock_order, MatchStore, NewMatch, PlayerSnapshot, StagedMatch, StorageResult, UnitOfWork,
};
use crate::error::StorageError;
use crate::rating::INITIAL_RATING;
use crate::types::{MatchId, MatchRecord, Player, PlayerId, PlayerRef, Rating};
use crate::utils::{current_timestamp, normalize_username};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

struct PlayerSlot {
    username: String,
    state: Arc<Mutex<Player>>,
}

#[derive(Default)]
struct Directory {
    slots: BTreeMap<PlayerId, PlayerSlot>,
    by_username: HashMap<String, PlayerId>,
    last_id: i64,
}

#[derive(Debug, Clone)]
struct MatchRow {
    id: MatchId,
    created_at: DateTime<Utc>,
    row: NewMatch,
}

/// Last match id handed out and the creation time stamped with it
#[derive(Default)]
struct MatchClock {
    last_id: i64,
    last_stamp: Option<DateTime<Utc>>,
}

impl MatchClock {
    fn next(&mut self) -> StagedMatch {
        let now = current_timestamp();
        let created_at = self.last_stamp.map_or(now, |last| now.max(last));
        self.last_id += 1;
        self.last_stamp = Some(created_at);
        StagedMatch {
            id: MatchId::new(self.last_id),
            created_at,
        }
    }
}

#[derive(Default)]
struct Inner {
    directory: RwLock<Directory>,
    /// Committed matches, sorted by id
    matches: RwLock<Vec<MatchRow>>,
    match_clock: StdMutex<MatchClock>,
}

impl Inner {
    fn directory(&self) -> StorageResult<RwLockReadGuard<'_, Directory>> {
        self.directory
            .read()
            .map_err(|_| StorageError::LockPoisoned { what: "directory" })
    }

    fn directory_mut(&self) -> StorageResult<RwLockWriteGuard<'_, Directory>> {
        self.directory
            .write()
            .map_err(|_| StorageError::LockPoisoned { what: "directory" })
    }

    fn matches(&self) -> StorageResult<RwLockReadGuard<'_, Vec<MatchRow>>> {
        self.matches
            .read()
            .map_err(|_| StorageError::LockPoisoned { what: "matches" })
    }

    fn matches_mut(&self) -> StorageResult<RwLockWriteGuard<'_, Vec<MatchRow>>> {
        self.matches
            .write()
            .map_err(|_| StorageError::LockPoisoned { what: "matches" })
    }

    fn match_clock(&self) -> StorageResult<MutexGuard<'_, MatchClock>> {
        self.match_clock
            .lock()
            .map_err(|_| StorageError::LockPoisoned { what: "match clock" })
    }

    fn player_states(&self) -> StorageResult<Vec<Arc<Mutex<Player>>>> {
        let directory = self.directory()?;
        Ok(directory
            .slots
            .values()
            .map(|slot| slot.state.clone())
            .collect())
    }

    /// Committed state of every player, highest rating first
    async fn snapshot_players(&self) -> StorageResult<Vec<Player>> {
        let states = self.player_states()?;
        let mut players = Vec::with_capacity(states.len());
        for state in states {
            players.push(state.lock().await.clone());
        }
        players.sort_by(|a, b| b.rating.cmp(&a.rating).then(a.id.cmp(&b.id)));
        Ok(players)
    }

    fn hydrate(&self, rows: Vec<MatchRow>) -> StorageResult<Vec<MatchRecord>> {
        let directory = self.directory()?;
        let player_ref = |id: PlayerId| {
            directory
                .slots
                .get(&id)
                .map(|slot| PlayerRef {
                    id,
                    username: slot.username.clone(),
                })
                .ok_or(StorageError::UnknownPlayer { player_id: id })
        };

        rows.into_iter()
            .map(|MatchRow { id, created_at, row }| {
                Ok(MatchRecord {
                    id,
                    player1: player_ref(row.player1_id)?,
                    player2: player_ref(row.player2_id)?,
                    winner: player_ref(row.winner_id)?,
                    player1_id: row.player1_id,
                    player2_id: row.player2_id,
                    winner_id: row.winner_id,
                    player1_rating_before: row.player1_rating_before,
                    player1_rating_after: row.player1_rating_after,
                    player2_rating_before: row.player2_rating_before,
                    player2_rating_after: row.player2_rating_after,
                    created_at,
                })
            })
            .collect()
    }
}

/// Match store that keeps everything in process memory
#[derive(Clone, Default)]
pub struct InMemoryMatchStore {
    inner: Arc<Inner>,
}

impl InMemoryMatchStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryMatchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMatchStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn begin(&self, participants: [PlayerId; 2]) -> StorageResult<Box<dyn UnitOfWork>> {
        let order = lock_order(participants);
        let states: Vec<Arc<Mutex<Player>>> = {
            let directory = self.inner.directory()?;
            order
                .iter()
                .filter_map(|id| directory.slots.get(id).map(|slot| slot.state.clone()))
                .collect()
        };

        // Ascending id order, so concurrent units cannot deadlock
        let mut locked = Vec::with_capacity(states.len());
        for state in states {
            locked.push(state.lock_owned().await);
        }
        debug!(participants = ?order, "opened in-memory unit of work");

        Ok(Box::new(InMemoryUnitOfWork {
            inner: self.inner.clone(),
            locked,
            staged_players: BTreeMap::new(),
            staged_matches: Vec::new(),
        }))
    }

    async fn create_player(&self, username: &str) -> StorageResult<Player> {
        let username = normalize_username(username).ok_or(StorageError::EmptyUsername)?;
        let mut directory = self.inner.directory_mut()?;

        if directory.by_username.contains_key(&username) {
            return Err(StorageError::DuplicateUsername { username });
        }

        directory.last_id += 1;
        let player = Player {
            id: PlayerId::new(directory.last_id),
            username: username.clone(),
            rating: INITIAL_RATING,
            matches_played: 0,
            wins: 0,
            last_match_at: None,
            created_at: current_timestamp(),
        };

        directory.by_username.insert(username.clone(), player.id);
        directory.slots.insert(
            player.id,
            PlayerSlot {
                username,
                state: Arc::new(Mutex::new(player.clone())),
            },
        );

        Ok(player)
    }

    async fn get_player(&self, player_id: PlayerId) -> StorageResult<Option<Player>> {
        let state = {
            let directory = self.inner.directory()?;
            directory.slots.get(&player_id).map(|slot| slot.state.clone())
        };

        match state {
            Some(state) => Ok(Some(state.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_players(&self) -> StorageResult<Vec<Player>> {
        self.inner.snapshot_players().await
    }

    async fn ranking(&self, limit: usize) -> StorageResult<Vec<Player>> {
        let mut players = self.inner.snapshot_players().await?;
        players.retain(|player| player.matches_played > 0);
        players.truncate(limit);
        Ok(players)
    }

    async fn recent_matches(&self, limit: usize) -> StorageResult<Vec<MatchRecord>> {
        let rows: Vec<MatchRow> = {
            let matches = self.inner.matches()?;
            matches.iter().rev().take(limit).cloned().collect()
        };
        self.inner.hydrate(rows)
    }

    async fn matches_for_player(
        &self,
        player_id: PlayerId,
        limit: usize,
    ) -> StorageResult<Vec<MatchRecord>> {
        let rows: Vec<MatchRow> = {
            let matches = self.inner.matches()?;
            matches
                .iter()
                .rev()
                .filter(|m| m.row.player1_id == player_id || m.row.player2_id == player_id)
                .take(limit)
                .cloned()
                .collect()
        };
        self.inner.hydrate(rows)
    }

    async fn get_match(&self, match_id: MatchId) -> StorageResult<Option<MatchRecord>> {
        let row = {
            let matches = self.inner.matches()?;
            matches
                .binary_search_by_key(&match_id, |m| m.id)
                .ok()
                .map(|index| matches[index].clone())
        };

        match row {
            Some(row) => Ok(self.inner.hydrate(vec![row])?.pop()),
            None => Ok(None),
        }
    }

    async fn player_count(&self) -> StorageResult<usize> {
        Ok(self.inner.directory()?.slots.len())
    }
}

/// Unit of work holding the row locks of its participants
pub struct InMemoryUnitOfWork {
    inner: Arc<Inner>,
    locked: Vec<OwnedMutexGuard<Player>>,
    staged_players: BTreeMap<PlayerId, Player>,
    staged_matches: Vec<MatchRow>,
}

impl InMemoryUnitOfWork {
    fn current(&self, player_id: PlayerId) -> Option<&Player> {
        self.staged_players.get(&player_id).or_else(|| {
            self.locked
                .iter()
                .find(|guard| guard.id == player_id)
                .map(|guard| &**guard)
        })
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn get_player(&mut self, player_id: PlayerId) -> StorageResult<Option<PlayerSnapshot>> {
        Ok(self.current(player_id).map(|player| PlayerSnapshot {
            id: player.id,
            username: player.username.clone(),
            rating: player.rating,
        }))
    }

    async fn insert_match(&mut self, new_match: &NewMatch) -> StorageResult<StagedMatch> {
        let staged = self.inner.match_clock()?.next();
        self.staged_matches.push(MatchRow {
            id: staged.id,
            created_at: staged.created_at,
            row: new_match.clone(),
        });
        Ok(staged)
    }

    async fn update_player_after_match(
        &mut self,
        player_id: PlayerId,
        new_rating: Rating,
        is_winner: bool,
        played_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut player = self
            .current(player_id)
            .cloned()
            .ok_or(StorageError::UnknownPlayer { player_id })?;

        player.rating = new_rating;
        player.matches_played += 1;
        if is_winner {
            player.wins += 1;
        }
        player.last_match_at = Some(played_at);

        self.staged_players.insert(player_id, player);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let InMemoryUnitOfWork {
            inner,
            mut locked,
            mut staged_players,
            staged_matches,
        } = *self;

        // The only fallible step comes before any visible change
        let mut matches = inner.matches_mut()?;
        for row in staged_matches {
            let position = matches.partition_point(|m| m.id < row.id);
            matches.insert(position, row);
        }
        drop(matches);

        for guard in locked.iter_mut() {
            if let Some(player) = staged_players.remove(&guard.id) {
                **guard = player;
            }
        }

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
