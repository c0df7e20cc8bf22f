//! Accounts, player records and the leaderboard.
//!
//! The game only talks to [`Store`]. [`JsonStore`] keeps everything in memory
//! and, when given a path, mirrors it to a JSON file after every change.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unsupported store version {0}")]
    UnsupportedVersion(u8),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    /// Always lower case
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub color: u32,
    pub best_score: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub name: String,
    pub best_score: i64,
}

/// Query contract the connection states rely on.
pub trait Store: Send + Sync {
    fn get_user_by_username(&self, username: &str) -> Result<User, StoreError>;
    fn create_user(&self, username: &str, password_hash: &str) -> Result<User, StoreError>;
    fn get_player_by_user_id(&self, user_id: i64) -> Result<PlayerRecord, StoreError>;
    fn create_player(&self, user_id: i64, name: &str, color: u32)
        -> Result<PlayerRecord, StoreError>;
    /// Case-insensitive lookup by display name
    fn get_player_by_name(&self, name: &str) -> Result<PlayerRecord, StoreError>;
    /// 1-based position on the leaderboard
    fn get_player_rank(&self, player_id: i64) -> Result<u64, StoreError>;
    fn get_top_scores(&self, limit: u64, offset: u64) -> Result<Vec<ScoreRow>, StoreError>;
    fn update_player_best_score(&self, player_id: i64, best_score: i64)
        -> Result<(), StoreError>;
}

const STORE_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreData {
    version: u8,
    next_user_id: i64,
    next_player_id: i64,
    users: Vec<User>,
    players: Vec<PlayerRecord>,
}

impl Default for StoreData {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            next_user_id: 1,
            next_player_id: 1,
            users: Vec::new(),
            players: Vec::new(),
        }
    }
}

impl StoreData {
    /// Leaderboard order: best score descending, then oldest player first.
    fn ranked(&self) -> Vec<&PlayerRecord> {
        let mut ranked: Vec<&PlayerRecord> = self.players.iter().collect();
        ranked.sort_by(|a, b| b.best_score.cmp(&a.best_score).then(a.id.cmp(&b.id)));
        ranked
    }
}

pub struct JsonStore {
    file_path: Option<PathBuf>,
    data: Mutex<StoreData>,
}

impl JsonStore {
    /// Store that never touches the disk.
    pub fn in_memory() -> Self {
        Self {
            file_path: None,
            data: Mutex::new(StoreData::default()),
        }
    }

    /// Load `file_path` if it exists, otherwise start empty. The file is
    /// created on the first write.
    pub fn open(file_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file_path = file_path.into();
        let data = match fs::read_to_string(&file_path) {
            Ok(text) => {
                let data: StoreData = serde_json::from_str(&text)?;
                if data.version != STORE_VERSION {
                    return Err(StoreError::UnsupportedVersion(data.version));
                }
                data
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            "Opened store at {} ({} users)",
            file_path.display(),
            data.users.len()
        );
        Ok(Self {
            file_path: Some(file_path),
            data: Mutex::new(data),
        })
    }

    /// Apply `change` to a copy, persist the copy, then publish it. A failed
    /// write leaves the live data untouched.
    fn mutate<R>(
        &self,
        change: impl FnOnce(&mut StoreData) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        let result = change(&mut next)?;
        if let Some(path) = &self.file_path {
            save(path, &next)?;
        }
        *data = next;
        Ok(result)
    }
}

fn save(path: &Path, data: &StoreData) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let text = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl Store for JsonStore {
    fn get_user_by_username(&self, username: &str) -> Result<User, StoreError> {
        self.data
            .lock()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn create_user(&self, username: &str, password_hash: &str) -> Result<User, StoreError> {
        self.mutate(|data| {
            if data.users.iter().any(|u| u.username == username) {
                return Err(StoreError::AlreadyExists);
            }
            let user = User {
                id: data.next_user_id,
                username: username.to_string(),
                password_hash: password_hash.to_string(),
            };
            data.next_user_id += 1;
            data.users.push(user.clone());
            Ok(user)
        })
    }

    fn get_player_by_user_id(&self, user_id: i64) -> Result<PlayerRecord, StoreError> {
        self.data
            .lock()
            .players
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn create_player(
        &self,
        user_id: i64,
        name: &str,
        color: u32,
    ) -> Result<PlayerRecord, StoreError> {
        self.mutate(|data| {
            if data.players.iter().any(|p| p.user_id == user_id) {
                return Err(StoreError::AlreadyExists);
            }
            let player = PlayerRecord {
                id: data.next_player_id,
                user_id,
                name: name.to_string(),
                color,
                best_score: 0,
            };
            data.next_player_id += 1;
            data.players.push(player.clone());
            Ok(player)
        })
    }

    fn get_player_by_name(&self, name: &str) -> Result<PlayerRecord, StoreError> {
        let name = name.to_lowercase();
        self.data
            .lock()
            .players
            .iter()
            .find(|p| p.name.to_lowercase() == name)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn get_player_rank(&self, player_id: i64) -> Result<u64, StoreError> {
        let data = self.data.lock();
        data.ranked()
            .iter()
            .position(|p| p.id == player_id)
            .map(|i| i as u64 + 1)
            .ok_or(StoreError::NotFound)
    }

    fn get_top_scores(&self, limit: u64, offset: u64) -> Result<Vec<ScoreRow>, StoreError> {
        let data = self.data.lock();
        Ok(data
            .ranked()
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|p| ScoreRow {
                name: p.name.clone(),
                best_score: p.best_score,
            })
            .collect())
    }

    fn update_player_best_score(
        &self,
        player_id: i64,
        best_score: i64,
    ) -> Result<(), StoreError> {
        self.mutate(|data| {
            let player = data
                .players
                .iter_mut()
                .find(|p| p.id == player_id)
                .ok_or(StoreError::NotFound)?;
            player.best_score = best_score;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn temp_store_path() -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        std::env::temp_dir().join(format!(
            "spore-store-{}-{}/db.json",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    fn seeded(scores: &[(&str, i64)]) -> JsonStore {
        let store = JsonStore::in_memory();
        for (name, score) in scores {
            let user = store.create_user(&name.to_lowercase(), "hash").unwrap();
            let player = store.create_player(user.id, name, 0).unwrap();
            store.update_player_best_score(player.id, *score).unwrap();
        }
        store
    }

    #[test]
    fn create_and_fetch_user_and_player() {
        let store = JsonStore::in_memory();
        let user = store.create_user("alice", "$2b$hash").unwrap();
        assert_eq!(store.get_user_by_username("alice").unwrap(), user);

        let player = store.create_player(user.id, "Alice", 0xff0000).unwrap();
        assert_eq!(store.get_player_by_user_id(user.id).unwrap(), player);
        assert_eq!(player.best_score, 0);
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let store = JsonStore::in_memory();
        store.create_user("bob", "h").unwrap();
        assert!(matches!(
            store.create_user("bob", "h2"),
            Err(StoreError::AlreadyExists)
        ));
    }

    #[test]
    fn unknown_lookups_are_not_found() {
        let store = JsonStore::in_memory();
        assert!(matches!(
            store.get_user_by_username("ghost"),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.get_player_by_name("ghost"),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(store.get_player_rank(99), Err(StoreError::NotFound)));
    }

    #[test]
    fn name_lookup_ignores_case() {
        let store = seeded(&[("Carol", 10)]);
        assert_eq!(store.get_player_by_name("cAROL").unwrap().name, "Carol");
    }

    #[test]
    fn name_lookup_folds_non_ascii_case() {
        let store = seeded(&[("Øle", 10), ("ÉMILE", 20)]);
        assert_eq!(store.get_player_by_name("øle").unwrap().name, "Øle");
        assert_eq!(store.get_player_by_name("ØLE").unwrap().name, "Øle");
        assert_eq!(store.get_player_by_name("émile").unwrap().name, "ÉMILE");
    }

    #[test]
    fn leaderboard_orders_by_score_then_age() {
        let store = seeded(&[("a", 50), ("b", 70), ("c", 50), ("d", 10)]);
        let top = store.get_top_scores(10, 0).unwrap();
        let names: Vec<&str> = top.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "c", "d"]);

        let page = store.get_top_scores(2, 1).unwrap();
        assert_eq!(page[0].name, "a");
        assert_eq!(page[1].name, "c");

        let c = store.get_player_by_name("c").unwrap();
        assert_eq!(store.get_player_rank(c.id).unwrap(), 3);
    }

    #[test]
    fn data_survives_reopen() {
        let path = temp_store_path();
        {
            let store = JsonStore::open(&path).unwrap();
            let user = store.create_user("dave", "hash").unwrap();
            let player = store.create_player(user.id, "Dave", 7).unwrap();
            store.update_player_best_score(player.id, 321).unwrap();
        }

        let reopened = JsonStore::open(&path).unwrap();
        let user = reopened.get_user_by_username("dave").unwrap();
        let player = reopened.get_player_by_user_id(user.id).unwrap();
        assert_eq!(player.best_score, 321);

        // Ids keep counting from where they stopped
        let next = reopened.create_user("erin", "hash").unwrap();
        assert!(next.id > user.id);

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
