//! # Collaborators
//!
//! Interfaces to the parts of the server that live outside the sync core:
//! persistence of actors and accounts, and gameplay content reacting to area
//! and ability events. The world calls gameplay hooks only from a region
//! scheduler, never from a network reader.

use async_trait::async_trait;
use parking_lot::Mutex;
use realmd_core::Position;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::actor::Actor;
use crate::area::Area;
use crate::error::{Result, WorldError};

/// Persistent form of a player actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub character_id: u32,
    pub account: String,
    pub name: String,
    pub position: Position,
    pub bind: Position,
    pub health: u32,
    pub max_health: u32,
    pub endurance: u32,
    pub max_endurance: u32,
    pub mana_percent: u8,
    pub max_speed: u32,
    #[serde(default)]
    pub safe_fall_level: i32,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub roleplay: bool,
    #[serde(default)]
    pub can_fly: bool,
    #[serde(default)]
    pub detects_stealth: bool,
}

/// Result of checking account credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credentials accepted; the account plays this character
    Granted { character_id: u32 },
    WrongPassword,
    UnknownAccount,
}

/// Storage of accounts and actors
///
/// # Thread Safety
/// Shared across every session task; implementations synchronize
/// internally.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn authenticate(&self, account: &str, password: &str) -> Result<AuthOutcome>;

    async fn load_actor(&self, character_id: u32) -> Result<ActorRecord>;

    async fn save_actor(&self, record: &ActorRecord) -> Result<()>;
}

/// A decoded "use ability" request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbilityCommand {
    pub ability: u16,
    pub target: Option<realmd_core::ActorId>,
}

/// Gameplay content reacting to world events
///
/// Every method has a no-op default so content can implement only what it
/// cares about.
pub trait GameplayHooks: Send + Sync {
    fn on_area_enter(&self, _actor: &Actor, _area: &Area) {}

    fn on_area_leave(&self, _actor: &Actor, _area: &Area) {}

    fn on_ability_command(&self, _actor: &Actor, _command: &AbilityCommand) {}

    /// Read-only ability list shown to the client
    fn abilities_of(&self, _actor: &Actor) -> Vec<String> {
        Vec::new()
    }
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl GameplayHooks for NoopHooks {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountEntry {
    password: String,
    character_id: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    accounts: HashMap<String, AccountEntry>,
    #[serde(default)]
    characters: Vec<ActorRecord>,
}

impl StoreFile {
    fn authenticate(&self, account: &str, password: &str) -> AuthOutcome {
        let entry = self
            .accounts
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(account))
            .map(|(_, entry)| entry);
        match entry {
            Some(entry) if entry.password == password => AuthOutcome::Granted {
                character_id: entry.character_id,
            },
            Some(_) => AuthOutcome::WrongPassword,
            None => AuthOutcome::UnknownAccount,
        }
    }

    fn character(&self, character_id: u32) -> Option<&ActorRecord> {
        self.characters.iter().find(|c| c.character_id == character_id)
    }

    fn upsert(&mut self, record: &ActorRecord) {
        match self.characters.iter_mut().find(|c| c.character_id == record.character_id) {
            Some(slot) => *slot = record.clone(),
            None => self.characters.push(record.clone()),
        }
    }
}

/// Accounts and characters kept in one JSON document
///
/// # File Format
/// ```json
/// {
///   "accounts": { "arthur": { "password": "excalibur", "character_id": 1 } },
///   "characters": [ { "character_id": 1, "account": "arthur", ... } ]
/// }
/// ```
/// Account names match case-insensitively. Every save rewrites the file.
pub struct JsonFilePersistence {
    path: PathBuf,
    store: Mutex<StoreFile>,
}

impl JsonFilePersistence {
    /// Open the store, starting empty when the file does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let store = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Store {:?} not found, starting empty", path);
                StoreFile::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            store: Mutex::new(store),
        })
    }

    /// Add or replace an account entry
    pub fn set_account(&self, account: &str, password: &str, character_id: u32) {
        self.store.lock().accounts.insert(
            account.to_string(),
            AccountEntry {
                password: password.to_string(),
                character_id,
            },
        );
    }

    pub async fn flush(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&*self.store.lock())?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl Persistence for JsonFilePersistence {
    async fn authenticate(&self, account: &str, password: &str) -> Result<AuthOutcome> {
        Ok(self.store.lock().authenticate(account, password))
    }

    async fn load_actor(&self, character_id: u32) -> Result<ActorRecord> {
        self.store
            .lock()
            .character(character_id)
            .cloned()
            .ok_or_else(|| WorldError::Persistence(format!("no character {}", character_id)))
    }

    async fn save_actor(&self, record: &ActorRecord) -> Result<()> {
        debug!("Saving character {} ({})", record.character_id, record.name);
        self.store.lock().upsert(record);
        self.flush().await
    }
}

/// In-memory persistence for tests and throwaway servers
#[derive(Default)]
pub struct MemoryPersistence {
    store: Mutex<StoreFile>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account playing `record`
    pub fn add_account(&self, password: &str, record: ActorRecord) {
        let mut store = self.store.lock();
        store.accounts.insert(
            record.account.clone(),
            AccountEntry {
                password: password.to_string(),
                character_id: record.character_id,
            },
        );
        store.upsert(&record);
    }

    pub fn character(&self, character_id: u32) -> Option<ActorRecord> {
        self.store.lock().character(character_id).cloned()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn authenticate(&self, account: &str, password: &str) -> Result<AuthOutcome> {
        Ok(self.store.lock().authenticate(account, password))
    }

    async fn load_actor(&self, character_id: u32) -> Result<ActorRecord> {
        self.character(character_id)
            .ok_or_else(|| WorldError::Persistence(format!("no character {}", character_id)))
    }

    async fn save_actor(&self, record: &ActorRecord) -> Result<()> {
        self.store.lock().upsert(record);
        Ok(())
    }
}
