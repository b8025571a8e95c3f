use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::characters::CharacterConfig;

pub const PROFILE_FILE: &str = "user_profile.json";
pub const PENDING_FILE: &str = "pending_messages.json";
pub const STORY_FILE: &str = "story.json";

const STORY_TTL_HOURS: i64 = 24;

/// Per-character conversational state. Mood is a free-form string echoed
/// from model output; last_seen advances on every interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterState {
    pub mood: String,
    pub last_seen: DateTime<Utc>,
}

impl Default for CharacterState {
    fn default() -> Self {
        Self {
            mood: "Chill".to_string(),
            last_seen: Utc::now(),
        }
    }
}

/// Global user profile: permanent facts learned from conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub facts: Vec<String>,
}

/// Autonomous outbound message, held until the client polls /sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
    pub text: String,
    #[serde(rename = "isUser")]
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

/// Singleton story post, overwritten by the story task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub image: Option<String>,
}

impl Story {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.timestamp > ChronoDuration::hours(STORY_TTL_HOURS)
    }
}

/// File-backed JSON store with a per-file async mutex.
///
/// All read-modify-write cycles go through `update` under the file's lock,
/// so the chat handler and the background tasks cannot interleave a stale
/// read with a write. Corrupt files yield defaults and are repaired on the
/// next successful write.
pub struct StateStore {
    root: PathBuf,
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StateStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    fn lock_for(&self, file: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("state lock registry poisoned");
        locks
            .entry(file.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_or_default<T: DeserializeOwned + Default>(&self, file: &str) -> T {
        let path = self.path(file);
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Corrupt state file {:?}, using defaults: {}", path, e);
                    T::default()
                }
            },
            Err(_) => T::default(),
        }
    }

    fn write(&self, file: &str, value: &impl Serialize) -> Result<()> {
        let path = self.path(file);
        let json = serde_json::to_string(value).context("Failed to serialize state")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(())
    }

    /// Read a snapshot of the entity, without holding the lock afterwards.
    pub async fn get<T: DeserializeOwned + Default>(&self, file: &str) -> T {
        let lock = self.lock_for(file);
        let _guard = lock.lock().await;
        self.read_or_default(file)
    }

    /// Locked read-modify-write. The closure's return value is passed back
    /// to the caller.
    pub async fn update<T, R>(&self, file: &str, f: impl FnOnce(&mut T) -> R) -> Result<R>
    where
        T: DeserializeOwned + Default + Serialize,
    {
        let lock = self.lock_for(file);
        let _guard = lock.lock().await;
        let mut value: T = self.read_or_default(file);
        let result = f(&mut value);
        self.write(file, &value)?;
        Ok(result)
    }

    /// Locked read-then-delete: returns the entity and removes the backing
    /// file in the same critical section.
    pub async fn take<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        let lock = self.lock_for(file);
        let _guard = lock.lock().await;
        let value = self.read_or_default(file);
        let path = self.path(file);
        if path.exists() {
            std::fs::remove_file(&path).with_context(|| format!("Failed to remove {:?}", path))?;
        }
        Ok(value)
    }

    pub async fn remove(&self, file: &str) -> Result<()> {
        let lock = self.lock_for(file);
        let _guard = lock.lock().await;
        let path = self.path(file);
        if path.exists() {
            std::fs::remove_file(&path).with_context(|| format!("Failed to remove {:?}", path))?;
        }
        Ok(())
    }

    // --- Typed accessors ---

    pub async fn character_state(&self, character: &CharacterConfig) -> CharacterState {
        self.get(&character.state_file).await
    }

    pub async fn update_character_state<R>(
        &self,
        character: &CharacterConfig,
        f: impl FnOnce(&mut CharacterState) -> R,
    ) -> Result<R> {
        self.update(&character.state_file, f).await
    }

    pub async fn profile(&self) -> UserProfile {
        self.get(PROFILE_FILE).await
    }

    /// Append a fact unless its prefix already appears in an existing entry.
    /// Returns whether the fact was stored.
    pub async fn append_fact(&self, fact: &str) -> Result<bool> {
        let fact = fact.to_string();
        self.update(PROFILE_FILE, move |profile: &mut UserProfile| {
            if fact_is_duplicate(&profile.facts, &fact) {
                false
            } else {
                profile.facts.push(fact);
                true
            }
        })
        .await
    }

    pub async fn push_pending(&self, text: String) -> Result<()> {
        self.update(PENDING_FILE, |messages: &mut Vec<PendingMessage>| {
            messages.push(PendingMessage {
                text,
                is_user: false,
                timestamp: Utc::now(),
            });
        })
        .await
    }

    /// Drain the pending queue. A second drain with no intervening enqueue
    /// returns an empty list.
    pub async fn drain_pending(&self) -> Result<Vec<PendingMessage>> {
        self.take(PENDING_FILE).await
    }

    pub async fn story(&self) -> Option<Story> {
        self.get::<Option<Story>>(STORY_FILE).await
    }

    pub async fn set_story(&self, story: Story) -> Result<()> {
        self.update(STORY_FILE, |current: &mut Option<Story>| {
            *current = Some(story);
        })
        .await
    }
}

/// Crude prefix dedup: the first 10 characters of the candidate are checked
/// for containment in every existing entry.
pub fn fact_is_duplicate(facts: &[String], candidate: &str) -> bool {
    let prefix: String = candidate.chars().take(10).collect();
    if prefix.is_empty() {
        return true;
    }
    facts.iter().any(|fact| fact.contains(&prefix))
}
