use std::sync::Arc;

use anyhow::{Context, Result};

use crate::characters::CharacterRegistry;
use crate::config::AppConfig;
use crate::facts::FactExtractor;
use crate::llm::LlmClient;
use crate::lookup::{EnvironmentLookup, LiveLookup};
use crate::memory::VectorMemory;
use crate::scheduler::Scheduler;
use crate::server::ServerState;
use crate::speech::SpeechClient;
use crate::state::StateStore;

/// Notifications emitted by background work, mainly for logging and for
/// tests that need to await an effect instead of polling files.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    FactLearned(String),
    AutoMessageQueued(String),
    StoryPosted(String),
}

/// Everything the server and the background tasks share, wired once at
/// startup.
pub struct BackendRuntime {
    pub config: Arc<AppConfig>,
    pub llm: LlmClient,
    pub store: Arc<StateStore>,
    pub memory: Arc<VectorMemory>,
    pub lookup: Arc<dyn EnvironmentLookup>,
    pub registry: Arc<CharacterRegistry>,
    pub events_tx: flume::Sender<BackendEvent>,
}

impl BackendRuntime {
    pub fn bootstrap(config: AppConfig, events_tx: flume::Sender<BackendEvent>) -> Result<Self> {
        std::fs::create_dir_all(&config.audio_dir)
            .with_context(|| format!("Failed to create audio dir {}", config.audio_dir))?;
        std::fs::create_dir_all(&config.image_dir)
            .with_context(|| format!("Failed to create image dir {}", config.image_dir))?;
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data dir {}", config.data_dir))?;

        let config = Arc::new(config);

        let llm = LlmClient::new(
            config.llm_api_url.clone(),
            config.llm_model.clone(),
            std::time::Duration::from_secs(config.chat_timeout_secs),
            std::time::Duration::from_secs(config.background_timeout_secs),
        );

        let store = Arc::new(StateStore::new(&config.data_dir));

        let memory = Arc::new(
            VectorMemory::open(&config.memory_db_path, llm.clone())
                .context("Failed to open vector memory")?,
        );
        tracing::info!("Vector memory initialized: {}", config.memory_db_path);

        let lookup: Arc<dyn EnvironmentLookup> = Arc::new(LiveLookup::new(
            config.weather_api_url.clone(),
            config.weather_latitude,
            config.weather_longitude,
            config.search_api_url.clone(),
            config.trending_query.clone(),
        ));

        let registry = Arc::new(CharacterRegistry::builtin());

        Ok(Self {
            config,
            llm,
            store,
            memory,
            lookup,
            registry,
            events_tx,
        })
    }

    /// Assemble the shared server state. Spawns the fact-extraction worker,
    /// so this must run inside the async runtime.
    pub fn build_server_state(&self) -> ServerState {
        let facts = FactExtractor::spawn(
            self.llm.clone(),
            self.store.clone(),
            self.events_tx.clone(),
        );

        let speech = self.speech_client();
        if self.config.enable_voice_replies && speech.is_none() {
            tracing::warn!("Voice replies enabled but tts_api_url is unset; voice stays off");
        }

        ServerState {
            config: self.config.clone(),
            llm: self.llm.clone(),
            store: self.store.clone(),
            memory: self.memory.clone(),
            lookup: self.lookup.clone(),
            registry: self.registry.clone(),
            facts,
            speech,
        }
    }

    /// Start the heartbeat and story loops.
    pub fn spawn_scheduler(&self) {
        let scheduler = Arc::new(Scheduler::new(
            self.config.clone(),
            self.llm.clone(),
            self.store.clone(),
            self.memory.clone(),
            self.lookup.clone(),
            self.registry.clone(),
            self.events_tx.clone(),
        ));
        scheduler.spawn();
    }

    fn speech_client(&self) -> Option<SpeechClient> {
        self.config
            .tts_api_url
            .as_ref()
            .map(|url| SpeechClient::new(url.clone(), self.config.audio_dir.clone()))
    }
}
