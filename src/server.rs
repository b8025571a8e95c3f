use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::characters::{CharacterConfig, CharacterRegistry};
use crate::config::AppConfig;
use crate::environment;
use crate::facts::FactExtractor;
use crate::llm::{LlmClient, Message};
use crate::lookup::EnvironmentLookup;
use crate::memory::VectorMemory;
use crate::postprocess;
use crate::prompt::{self, PromptContext};
use crate::runtime::{BackendEvent, BackendRuntime};
use crate::speech::SpeechClient;
use crate::state::{PendingMessage, StateStore, PROFILE_FILE};

const GROUP_THREAD_ID: &str = "group";

pub struct ServerState {
    pub config: Arc<AppConfig>,
    pub llm: LlmClient,
    pub store: Arc<StateStore>,
    pub memory: Arc<VectorMemory>,
    pub lookup: Arc<dyn EnvironmentLookup>,
    pub registry: Arc<CharacterRegistry>,
    pub facts: FactExtractor,
    pub speech: Option<SpeechClient>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub image_filename: Option<String>,
    #[serde(default = "default_thread_id")]
    pub thread_id: String,
    #[serde(default = "default_character_id")]
    pub character_id: String,
}

fn default_thread_id() -> String {
    "dm".to_string()
}

fn default_character_id() -> String {
    crate::characters::DEFAULT_CHARACTER_ID.to_string()
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChatReply {
    Group {
        group_messages: Vec<GroupMessage>,
    },
    Single {
        text: String,
        audio_url: Option<String>,
        is_voice_only: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct GroupMessage {
    pub sender: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn serve_backend(
    runtime: BackendRuntime,
    event_rx: flume::Receiver<BackendEvent>,
) -> Result<()> {
    let bind_addr = runtime
        .config
        .bind_addr
        .parse::<SocketAddr>()
        .context("Invalid bind_addr (expected host:port)")?;

    let state = Arc::new(runtime.build_server_state());
    runtime.spawn_scheduler();
    spawn_event_logger(event_rx);

    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", bind_addr))?;
    tracing::info!("Confidant backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Server failed")?;
    Ok(())
}

pub fn router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/upload", post(upload))
        .route("/sync", get(sync_messages))
        .route("/story", get(get_active_story))
        .route("/clear", post(clear_memory))
        .nest_service("/audio", ServeDir::new(&state.config.audio_dir))
        .nest_service("/images", ServeDir::new(&state.config.image_dir))
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(cors)
        .with_state(state)
}

fn spawn_event_logger(event_rx: flume::Receiver<BackendEvent>) {
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv_async().await {
            match event {
                BackendEvent::FactLearned(fact) => tracing::debug!("Fact learned: {}", fact),
                BackendEvent::AutoMessageQueued(text) => {
                    tracing::debug!("Auto message queued: {}", text)
                }
                BackendEvent::StoryPosted(text) => tracing::debug!("Story posted: {}", text),
            }
        }
    });
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn chat(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, (StatusCode, String)> {
    handle_chat(&state, request)
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn handle_chat(state: &ServerState, request: ChatRequest) -> Result<ChatReply> {
    let character = state.registry.resolve(&request.character_id);
    let context = build_prompt_context(state, character, &request.message).await;

    if request.thread_id == GROUP_THREAD_ID {
        return handle_group_chat(state, &request, character, &context).await;
    }

    let voice_enabled = state.config.enable_voice_replies && state.speech.is_some();
    let system = context.single_instruction(character, voice_enabled);

    let mut messages = vec![Message::system(system)];
    messages.extend(request.history.iter().cloned());
    messages.push(Message::user(request.message.clone()));

    let raw = state.llm.chat(&messages).await?;

    let (text, new_mood) = postprocess::extract_mood(&raw, &context.mood);
    let mut text = postprocess::humanize(&text, &mut StdRng::from_entropy());

    state
        .store
        .update_character_state(character, |char_state| {
            char_state.mood = new_mood;
            char_state.last_seen = Utc::now();
        })
        .await?;

    // long-term effects; neither may fail the reply
    if let Err(e) = state
        .memory
        .add(&format!("User said: {}", request.message))
        .await
    {
        tracing::warn!("Failed to store memory: {}", e);
    }
    state.facts.submit(&request.message);

    let mut audio_url = None;
    let mut is_voice_only = false;
    if voice_enabled {
        if let Some(clean) = postprocess::take_voice_marker(&text) {
            if let Some(speech) = &state.speech {
                audio_url = Some(speech.synthesize(&clean, &character.voice).await?);
                is_voice_only = true;
            }
            text = clean;
        }
    }

    Ok(ChatReply::Single {
        text,
        audio_url,
        is_voice_only,
    })
}

/// Two sequential model calls: the primary persona, then the hardcoded
/// partner who is shown the first reply. No mood parsing, no humanization,
/// and no state write for this mode.
async fn handle_group_chat(
    state: &ServerState,
    request: &ChatRequest,
    character: &CharacterConfig,
    context: &PromptContext,
) -> Result<ChatReply> {
    let mut messages = vec![Message::system(context.group_primary_instruction(character))];
    messages.extend(request.history.iter().cloned());
    messages.push(Message::user(request.message.clone()));
    let primary_text = state.llm.chat(&messages).await?;

    // the partner only needs the latest exchange
    let partner_messages = vec![
        Message::system(prompt::group_partner_instruction(
            &character.name,
            &primary_text,
        )),
        Message::user(request.message.clone()),
    ];
    let partner_text = state.llm.chat(&partner_messages).await?;

    Ok(ChatReply::Group {
        group_messages: vec![
            GroupMessage {
                sender: character.name.clone(),
                text: primary_text,
            },
            GroupMessage {
                sender: "Sarah".to_string(),
                text: partner_text,
            },
        ],
    })
}

async fn build_prompt_context(
    state: &ServerState,
    character: &CharacterConfig,
    message: &str,
) -> PromptContext {
    let char_state = state.store.character_state(character).await;
    let profile = state.store.profile().await;

    let weather = state.lookup.weather().await;
    let trending = state.lookup.trending_topic().await;
    let environment = environment::snapshot_now(weather, trending).summary();

    let memories = match state
        .memory
        .search(message, state.config.memory_search_k)
        .await
    {
        Ok(memories) => memories,
        Err(e) => {
            tracing::warn!("Memory search failed: {}", e);
            Vec::new()
        }
    };

    let event = prompt::pick_event(
        &mut StdRng::from_entropy(),
        state.config.event_probability,
    )
    .map(str::to_string);

    PromptContext {
        environment,
        mood: char_state.mood.clone(),
        facts: profile.facts,
        gap_exceeded: prompt::gap_exceeded(char_state.last_seen, Utc::now()),
        event,
        memories,
    }
}

async fn upload(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let Some(original_name) = field.file_name().map(str::to_string) else {
            continue;
        };

        let extension = std::path::Path::new(&original_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        let bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

        let filename = format!("{}{}", Uuid::new_v4(), extension);
        let dir = std::path::Path::new(&state.config.image_dir);
        std::fs::create_dir_all(dir)
            .map_err(|e| internal_error(anyhow::anyhow!("Failed to create image dir: {}", e)))?;
        std::fs::write(dir.join(&filename), &bytes)
            .map_err(|e| internal_error(anyhow::anyhow!("Failed to write upload: {}", e)))?;

        let url = format!("/images/{}", filename);
        return Ok(Json(UploadResponse { filename, url }));
    }

    Err((
        StatusCode::BAD_REQUEST,
        "multipart request contained no file".to_string(),
    ))
}

/// Polling endpoint for autonomous messages: drains the pending queue.
async fn sync_messages(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<PendingMessage>>, (StatusCode, String)> {
    state
        .store
        .drain_pending()
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn get_active_story(
    State(state): State<Arc<ServerState>>,
) -> Json<serde_json::Value> {
    match state.store.story().await {
        Some(story) if !story.is_expired(Utc::now()) => {
            Json(serde_json::to_value(&story).unwrap_or_else(|_| serde_json::json!({})))
        }
        _ => Json(serde_json::json!({})),
    }
}

/// Wipe vector memory, the user profile, and every character state file.
/// The story file is deliberately left alone.
async fn clear_memory(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<ClearResponse>, (StatusCode, String)> {
    state
        .memory
        .wipe()
        .map_err(internal_error)?;

    state
        .store
        .remove(PROFILE_FILE)
        .await
        .map_err(internal_error)?;

    for character in state.registry.all() {
        state
            .store
            .remove(&character.state_file)
            .await
            .map_err(internal_error)?;
    }

    Ok(Json(ClearResponse {
        status: "Memory wiped.",
    }))
}

fn internal_error(error: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::testing::FixedLookup;
    use crate::state::Story;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_state(dir: &TempDir) -> Arc<ServerState> {
        let config = Arc::new(AppConfig {
            data_dir: dir.path().display().to_string(),
            llm_api_url: "http://127.0.0.1:1".to_string(),
            ..AppConfig::default()
        });
        let llm = LlmClient::new(
            config.llm_api_url.clone(),
            config.llm_model.clone(),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let store = Arc::new(StateStore::new(dir.path()));
        let memory = Arc::new(VectorMemory::open_in_memory(llm.clone()).unwrap());
        let (events_tx, _events_rx) = flume::unbounded();
        let facts = FactExtractor::spawn(llm.clone(), store.clone(), events_tx);

        Arc::new(ServerState {
            config,
            llm,
            store,
            memory,
            lookup: Arc::new(FixedLookup::placeholders()),
            registry: Arc::new(CharacterRegistry::builtin()),
            facts,
            speech: None,
        })
    }

    #[tokio::test]
    async fn sync_drains_the_pending_queue_once() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.push_pending("you still up?".to_string()).await.unwrap();

        let Json(first) = sync_messages(State(state.clone())).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].text, "you still up?");

        let Json(second) = sync_messages(State(state)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn story_endpoint_hides_expired_stories() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let Json(empty) = get_active_story(State(state.clone())).await;
        assert_eq!(empty, serde_json::json!({}));

        state
            .store
            .set_story(Story {
                text: "leg day. regret.".to_string(),
                timestamp: Utc::now(),
                image: None,
            })
            .await
            .unwrap();
        let Json(active) = get_active_story(State(state.clone())).await;
        assert_eq!(active["text"], "leg day. regret.");

        state
            .store
            .set_story(Story {
                text: "old news".to_string(),
                timestamp: Utc::now() - ChronoDuration::hours(25),
                image: None,
            })
            .await
            .unwrap();
        let Json(expired) = get_active_story(State(state)).await;
        assert_eq!(expired, serde_json::json!({}));
    }

    #[tokio::test]
    async fn clear_wipes_state_but_leaves_the_story() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        state.store.append_fact("Has a dog named Rex").await.unwrap();
        let alex = state.registry.resolve("alex");
        state
            .store
            .update_character_state(alex, |s| s.mood = "Happy".to_string())
            .await
            .unwrap();
        state
            .store
            .set_story(Story {
                text: "still here".to_string(),
                timestamp: Utc::now(),
                image: None,
            })
            .await
            .unwrap();

        clear_memory(State(state.clone())).await.unwrap();

        assert!(state.store.profile().await.facts.is_empty());
        assert_eq!(state.store.character_state(alex).await.mood, "Chill");
        // asymmetry: /clear does not touch the story file
        let story = state.store.story().await.unwrap();
        assert_eq!(story.text, "still here");
    }

    #[tokio::test]
    async fn chat_with_unreachable_model_maps_to_500() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let request = ChatRequest {
            message: "hey".to_string(),
            history: Vec::new(),
            image_filename: None,
            thread_id: "dm".to_string(),
            character_id: "alex".to_string(),
        };

        let result = chat(State(state), Json(request)).await;
        let (status, _detail) = result.err().unwrap();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn chat_request_defaults_thread_and_character() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"message": "hey", "history": []}"#).unwrap();
        assert_eq!(request.thread_id, "dm");
        assert_eq!(request.character_id, "alex");
        assert!(request.image_filename.is_none());
    }

    #[test]
    fn single_reply_serializes_expected_shape() {
        let reply = ChatReply::Single {
            text: "hey!".to_string(),
            audio_url: None,
            is_voice_only: false,
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["text"], "hey!");
        assert_eq!(value["is_voice_only"], false);
        assert!(value["audio_url"].is_null());
    }

    #[test]
    fn group_reply_serializes_sender_labels() {
        let reply = ChatReply::Group {
            group_messages: vec![
                GroupMessage {
                    sender: "Alex".to_string(),
                    text: "busy rn".to_string(),
                },
                GroupMessage {
                    sender: "Sarah".to_string(),
                    text: "LMAO ok".to_string(),
                },
            ],
        };
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["group_messages"][0]["sender"], "Alex");
        assert_eq!(value["group_messages"][1]["sender"], "Sarah");
    }
}
