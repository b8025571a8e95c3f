use anyhow::Result;
use std::sync::Arc;

use crate::llm::LlmClient;
use crate::runtime::BackendEvent;
use crate::state::StateStore;

const QUEUE_CAPACITY: usize = 32;
const MIN_FACT_LEN: usize = 5;
const NONE_SENTINEL: &str = "NONE";

/// Background fact extraction: a bounded queue feeding one worker task.
///
/// Submission is fire-and-forget from the chat path; a full queue drops
/// the job. Completion is observable through `BackendEvent::FactLearned`.
pub struct FactExtractor {
    tx: flume::Sender<String>,
}

impl FactExtractor {
    pub fn spawn(
        llm: LlmClient,
        store: Arc<StateStore>,
        events: flume::Sender<BackendEvent>,
    ) -> Self {
        let (tx, rx) = flume::bounded::<String>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Ok(text) = rx.recv_async().await {
                if let Err(e) = extract_and_store(&llm, &store, &events, &text).await {
                    tracing::warn!("Fact extraction failed: {}", e);
                }
            }
        });

        Self { tx }
    }

    /// Queue a user message for extraction. Never blocks the caller.
    pub fn submit(&self, text: &str) {
        if self.tx.try_send(text.to_string()).is_err() {
            tracing::warn!("Fact extraction queue full, dropping job");
        }
    }
}

async fn extract_and_store(
    llm: &LlmClient,
    store: &StateStore,
    events: &flume::Sender<BackendEvent>,
    text: &str,
) -> Result<()> {
    let response = llm.generate(&extraction_prompt(text)).await?;
    let candidate = response.trim();

    if !is_storable(candidate) {
        return Ok(());
    }

    if store.append_fact(candidate).await? {
        tracing::info!("New fact learned: {}", candidate);
        let _ = events.send(BackendEvent::FactLearned(candidate.to_string()));
    }

    Ok(())
}

fn extraction_prompt(text: &str) -> String {
    format!(
        "Analyze this text from the user: \"{}\"\n\
         Extract any PERMANENT facts about the user (name, likes, dislikes, pets, job, location).\n\
         Ignore temporary things (like \"I am eating\").\n\
         Output ONLY the facts as a list, or \"NONE\" if nothing found.",
        text
    )
}

/// A model response is stored only when it is not the sentinel and is more
/// than trivially short.
fn is_storable(candidate: &str) -> bool {
    !candidate.contains(NONE_SENTINEL) && candidate.len() > MIN_FACT_LEN
}
