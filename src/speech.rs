use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

/// Client for the local speech-synthesis service. Writes the returned
/// audio into the served audio directory and hands back its public URL.
pub struct SpeechClient {
    api_url: String,
    audio_dir: PathBuf,
    client: Client,
}

impl SpeechClient {
    pub fn new(api_url: String, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            api_url,
            audio_dir: audio_dir.into(),
            client: Client::new(),
        }
    }

    /// Synthesize `text` with the given voice. Returns the `/audio/...`
    /// URL of the generated file.
    pub async fn synthesize(&self, text: &str, voice: &str) -> Result<String> {
        let url = format!("{}/synthesize", self.api_url);

        let response = self
            .client
            .post(&url)
            .timeout(SYNTHESIS_TIMEOUT)
            .json(&SynthesizeRequest { text, voice })
            .send()
            .await
            .context("Failed to send synthesis request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("TTS API error {}: {}", status, body);
        }

        let audio = response
            .bytes()
            .await
            .context("Failed to read synthesized audio")?;

        let filename = format!("{}.mp3", Uuid::new_v4());
        let filepath = self.audio_dir.join(&filename);
        std::fs::create_dir_all(&self.audio_dir)
            .with_context(|| format!("Failed to create audio dir {:?}", self.audio_dir))?;
        std::fs::write(&filepath, &audio)
            .with_context(|| format!("Failed to write audio to {:?}", filepath))?;

        tracing::info!("Synthesized voice reply ({} bytes): {}", audio.len(), filename);
        Ok(format!("/audio/{}", filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_service_surfaces_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let client = SpeechClient::new("http://127.0.0.1:1".to_string(), dir.path());
        let result = client.synthesize("hey", "en-US-AndrewNeural").await;
        assert!(result.is_err());
    }
}
