use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::config::SpeechConfig;
use crate::news::USER_AGENT;

/// Longest text the TTS endpoint accepts in one request
pub const MAX_CHUNK_CHARS: usize = 100;

/// Split `text` into pieces of at most `max` characters, breaking on
/// whitespace where possible. Words longer than `max` are cut.
pub fn chunk_text(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if word_len > max {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let needed = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };

        if needed > max {
            chunks.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            current_len = needed;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Text-to-speech over the Google Translate TTS endpoint. Produces MP3.
pub struct SpeechClient {
    client: Client,
    base_url: String,
    lang: String,
}

impl SpeechClient {
    pub fn new(config: &SpeechConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            lang: config.lang.clone(),
        })
    }

    pub async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        let chunks = chunk_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            anyhow::bail!("no text to speak");
        }

        let total = chunks.len();
        info!("Synthesizing {} characters in {} chunk(s)", text.len(), total);

        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let bytes = self
                .client
                .get(format!("{}/translate_tts", self.base_url))
                .query(&[
                    ("ie", "UTF-8".to_string()),
                    ("client", "tw-ob".to_string()),
                    ("tl", self.lang.clone()),
                    ("q", chunk.clone()),
                    ("idx", idx.to_string()),
                    ("total", total.to_string()),
                    ("textlen", chunk.chars().count().to_string()),
                ])
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            audio.extend_from_slice(&bytes);
        }

        Ok(audio)
    }
}
