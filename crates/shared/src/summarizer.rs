use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Semaphore;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const MODEL: &str = "gpt-3.5-turbo";
const SYSTEM_PROMPT: &str =
    "Summarize this political news article into three concise paragraphs.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Summary {
    Success { text: String },
    Failed(String),
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

pub struct OpenAiSummarizer {
    client: Client,
    api_key: String,
    semaphore: Arc<Semaphore>,
}

impl OpenAiSummarizer {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        // Low concurrency to stay under token-per-minute rate limits
        let semaphore = Arc::new(Semaphore::new(2));

        Ok(Self {
            client,
            api_key,
            semaphore,
        })
    }

    pub async fn summarize_article(&self, content: &str) -> Result<Summary> {
        let _permit = self.semaphore.acquire().await?;

        for attempt in 0..5 {
            match self.try_summarize(content).await {
                Ok(summary) => {
                    // Small delay after a successful request to spread load
                    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
                    return Ok(summary);
                }
                Err(e) => {
                    let error_msg = e.to_string();
                    let is_rate_limit = error_msg.contains("rate_limit");

                    if attempt == 4 {
                        eprintln!("Failed to summarize: {}", e);
                        return Ok(Summary::Failed(e.to_string()));
                    }

                    // Longer backoff for rate limits
                    let backoff = if is_rate_limit {
                        std::time::Duration::from_secs(15 * (attempt + 1) as u64)
                    } else {
                        std::time::Duration::from_millis(1000 * (2_u64.pow(attempt as u32)))
                    };

                    if is_rate_limit {
                        eprintln!("Rate limit hit, waiting {:?} before retry...", backoff);
                    }

                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Ok(Summary::Failed("Max retries reached".to_string()))
    }

    async fn try_summarize(&self, content: &str) -> Result<Summary> {
        let request = ChatRequest {
            model: MODEL.to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: truncate_for_prompt(content, 10000).to_string(),
                },
            ],
            temperature: 0.5,
            max_tokens: 600,
        };

        let response = self
            .client
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            anyhow::bail!("OpenAI API error: {}", error_text);
        }

        let chat_response = response
            .json::<ChatResponse>()
            .await
            .context("Failed to parse OpenAI API response")?;

        let text = chat_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            anyhow::bail!("OpenAI returned an empty completion");
        }

        Ok(Summary::Success { text })
    }

    pub async fn summarize_articles_parallel(
        &self,
        articles: Vec<(String, String)>,
    ) -> Vec<(String, Summary)> {
        let results: Vec<(String, Summary)> = stream::iter(articles)
            .map(|(url, content)| {
                let url_clone = url.clone();
                async move {
                    let summary = self
                        .summarize_article(&content)
                        .await
                        .unwrap_or_else(|e| Summary::Failed(e.to_string()));
                    // Print progress dot
                    eprint!(".");
                    let _ = std::io::stderr().flush();
                    (url_clone, summary)
                }
            })
            .buffer_unordered(2)
            .collect()
            .await;
        eprintln!(); // Newline after dots
        results
    }
}

/// Truncate to at most `max` bytes, respecting UTF-8 boundaries.
fn truncate_for_prompt(content: &str, max: usize) -> &str {
    if content.len() <= max {
        return content;
    }
    let mut end = max;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}
