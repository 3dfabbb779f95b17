use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};

use crate::models::Candidate;

// Discord embed limits
const MAX_EMBED_FIELDS: usize = 25;
const MAX_FIELD_VALUE: usize = 1024;

/// Build the single digest embed: trending items get a 🔥 field with their
/// summary, the rest get a bare title + link field. Field count and value
/// length are clamped to Discord's caps.
pub fn build_embed(
    trending: &[(Candidate, Option<String>)],
    others: &[Candidate],
    color: u32,
    now: DateTime<Utc>,
) -> Value {
    let mut fields = Vec::new();

    for (item, summary) in trending {
        let value = match summary {
            Some(text) => format!("{}\n{}", text, item.link),
            None => item.link.clone(),
        };
        fields.push(json!({
            "name": format!("🔥 {}", item.title),
            "value": clamp_chars(&value, MAX_FIELD_VALUE),
            "inline": false,
        }));
    }

    for item in others {
        fields.push(json!({
            "name": item.title,
            "value": clamp_chars(&item.link, MAX_FIELD_VALUE),
            "inline": false,
        }));
    }

    fields.truncate(MAX_EMBED_FIELDS);

    json!({
        "title": format!("📰 {} trending + {} more", trending.len(), others.len()),
        "color": color,
        "timestamp": now.to_rfc3339(),
        "fields": fields,
    })
}

fn clamp_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub struct WebhookPublisher {
    client: Client,
    hooks: Vec<String>,
}

impl WebhookPublisher {
    pub fn new(hooks: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, hooks })
    }

    /// Deliver the embed to every configured webhook. Per-hook failures are
    /// logged, not fatal; returns the number of successful deliveries.
    pub async fn post_embed(&self, embed: &Value) -> usize {
        let payload = json!({ "embeds": [embed] });
        let mut delivered = 0;

        for hook in &self.hooks {
            match self.client.post(hook).json(&payload).send().await {
                Ok(response) if response.status().is_success() => delivered += 1,
                Ok(response) => eprintln!("⚠ Webhook returned {}", response.status()),
                Err(e) => eprintln!("⚠ Webhook post failed: {}", e),
            }
            // Pause between hooks to stay clear of Discord rate limits
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        }

        delivered
    }
}
