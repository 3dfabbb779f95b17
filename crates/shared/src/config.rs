use anyhow::{Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

fn default_ttl_hours() -> i64 {
    24
}

fn default_similarity_threshold() -> f64 {
    0.9
}

#[derive(Debug, Clone, Deserialize)]
pub struct RssSource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HtmlSource {
    pub name: String,
    pub url: String,
    /// CSS selector picking out headline elements on the page.
    pub selector: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Source list and tunables, loaded from `config/sources.yml` and validated
/// up front so a bad config fails the run before anything is fetched.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub rss: Vec<RssSource>,
    #[serde(default)]
    pub html: Vec<HtmlSource>,
    /// Embed colors by tag; "default" is required.
    pub colors: HashMap<String, u32>,
    /// Dedup retention window in hours.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
    /// Normalized title similarity in 0.0..=1.0 at or above which two items
    /// count as the same story.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl SourcesConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: SourcesConfig =
            serde_yaml::from_str(contents).context("Config is not valid YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rss.is_empty() && self.html.is_empty() {
            anyhow::bail!("Config contains no sources (need at least one rss or html entry)");
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            anyhow::bail!(
                "similarity_threshold must be between 0.0 and 1.0, got {}",
                self.similarity_threshold
            );
        }
        if self.ttl_hours <= 0 {
            anyhow::bail!("ttl_hours must be positive, got {}", self.ttl_hours);
        }
        if !self.colors.contains_key("default") {
            anyhow::bail!("colors must include a \"default\" entry");
        }
        for source in &self.html {
            scraper::Selector::parse(&source.selector).map_err(|e| {
                anyhow::anyhow!("Invalid CSS selector for source '{}': {}", source.name, e)
            })?;
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::hours(self.ttl_hours)
    }

    pub fn default_color(&self) -> u32 {
        self.colors.get("default").copied().unwrap_or(0)
    }

    /// Color for the first tag that has one configured, else the default.
    pub fn color_for(&self, tags: &[String]) -> u32 {
        tags.iter()
            .find_map(|tag| self.colors.get(tag).copied())
            .unwrap_or_else(|| self.default_color())
    }
}

/// Secrets and delivery targets, from the environment. Both are optional at
/// load time so a dry run can work without them; the driver requires them
/// before doing anything live.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub openai_api_key: Option<String>,
    pub webhooks: Vec<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::try_load_dotenv();

        let openai_api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());

        let mut webhooks = Vec::new();
        for key in ["DISCORD_WEBHOOKS", "DISCORD_WEBHOOK"] {
            if let Ok(val) = env::var(key) {
                webhooks.extend(
                    val.split(',')
                        .map(str::trim)
                        .filter(|h| !h.is_empty())
                        .map(String::from),
                );
            }
        }

        Self {
            openai_api_key,
            webhooks,
        }
    }

    pub fn require_openai_key(&self) -> Result<&str> {
        self.openai_api_key.as_deref().context(
            "OPENAI_API_KEY not found.\n\n\
            To fix this, create ~/.config/political-news-bot/.env with:\n  \
            OPENAI_API_KEY=your_key_here\n  \
            DISCORD_WEBHOOKS=https://discord.com/api/webhooks/...\n\n\
            Get your OpenAI API key from: https://platform.openai.com/api-keys",
        )
    }

    pub fn require_webhooks(&self) -> Result<&[String]> {
        if self.webhooks.is_empty() {
            anyhow::bail!(
                "No Discord webhooks configured.\n\n\
                To fix this, set DISCORD_WEBHOOKS (comma-separated) or DISCORD_WEBHOOK\n\
                in the environment or in ~/.config/political-news-bot/.env"
            );
        }
        Ok(&self.webhooks)
    }

    fn try_load_dotenv() {
        // Try locations in order of preference:

        // 1. Current directory (for development)
        if dotenvy::dotenv().is_ok() {
            return;
        }

        // 2. ~/.config/political-news-bot/.env (standard config location)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("political-news-bot").join(".env");
            if config_path.exists() && dotenvy::from_path(&config_path).is_ok() {
                return;
            }
        }

        // 3. ~/.env (home directory)
        if let Some(home_dir) = dirs::home_dir() {
            let home_path = home_dir.join(".env");
            if home_path.exists() {
                let _ = dotenvy::from_path(&home_path);
            }
        }

        // If none found, that's okay - environment variables might be set system-wide
    }
}
