// Public modules
pub mod config;
pub mod fetcher;
pub mod models;
pub mod seen_store;
pub mod summarizer;
pub mod webhook;

// Re-export commonly used types
pub use config::{EnvConfig, HtmlSource, RssSource, SourcesConfig};
pub use fetcher::Fetcher;
pub use models::{fingerprint, normalize_title, Candidate};
pub use seen_store::{BatchDedup, SeenStore};
pub use summarizer::{OpenAiSummarizer, Summary};
pub use webhook::{build_embed, WebhookPublisher};
