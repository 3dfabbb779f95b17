use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use shared::{
    BatchDedup, Candidate, EnvConfig, Fetcher, OpenAiSummarizer, SeenStore, SourcesConfig,
    Summary, WebhookPublisher,
};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "post-news")]
#[command(about = "Fetch political news, deduplicate, summarize, and post to Discord")]
struct Args {
    /// Path to the sources config file
    #[arg(short, long, default_value = "config/sources.yml")]
    config: PathBuf,

    /// Path to the dedup database (defaults to the platform data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Print the formatted post instead of delivering it
    #[arg(long)]
    dry_run: bool,

    /// Number of items to flag as trending and summarize
    #[arg(short, long, default_value = "6")]
    limit: usize,
}

fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .context("Could not determine local data directory")?
        .join("political-news-bot");

    std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

    Ok(data_dir.join("seen.sqlite"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = SourcesConfig::load(&args.config)?;
    let env = EnvConfig::from_env();

    // Resolve delivery targets up front so a misconfigured live run fails
    // before any state is touched
    let webhooks = if args.dry_run {
        Vec::new()
    } else {
        env.require_webhooks()?.to_vec()
    };

    let db_path = match &args.db {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };

    // Store open failure is fatal: publishing without dedup state would
    // repost everything
    let store = SeenStore::open(&db_path, config.ttl(), config.similarity_threshold)?;
    let now = Utc::now();

    match store.purge_expired(now) {
        Ok(0) => {}
        Ok(removed) => println!("✓ Purged {} expired dedup records", removed),
        Err(e) => eprintln!("⚠ Could not purge expired records (will retry next run): {}", e),
    }

    println!(
        "📡 Fetching {} RSS and {} HTML sources...",
        config.rss.len(),
        config.html.len()
    );
    let fetcher = Fetcher::new()?;
    let candidates = fetcher.fetch_all(&config.rss, &config.html, now).await;
    println!("✓ Fetched {} candidates", candidates.len());

    // Screen within the batch too: nothing is recorded until the whole
    // batch is checked, so syndicated copies arriving in the same run
    // would otherwise all pass the store check
    let mut batch = BatchDedup::new(config.similarity_threshold);
    let mut fresh: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if !store
            .is_duplicate(&candidate, now)
            .context("Dedup check failed")?
            && batch.admit(&candidate)
        {
            fresh.push(candidate);
        }
    }

    if fresh.is_empty() {
        println!("No new items to post.");
        return Ok(());
    }

    fresh.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    let split = args.limit.min(fresh.len());
    let (trending, others) = fresh.split_at(split);
    println!(
        "✓ {} new items ({} trending + {} more)",
        fresh.len(),
        trending.len(),
        others.len()
    );

    let summaries = summarize_trending(&fetcher, trending, &env, args.dry_run).await?;

    // Record before delivery: a crash mid-post must not cause a repost.
    // Dry runs leave the store untouched so a later live run still posts.
    if persist_seen(&store, &fresh, now, args.dry_run)? {
        println!(
            "✓ Recorded {} items ({} now tracked)",
            fresh.len(),
            store.count()?
        );
    } else {
        println!("✓ Dry run: leaving the dedup store untouched");
    }

    let trending_with_summaries: Vec<(Candidate, Option<String>)> = trending
        .iter()
        .map(|item| {
            let text = match summaries.get(&item.link) {
                Some(Summary::Success { text }) => Some(text.clone()),
                _ => None,
            };
            (item.clone(), text)
        })
        .collect();

    let color = trending
        .first()
        .map(|item| config.color_for(&item.tags))
        .unwrap_or_else(|| config.default_color());
    let embed = shared::build_embed(&trending_with_summaries, others, color, now);

    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&embed)?);
        println!("\n✅ Dry run complete (nothing posted).");
        return Ok(());
    }

    println!("📨 Posting to {} webhook(s)...", webhooks.len());
    let publisher = WebhookPublisher::new(webhooks)?;
    let delivered = publisher.post_embed(&embed).await;
    if delivered == 0 {
        anyhow::bail!("All webhook deliveries failed");
    }

    println!(
        "✅ Posted {} trending + {} more ({} deliveries).",
        trending.len(),
        others.len(),
        delivered
    );

    Ok(())
}

/// Mark the batch as seen, unless this is a dry run. Returns whether the
/// store was written.
fn persist_seen(
    store: &SeenStore,
    items: &[Candidate],
    now: chrono::DateTime<Utc>,
    dry_run: bool,
) -> Result<bool> {
    if dry_run {
        return Ok(false);
    }
    for candidate in items {
        store.record(candidate, now)?;
    }
    Ok(true)
}

/// Summarize the trending slice, keyed by item link. In a dry run a missing
/// API key just skips summaries; a live run requires one.
async fn summarize_trending(
    fetcher: &Fetcher,
    trending: &[Candidate],
    env: &EnvConfig,
    dry_run: bool,
) -> Result<HashMap<String, Summary>> {
    if trending.is_empty() {
        return Ok(HashMap::new());
    }

    let api_key = if dry_run {
        match &env.openai_api_key {
            Some(key) => key.clone(),
            None => {
                println!("⚠ OPENAI_API_KEY not set; skipping summaries for dry run");
                return Ok(HashMap::new());
            }
        }
    } else {
        env.require_openai_key()?.to_string()
    };

    println!("🤖 Summarizing {} trending items...", trending.len());
    println!("  (This may take a minute...)");

    let urls: Vec<String> = trending.iter().map(|item| item.link.clone()).collect();
    let article_texts: HashMap<String, Option<String>> =
        fetcher.fetch_articles_parallel(urls).await.into_iter().collect();

    // Fall back to the feed excerpt when the article page gives nothing
    let inputs: Vec<(String, String)> = trending
        .iter()
        .map(|item| {
            let text = article_texts
                .get(&item.link)
                .and_then(|t| t.clone())
                .unwrap_or_else(|| item.body.clone());
            (item.link.clone(), text)
        })
        .collect();

    let summarizer = OpenAiSummarizer::new(api_key)?;
    let results: HashMap<String, Summary> = summarizer
        .summarize_articles_parallel(inputs)
        .await
        .into_iter()
        .collect();

    let succeeded = results
        .values()
        .filter(|s| matches!(s, Summary::Success { .. }))
        .count();
    println!("✓ Summarized {}/{} trending items", succeeded, trending.len());

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn items() -> Vec<Candidate> {
        vec![Candidate {
            title: "Senate Passes Budget Bill".to_string(),
            link: "https://gov.example/bill123".to_string(),
            body: String::new(),
            source_id: "gov-rss".to_string(),
            tags: Vec::new(),
            published_at: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
        }]
    }

    #[test]
    fn dry_run_does_not_write_the_store() {
        let store = SeenStore::open_in_memory(Duration::hours(24), 0.9).unwrap();
        let items = items();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();

        assert!(!persist_seen(&store, &items, now, true).unwrap());
        assert_eq!(store.count().unwrap(), 0);
        // A later live run still sees the item as new
        assert!(!store.is_duplicate(&items[0], now).unwrap());
    }

    #[test]
    fn live_run_records_the_batch() {
        let store = SeenStore::open_in_memory(Duration::hours(24), 0.9).unwrap();
        let items = items();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap();

        assert!(persist_seen(&store, &items, now, false).unwrap());
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.is_duplicate(&items[0], now).unwrap());
    }
}

