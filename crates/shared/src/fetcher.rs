use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use rss::Channel;
use scraper::{Html, Selector};
use std::sync::Arc;
use tokio::sync::Semaphore;
use url::Url;

use crate::config::{HtmlSource, RssSource};
use crate::models::Candidate;

// Browser UA to avoid 403s from news sites
const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

const MAX_ENTRIES_PER_FEED: usize = 20;
const TITLE_CAP: usize = 120;
const BODY_CAP: usize = 300;

const FETCH_ATTEMPTS: u32 = 3;

/// Exponential backoff between retries; None after the final attempt so
/// callers return immediately instead of sleeping for nothing.
fn retry_backoff(attempt: u32) -> Option<std::time::Duration> {
    if attempt + 1 >= FETCH_ATTEMPTS {
        None
    } else {
        Some(std::time::Duration::from_millis(500 * (2_u64.pow(attempt))))
    }
}

pub struct Fetcher {
    client: Client,
    semaphore: Arc<Semaphore>,
}

enum Source<'a> {
    Rss(&'a RssSource),
    Html(&'a HtmlSource),
}

impl Fetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .user_agent(BROWSER_UA)
            .build()
            .context("Failed to create HTTP client")?;

        let semaphore = Arc::new(Semaphore::new(10));

        Ok(Self { client, semaphore })
    }

    /// Fetch every configured source concurrently. A failing source logs and
    /// contributes no candidates; it never aborts the run.
    pub async fn fetch_all(
        &self,
        rss: &[RssSource],
        html: &[HtmlSource],
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        let sources: Vec<Source> = rss
            .iter()
            .map(Source::Rss)
            .chain(html.iter().map(Source::Html))
            .collect();

        stream::iter(sources)
            .map(|source| async move {
                match source {
                    Source::Rss(s) => match self.fetch_rss(s, now).await {
                        Ok(items) => items,
                        Err(e) => {
                            eprintln!("⚠ RSS fetch failed for {}: {}", s.name, e);
                            Vec::new()
                        }
                    },
                    Source::Html(s) => match self.fetch_html(s, now).await {
                        Ok(items) => items,
                        Err(e) => {
                            eprintln!("⚠ HTML fetch failed for {}: {}", s.name, e);
                            Vec::new()
                        }
                    },
                }
            })
            .buffer_unordered(10)
            .collect::<Vec<Vec<Candidate>>>()
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn fetch_rss(&self, source: &RssSource, now: DateTime<Utc>) -> Result<Vec<Candidate>> {
        let _permit = self.semaphore.acquire().await?;

        let response = self
            .client
            .get(&source.url)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error: {}", status);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("xml") && !content_type.contains("rss") {
            anyhow::bail!("Skipping non-XML response ({})", content_type);
        }

        let bytes = response.bytes().await.context("Failed to read feed body")?;
        parse_feed(source, &bytes, now)
    }

    async fn fetch_html(&self, source: &HtmlSource, now: DateTime<Utc>) -> Result<Vec<Candidate>> {
        let _permit = self.semaphore.acquire().await?;

        let mut last_err = None;
        for attempt in 0..FETCH_ATTEMPTS {
            match self.try_fetch_page(&source.url).await {
                Ok(html) => return parse_html_page(source, &html, now),
                Err(e) => {
                    last_err = Some(e);
                    if let Some(backoff) = retry_backoff(attempt) {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("HTML fetch failed")))
    }

    async fn try_fetch_page(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP error: {}", status);
        }

        response.text().await.context("Failed to read response body")
    }

    /// Fetch an article page and convert to plain text for summarization.
    /// Returns None for pages that are gone, gated, or too thin to summarize.
    pub async fn fetch_article_text(&self, url: &str) -> Result<Option<String>> {
        let _permit = self.semaphore.acquire().await?;

        for attempt in 0..FETCH_ATTEMPTS {
            match self.try_fetch_article(url).await {
                Ok(content) => return Ok(content),
                Err(e) => match retry_backoff(attempt) {
                    Some(backoff) => tokio::time::sleep(backoff).await,
                    None => {
                        eprintln!("Failed to fetch {}: {}", url, e);
                        return Ok(None);
                    }
                },
            }
        }

        Ok(None)
    }

    async fn try_fetch_article(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let status = response.status();
        if status == 401 || status == 403 || status == 404 {
            return Ok(None);
        }

        if !status.is_success() {
            anyhow::bail!("HTTP error: {}", status);
        }

        let html = response.text().await.context("Failed to read response body")?;

        let text = html2text::from_read(html.as_bytes(), 100);

        if text.trim().is_empty() || text.len() < 100 {
            return Ok(None);
        }

        Ok(Some(text))
    }

    pub async fn fetch_articles_parallel(
        &self,
        urls: Vec<String>,
    ) -> Vec<(String, Option<String>)> {
        stream::iter(urls)
            .map(|url| {
                let url_clone = url.clone();
                async move {
                    let content = self.fetch_article_text(&url).await.ok().flatten();
                    (url_clone, content)
                }
            })
            .buffer_unordered(10)
            .collect()
            .await
    }
}

fn parse_feed(source: &RssSource, bytes: &[u8], now: DateTime<Utc>) -> Result<Vec<Candidate>> {
    let channel = Channel::read_from(bytes).context("Failed to parse RSS feed")?;

    let mut items = Vec::new();
    for item in channel.items().iter().take(MAX_ENTRIES_PER_FEED) {
        let title = truncate_chars(item.title().unwrap_or("").trim(), TITLE_CAP);
        let link = item.link().unwrap_or("").trim().to_string();
        if title.is_empty() || link.is_empty() {
            // Malformed entry: skip it, keep the rest of the feed
            eprintln!("⚠ Skipping entry without title/link from {}", source.name);
            continue;
        }

        let body = truncate_chars(
            item.description()
                .or_else(|| item.content())
                .unwrap_or("")
                .trim(),
            BODY_CAP,
        );

        let published_at = item
            .pub_date()
            .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);

        items.push(Candidate {
            title,
            link,
            body,
            source_id: source.name.clone(),
            tags: source.tags.clone(),
            published_at,
        });
    }

    Ok(items)
}

fn parse_html_page(source: &HtmlSource, html: &str, now: DateTime<Utc>) -> Result<Vec<Candidate>> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(&source.selector)
        .map_err(|e| anyhow::anyhow!("Invalid CSS selector '{}': {}", source.selector, e))?;
    let link_selector =
        Selector::parse("a[href]").map_err(|e| anyhow::anyhow!("Selector parse: {}", e))?;
    let base = Url::parse(&source.url).ok();

    let mut items = Vec::new();
    for element in document.select(&selector) {
        let text: String = element
            .text()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let title = element
            .value()
            .attr("alt")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| text.clone());
        let title = if title.is_empty() {
            source.name.clone()
        } else {
            truncate_chars(&title, TITLE_CAP)
        };

        let link = element
            .select(&link_selector)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|href| resolve_link(base.as_ref(), href))
            .unwrap_or_else(|| source.url.clone());

        items.push(Candidate {
            title,
            link,
            body: truncate_chars(&text, BODY_CAP),
            source_id: source.name.clone(),
            tags: source.tags.clone(),
            published_at: now,
        });
    }

    Ok(items)
}

fn resolve_link(base: Option<&Url>, href: &str) -> String {
    match base {
        Some(base) => base
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string()),
        None => href.to_string(),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rss_source() -> RssSource {
        RssSource {
            name: "gov-rss".to_string(),
            url: "https://gov.example/feed.xml".to_string(),
            tags: vec!["congress".to_string()],
        }
    }

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn feed_entries_without_title_or_link_are_skipped() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Gov</title><link>https://gov.example</link><description>d</description>
<item><title>Senate Passes Budget Bill</title><link>https://gov.example/bill123</link>
  <description>The Senate voted 62-38.</description>
  <pubDate>Sat, 01 Aug 2026 09:00:00 GMT</pubDate></item>
<item><title>Orphan headline with no link</title></item>
</channel></rss>"#;

        let items = parse_feed(&rss_source(), xml.as_bytes(), test_now()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Senate Passes Budget Bill");
        assert_eq!(items[0].link, "https://gov.example/bill123");
        assert_eq!(items[0].source_id, "gov-rss");
        assert_eq!(items[0].tags, vec!["congress".to_string()]);
        assert_eq!(
            items[0].published_at,
            Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn feed_without_pub_dates_falls_back_to_now() {
        let xml = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Gov</title><link>https://gov.example</link><description>d</description>
<item><title>Hearing scheduled</title><link>https://gov.example/hearing</link></item>
</channel></rss>"#;

        let items = parse_feed(&rss_source(), xml.as_bytes(), test_now()).unwrap();
        assert_eq!(items[0].published_at, test_now());
    }

    #[test]
    fn html_page_extracts_titles_and_resolves_links() {
        let source = HtmlSource {
            name: "statehouse".to_string(),
            url: "https://news.example/politics".to_string(),
            selector: "div.headline".to_string(),
            tags: Vec::new(),
        };
        let html = r#"<html><body>
<div class="headline">Governor signs election law <a href="/story/42">more</a></div>
<div class="headline">No link here</div>
</body></html>"#;

        let items = parse_html_page(&source, html, test_now()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Governor signs election law more");
        assert_eq!(items[0].link, "https://news.example/story/42");
        // No anchor: link falls back to the page URL
        assert_eq!(items[1].link, "https://news.example/politics");
    }

    #[test]
    fn backoff_grows_then_stops_at_the_last_attempt() {
        assert_eq!(
            retry_backoff(0),
            Some(std::time::Duration::from_millis(500))
        );
        assert_eq!(
            retry_backoff(1),
            Some(std::time::Duration::from_millis(1000))
        );
        assert_eq!(retry_backoff(2), None);
    }

    #[test]
    fn long_titles_are_capped() {
        let long = "x".repeat(500);
        assert_eq!(truncate_chars(&long, TITLE_CAP).chars().count(), TITLE_CAP);
    }
}
