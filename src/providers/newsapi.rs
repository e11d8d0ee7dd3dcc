//! NewsAPI headline provider.
//!
//! API: `https://newsapi.org/v2/everything`
//! Auth: API key via `apiKey` query param. Free tier: 100 req/day.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{NewsProvider, ProviderResult};
use crate::types::NewsItem;

const NEWSAPI_URL: &str = "https://newsapi.org/v2/everything";
const PAGE_SIZE: u32 = 10;

// ---------------------------------------------------------------------------
// NewsAPI response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsArticle>,
}

#[derive(Debug, Deserialize)]
struct NewsArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    source: Option<NewsSource>,
}

#[derive(Debug, Deserialize)]
struct NewsSource {
    #[serde(default)]
    name: Option<String>,
}

/// Keep titled articles, dropping NewsAPI's "[Removed]" placeholders and
/// duplicate titles.
fn to_items(response: NewsApiResponse) -> Vec<NewsItem> {
    let mut items: Vec<NewsItem> = Vec::new();
    for article in response.articles {
        let Some(title) = article.title.map(|t| t.trim().to_string()) else {
            continue;
        };
        if title.is_empty() || title == "[Removed]" || items.iter().any(|i| i.title == title) {
            continue;
        }
        let source = article
            .source
            .and_then(|s| s.name)
            .unwrap_or_else(|| "unknown".to_string());
        items.push(NewsItem { title, source });
    }
    items
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct NewsApiClient {
    http: Client,
    api_key: Secret<String>,
}

impl NewsApiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("mayhem/0.1.0")
            .build()
            .context("Failed to build news HTTP client")?;
        Ok(Self {
            http,
            api_key: Secret::new(api_key),
        })
    }

    fn build_url(&self, ticker: &str, days: u32) -> String {
        let from = (Utc::now() - ChronoDuration::days(days.max(1) as i64)).format("%Y-%m-%d");
        let query = format!("\"{ticker}\" stock");
        format!(
            "{NEWSAPI_URL}?q={}&from={from}&language=en&sortBy=publishedAt&pageSize={PAGE_SIZE}&apiKey={}",
            urlencoding::encode(&query),
            urlencoding::encode(self.api_key.expose_secret())
        )
    }

    async fn fetch_articles(&self, ticker: &str, days: u32) -> Result<Vec<NewsItem>> {
        let url = self.build_url(ticker, days);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("NewsAPI request failed")?;
        let status = resp.status();
        let body: NewsApiResponse = resp.json().await.context("Failed to parse NewsAPI response")?;
        if !status.is_success() || body.status != "ok" {
            anyhow::bail!(
                "NewsAPI error {status}: {}",
                body.message.unwrap_or_else(|| body.status.clone())
            );
        }
        let items = to_items(body);
        debug!(ticker, count = items.len(), "Fetched headlines");
        Ok(items)
    }
}

#[async_trait]
impl NewsProvider for NewsApiClient {
    async fn fetch(&self, ticker: &str, days: u32) -> ProviderResult<Vec<NewsItem>> {
        Ok(self.fetch_articles(ticker, days).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
