//! Yahoo Finance chart provider.
//!
//! API: `https://query1.finance.yahoo.com/v8/finance/chart/{ticker}`
//! No auth. Supplies the price snapshot (current price + last five closes)
//! and derived fundamentals: 30-day annualised volatility and beta against
//! SPY over the same window. The chart endpoint carries no earnings data,
//! so `pe_ratio` is always `None` here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{FundamentalsProvider, PriceProvider, ProviderResult};
use crate::signals::price::{daily_returns, realized_volatility};
use crate::types::{Fundamentals, PriceSnapshot};

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const BENCHMARK: &str = "SPY";
const VOLATILITY_WINDOW: usize = 31;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Daily closes with gaps dropped, rounded to the cent.
#[derive(Debug, Clone, PartialEq)]
struct Series {
    current: Option<Decimal>,
    closes: Vec<Decimal>,
}

fn parse_chart(body: &str) -> Result<Series> {
    let env: ChartEnvelope = serde_json::from_str(body).context("Malformed chart response")?;
    if let Some(err) = env.chart.error {
        anyhow::bail!("Chart API error: {}", err.description);
    }
    let result = env
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .context("Chart response has no result")?;
    let closes: Vec<Decimal> = result
        .indicators
        .quote
        .into_iter()
        .next()
        .map(|q| q.close)
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .filter_map(Decimal::from_f64)
        .map(|d| d.round_dp(2))
        .collect();
    let current = result
        .meta
        .regular_market_price
        .and_then(Decimal::from_f64)
        .map(|d| d.round_dp(2));
    Ok(Series { current, closes })
}

/// Beta of `asset` against `benchmark` over their common trailing window.
fn beta(asset: &[Decimal], benchmark: &[Decimal]) -> Option<f64> {
    let a = daily_returns(asset);
    let b = daily_returns(benchmark);
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let (a, b) = (&a[a.len() - n..], &b[b.len() - n..]);
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let cov: f64 = a.iter().zip(b).map(|(x, y)| (x - mean_a) * (y - mean_b)).sum();
    let var: f64 = b.iter().map(|y| (y - mean_b).powi(2)).sum();
    (var > 0.0).then(|| cov / var)
}

fn tail(closes: &[Decimal], n: usize) -> &[Decimal] {
    &closes[closes.len().saturating_sub(n)..]
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct YahooChartClient {
    http: Client,
}

impl YahooChartClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("Mozilla/5.0 (compatible; mayhem/0.1.0)")
            .build()
            .context("Failed to build chart HTTP client")?;
        Ok(Self { http })
    }

    async fn fetch_series(&self, ticker: &str, range: &str) -> Result<Series> {
        let url = format!(
            "{CHART_URL}/{}?range={range}&interval=1d",
            urlencoding::encode(ticker)
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Chart request failed for {ticker}"))?;
        let status = resp.status();
        let body = resp.text().await.context("Failed to read chart response")?;
        if !status.is_success() {
            anyhow::bail!("Chart API returned {status} for {ticker}");
        }
        let series = parse_chart(&body)?;
        debug!(ticker, closes = series.closes.len(), "Fetched price series");
        Ok(series)
    }
}

#[async_trait]
impl PriceProvider for YahooChartClient {
    async fn snapshot(&self, ticker: &str) -> ProviderResult<PriceSnapshot> {
        let series = self.fetch_series(ticker, "1mo").await?;
        let last_closes = tail(&series.closes, 5).to_vec();
        let current_price = series
            .current
            .or_else(|| last_closes.last().copied())
            .ok_or_else(|| anyhow::anyhow!("No price data for {ticker}"))?;
        Ok(PriceSnapshot {
            current_price,
            last_closes,
        })
    }
}

#[async_trait]
impl FundamentalsProvider for YahooChartClient {
    async fn fundamentals(&self, ticker: &str) -> ProviderResult<Fundamentals> {
        let (asset, bench) = tokio::join!(
            self.fetch_series(ticker, "3mo"),
            self.fetch_series(BENCHMARK, "3mo")
        );
        let asset = asset?;
        let window = tail(&asset.closes, VOLATILITY_WINDOW);
        let beta = bench
            .ok()
            .and_then(|b| beta(window, tail(&b.closes, VOLATILITY_WINDOW)));
        Ok(Fundamentals {
            volatility_30d: realized_volatility(window),
            beta,
            pe_ratio: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "AAPL", "regularMarketPrice": 191.456},
                "timestamp": [1, 2, 3, 4, 5, 6],
                "indicators": {"quote": [{"close": [185.0, 186.5, null, 188.25, 190.0, 191.45]}]}
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_chart_skips_gaps() {
        let s = parse_chart(SAMPLE).unwrap();
        assert_eq!(s.closes.len(), 5);
        assert_eq!(s.closes[2], dec!(188.25));
        assert_eq!(s.current, Some(dec!(191.46)));
    }

    #[test]
    fn test_parse_chart_error() {
        let body = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let err = parse_chart(body).unwrap_err();
        assert!(err.to_string().contains("delisted"));
    }

    #[test]
    fn test_beta_of_scaled_series() {
        let bench = [dec!(100), dec!(101), dec!(99), dec!(102), dec!(100)];
        // Identical returns give beta 1.
        let b = beta(&bench, &bench).unwrap();
        assert!((b - 1.0).abs() < 1e-9);
        let flat = [dec!(100), dec!(100), dec!(100)];
        assert!(beta(&bench, &flat).is_none());
    }

    #[test]
    fn test_tail() {
        let closes = [dec!(1), dec!(2), dec!(3)];
        assert_eq!(tail(&closes, 5), &closes[..]);
        assert_eq!(tail(&closes, 2), &[dec!(2), dec!(3)]);
    }
}
