use std::time::{Duration, Instant};

use serde_json::Value;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};
use tracing::{info, warn};

use crate::error::{BuildError, Result};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

/// Raw page markup as returned by spider.cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub html: String,
    pub status: Option<i64>,
}

/// Fetch one URL as raw HTML, backing off on rate limits and 5xx answers.
pub async fn fetch_page(api_key: &str, url: &str) -> Result<FetchedPage> {
    let spider = Spider::new(Some(api_key.to_string()))
        .map_err(|e| BuildError::Fetch(format!("failed to create Spider client: {}", e)))?;

    for attempt in 0..MAX_RETRIES {
        match fetch_once(&spider, url).await {
            Err(BuildError::Fetch(e)) if should_retry(&e) => {
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    "Rate limited on {} (attempt {}/{}), backing off {:.1}s",
                    url,
                    attempt + 1,
                    MAX_RETRIES,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }

    fetch_once(&spider, url).await
}

async fn fetch_once(spider: &Spider, url: &str) -> Result<FetchedPage> {
    let params = RequestParams {
        return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
        ..Default::default()
    };

    let start = Instant::now();
    let response = spider
        .scrape_url(url, Some(params), "application/json")
        .await
        .map_err(|e| BuildError::Fetch(e.to_string()))?;
    let latency_ms = start.elapsed().as_millis();

    let (html, status) = extract_content(response)?;
    info!(url, bytes = html.len(), status, "fetched page in {}ms", latency_ms);
    Ok(FetchedPage { html, status })
}

/// Pull `content` and `status` out of the first entry of a spider response.
/// The response may arrive as a JSON string that itself holds the array.
fn extract_content(response: Value) -> Result<(String, Option<i64>)> {
    let parsed: Value = match response.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
        None => response,
    };

    let first = parsed.as_array().and_then(|arr| arr.first());
    if let Some(error) = first.and_then(|obj| obj.get("error")).and_then(Value::as_str) {
        return Err(BuildError::Fetch(error.to_string()));
    }
    let status = first.and_then(|obj| obj.get("status")).and_then(Value::as_i64);
    let content = first
        .and_then(|obj| obj.get("content"))
        .and_then(Value::as_str)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| BuildError::Fetch("no content in spider response".into()))?;

    Ok((content.to_string(), status))
}

fn should_retry(error: &str) -> bool {
    let error = error.to_ascii_lowercase();
    error.contains("429")
        || error.contains("rate")
        || error.contains("500")
        || error.contains("502")
        || error.contains("503")
}
