use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{is_youtube_url, TitleLookup};

const OEMBED_ENDPOINT: &str = "https://www.youtube.com/oembed";

/// Title lookup through YouTube's oEmbed endpoint. Never fails, only returns nothing.
pub struct OEmbedClient {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: Option<String>,
}

impl OEmbedClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(8))
            .user_agent("Mozilla/5.0")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }
}

fn endpoint(url: &str) -> String {
    format!("{}?url={}&format=json", OEMBED_ENDPOINT, urlencoding::encode(url))
}

#[async_trait]
impl TitleLookup for OEmbedClient {
    async fn title_for(&self, url: &str) -> Option<String> {
        if !is_youtube_url(url) {
            return None;
        }

        let response = match self.http.get(endpoint(url)).send().await {
            Ok(r) => r.error_for_status().ok()?,
            Err(e) => {
                debug!("oEmbed lookup failed for {}: {}", url, e);
                return None;
            }
        };

        let payload: OEmbedResponse = response.json().await.ok()?;
        payload
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_encodes_the_page_url() {
        assert_eq!(
            endpoint("https://www.youtube.com/watch?v=abc&t=1"),
            "https://www.youtube.com/oembed?url=https%3A%2F%2Fwww.youtube.com%2Fwatch%3Fv%3Dabc%26t%3D1&format=json"
        );
    }

    #[tokio::test]
    async fn non_youtube_urls_are_not_looked_up() {
        assert_eq!(OEmbedClient::new().title_for("https://example.com/a.mp3").await, None);
    }
}
