use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::catalog::{CatalogApi, CatalogPage, CatalogTrack};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";
const PLAYLIST_FIELDS: &str = "items(track(name,artists(name))),next";

/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Spotify Web API client using the client-credentials flow.
pub struct SpotifyClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<AccessToken>>,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct AlbumTracksPage {
    #[serde(default)]
    items: Vec<Option<CatalogTrack>>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct PlaylistItem {
    track: Option<CatalogTrack>,
}

#[derive(Deserialize)]
struct PlaylistTracksPage {
    #[serde(default)]
    items: Vec<Option<PlaylistItem>>,
    next: Option<String>,
}

impl From<AlbumTracksPage> for CatalogPage {
    fn from(page: AlbumTracksPage) -> Self {
        Self {
            items: page.items,
            has_next: page.next.is_some(),
        }
    }
}

impl From<PlaylistTracksPage> for CatalogPage {
    fn from(page: PlaylistTracksPage) -> Self {
        Self {
            items: page.items.into_iter().map(|i| i.and_then(|i| i.track)).collect(),
            has_next: page.next.is_some(),
        }
    }
}

fn basic_auth(client_id: &str, client_secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", client_id, client_secret)))
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            client_id,
            client_secret,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        debug!("🔑 Solicitando token de Spotify");
        let response: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .header("Authorization", basic_auth(&self.client_id, &self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context("Spotify token request failed")?
            .error_for_status()
            .context("Spotify rejected the client credentials")?
            .json()
            .await
            .context("Invalid Spotify token response")?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(AccessToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(response.access_token)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let token = self.access_token().await?;
        let url = format!("{}{}", API_BASE, path);

        self.http
            .get(&url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?
            .error_for_status()
            .with_context(|| format!("GET {} returned an error status", path))?
            .json()
            .await
            .with_context(|| format!("Invalid response from {}", path))
    }
}

#[async_trait]
impl CatalogApi for SpotifyClient {
    async fn track(&self, id: &str) -> Result<Option<CatalogTrack>> {
        self.get_json(&format!("/tracks/{}", id), &[]).await
    }

    async fn album_tracks(&self, id: &str, limit: u32, offset: u32) -> Result<CatalogPage> {
        let page: AlbumTracksPage = self
            .get_json(
                &format!("/albums/{}/tracks", id),
                &[("limit", limit.to_string()), ("offset", offset.to_string())],
            )
            .await?;
        Ok(page.into())
    }

    async fn playlist_tracks(&self, id: &str, limit: u32, offset: u32) -> Result<CatalogPage> {
        let page: PlaylistTracksPage = self
            .get_json(
                &format!("/playlists/{}/tracks", id),
                &[
                    ("limit", limit.to_string()),
                    ("offset", offset.to_string()),
                    ("fields", PLAYLIST_FIELDS.to_string()),
                ],
            )
            .await?;
        Ok(page.into())
    }
}
