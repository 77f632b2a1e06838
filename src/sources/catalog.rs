//! Catalog link expansion.
//!
//! A track, album or playlist link becomes an ordered list of free-text search
//! queries ("title artist, artist") that the resolver can look up.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

use crate::error::CatalogError;

const ALBUM_PAGE_SIZE: u32 = 50;
const PLAYLIST_PAGE_SIZE: u32 = 100;

static CATALOG_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"open\.spotify\.com/(?:intl-[a-z]+/)?(track|album|playlist)/([A-Za-z0-9]+)")
        .expect("catalog link pattern")
});

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogArtist {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogTrack {
    pub name: Option<String>,
    #[serde(default)]
    pub artists: Option<Vec<CatalogArtist>>,
}

impl CatalogTrack {
    /// `"<title> <artist>, <artist>"`, or nothing when the entry has no usable title.
    pub fn to_query(&self) -> Option<String> {
        let name = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())?;
        let artists = self
            .artists
            .iter()
            .flatten()
            .filter_map(|a| a.name.as_deref())
            .filter(|n| !n.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        Some(format!("{} {}", name, artists).trim().to_string())
    }
}

/// One page of album or playlist entries. `None` items are removed/local tracks.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub items: Vec<Option<CatalogTrack>>,
    pub has_next: bool,
}

/// Music catalog web API.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn track(&self, id: &str) -> anyhow::Result<Option<CatalogTrack>>;

    async fn album_tracks(&self, id: &str, limit: u32, offset: u32) -> anyhow::Result<CatalogPage>;

    async fn playlist_tracks(&self, id: &str, limit: u32, offset: u32) -> anyhow::Result<CatalogPage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Track,
    Album,
    Playlist,
}

/// Cheap check used to route `/play` input; full validation happens in [`parse_link`].
pub fn is_catalog_link(query: &str) -> bool {
    query.to_lowercase().contains("open.spotify.com/")
}

pub fn parse_link(url: &str) -> Result<(CatalogKind, String), CatalogError> {
    let captures = CATALOG_LINK.captures(url).ok_or(CatalogError::UnsupportedLink)?;
    let kind = match &captures[1] {
        "track" => CatalogKind::Track,
        "album" => CatalogKind::Album,
        _ => CatalogKind::Playlist,
    };
    Ok((kind, captures[2].to_string()))
}

pub struct CatalogExpander {
    api: Option<Arc<dyn CatalogApi>>,
    max_tracks: usize,
}

impl CatalogExpander {
    /// `api` is `None` when no credentials are configured; the error surfaces on first use.
    pub fn new(api: Option<Arc<dyn CatalogApi>>, max_tracks: usize) -> Self {
        Self { api, max_tracks }
    }

    pub fn max_tracks(&self) -> usize {
        self.max_tracks
    }

    pub async fn expand(&self, url: &str) -> Result<Vec<String>, CatalogError> {
        let api = self.api.as_ref().ok_or(CatalogError::CatalogNotConfigured)?;
        let (kind, id) = parse_link(url)?;

        let queries = match kind {
            CatalogKind::Track => api
                .track(&id)
                .await?
                .and_then(|t| t.to_query())
                .into_iter()
                .collect(),
            CatalogKind::Album | CatalogKind::Playlist => self.paginate(api.as_ref(), kind, &id).await?,
        };

        if queries.is_empty() {
            return Err(CatalogError::NoPlayableTracks);
        }

        info!("🎧 Enlace de Spotify ({:?} {}) expandido a {} consultas", kind, id, queries.len());
        Ok(queries)
    }

    async fn paginate(
        &self,
        api: &dyn CatalogApi,
        kind: CatalogKind,
        id: &str,
    ) -> Result<Vec<String>, CatalogError> {
        let page_size = match kind {
            CatalogKind::Album => ALBUM_PAGE_SIZE,
            _ => PLAYLIST_PAGE_SIZE,
        };

        let mut queries = Vec::new();
        let mut offset = 0;

        while queries.len() < self.max_tracks {
            let page = match kind {
                CatalogKind::Album => api.album_tracks(id, page_size, offset).await?,
                _ => api.playlist_tracks(id, page_size, offset).await?,
            };
            debug!("Página de {:?} {} offset {}: {} entradas", kind, id, offset, page.items.len());

            if page.items.is_empty() {
                break;
            }

            for track in page.items.iter().flatten() {
                if let Some(query) = track.to_query() {
                    queries.push(query);
                    if queries.len() >= self.max_tracks {
                        break;
                    }
                }
            }

            if !page.has_next {
                break;
            }
            offset += page_size;
        }

        Ok(queries)
    }
}
