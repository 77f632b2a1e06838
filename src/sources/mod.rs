//! # Sources
//!
//! Turning user queries into playable songs.
//!
//! - [`resolver`]: primary extraction with a single secondary-provider fallback
//! - [`ytdlp`]: the yt-dlp backed [`Extractor`]
//! - [`oembed`]: best-effort title lookup for primary-platform URLs
//! - [`catalog`] / [`spotify`]: expansion of catalog links into search queries

pub mod catalog;
pub mod oembed;
pub mod resolver;
pub mod spotify;
pub mod ytdlp;

use async_trait::async_trait;
use std::path::PathBuf;

pub use catalog::{CatalogApi, CatalogExpander};
pub use oembed::OEmbedClient;
pub use resolver::SongResolver;
pub use spotify::SpotifyClient;
pub use ytdlp::YtDlpExtractor;

/// Options for one extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractProfile {
    /// Search prefix applied to non-URL queries (`ytsearch`, `scsearch`, ...).
    pub default_search: String,
    /// Alternate client identities tried by the extractor.
    pub player_clients: Vec<String>,
    pub cookie_file: Option<PathBuf>,
}

impl ExtractProfile {
    /// Primary platform profile.
    pub fn youtube(player_clients: Vec<String>, cookie_file: Option<PathBuf>) -> Self {
        Self {
            default_search: "ytsearch".to_string(),
            player_clients,
            cookie_file,
        }
    }

    /// Secondary provider profile, plain single-result search.
    pub fn soundcloud() -> Self {
        Self {
            default_search: "scsearch".to_string(),
            player_clients: Vec::new(),
            cookie_file: None,
        }
    }
}

/// What an extractor found for a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedInfo {
    pub title: Option<String>,
    pub stream_url: Option<String>,
    pub page_url: Option<String>,
}

/// Media resolution library.
///
/// Errors carry the library's raw message; the resolver classifies them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, query: &str, profile: &ExtractProfile) -> anyhow::Result<ExtractedInfo>;
}

/// Lightweight title lookup for a media page URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TitleLookup: Send + Sync {
    async fn title_for(&self, url: &str) -> Option<String>;
}

/// Whether the URL points at the primary platform (YouTube).
pub fn is_youtube_url(query: &str) -> bool {
    let Ok(parsed) = url::Url::parse(query) else {
        return false;
    };

    matches!(
        parsed.host_str(),
        Some("www.youtube.com" | "youtube.com" | "m.youtube.com" | "music.youtube.com" | "youtu.be")
    )
}
