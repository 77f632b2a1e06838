use serenity::model::id::UserId;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{is_youtube_url, ExtractProfile, ExtractedInfo, Extractor, TitleLookup};
use crate::{audio::queue::Song, error::ResolveError};

const UNKNOWN_TITLE: &str = "Unknown title";

/// Turns a query or URL into a playable [`Song`].
///
/// The primary platform is tried first. If that fails, exactly one search on the
/// secondary provider is attempted, keyed on the primary page's title when one can
/// be looked up cheaply.
pub struct SongResolver {
    extractor: Arc<dyn Extractor>,
    titles: Arc<dyn TitleLookup>,
    primary: ExtractProfile,
    secondary: ExtractProfile,
}

impl SongResolver {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        titles: Arc<dyn TitleLookup>,
        primary: ExtractProfile,
        secondary: ExtractProfile,
    ) -> Self {
        Self {
            extractor,
            titles,
            primary,
            secondary,
        }
    }

    pub async fn resolve(&self, query: &str, requested_by: UserId) -> Result<Song, ResolveError> {
        let info = match self.extractor.extract(query, &self.primary).await {
            Ok(info) => info,
            Err(e) => {
                let primary_error = ResolveError::classify(&format!("{:#}", e));
                warn!("⚠️ Extracción principal falló para '{}': {:#}", query, e);

                let fallback = self.fallback_query(query).await;
                match self.extractor.extract(&fallback, &self.secondary).await {
                    Ok(info) => {
                        info!("🔁 Usando proveedor secundario para '{}'", query);
                        info
                    }
                    Err(e) => {
                        debug!("Proveedor secundario también falló ({}): {:#}", fallback, e);
                        return Err(primary_error);
                    }
                }
            }
        };

        into_song(info, query, requested_by)
    }

    async fn fallback_query(&self, query: &str) -> String {
        let search = if is_youtube_url(query) {
            self.titles
                .title_for(query)
                .await
                .unwrap_or_else(|| query.to_string())
        } else {
            query.to_string()
        };
        format!("scsearch1:{}", search)
    }
}

fn into_song(info: ExtractedInfo, query: &str, requested_by: UserId) -> Result<Song, ResolveError> {
    let stream_url = info
        .stream_url
        .filter(|u| !u.is_empty())
        .ok_or(ResolveError::NoStreamFound)?;

    Ok(Song {
        title: info
            .title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        stream_url,
        page_url: info.page_url.unwrap_or_else(|| query.to_string()),
        requested_by,
    })
}
