//! Command core, independent of the interaction transport.
//!
//! Every slash command maps to one [`Jukebox`] method taking a [`CommandRequest`]
//! and producing a [`Reply`] or a [`CommandError`] for the adapter to render.

use futures::{stream, StreamExt};
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    audio::{
        idle::IdleScheduler,
        player::{PlaybackDriver, PlaybackEvents},
        queue::Song,
        state::TenantRegistry,
        voice::{ReconnectPolicy, VoiceConnector, VoiceGateway, VoiceSettings},
    },
    config::Config,
    error::CommandError,
    sources::{
        catalog::is_catalog_link, CatalogApi, CatalogExpander, ExtractProfile, OEmbedClient,
        SongResolver, SpotifyClient, YtDlpExtractor,
    },
};

/// Who asked, from where.
#[derive(Debug, Clone, Copy)]
pub struct CommandRequest {
    pub guild_id: Option<GuildId>,
    pub user_id: UserId,
    /// The requester's current voice channel, if any.
    pub voice_channel: Option<ChannelId>,
}

impl CommandRequest {
    fn guild(&self) -> Result<GuildId, CommandError> {
        self.guild_id.ok_or(CommandError::NotInServer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    pub ephemeral: bool,
}

impl Reply {
    pub fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
        }
    }

    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JukeboxSettings {
    pub idle_timeout: std::time::Duration,
    pub voice: VoiceSettings,
    pub reconnect: ReconnectPolicy,
    pub resolve_concurrency: usize,
}

impl JukeboxSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            idle_timeout: config.idle_timeout,
            voice: VoiceSettings::default(),
            reconnect: ReconnectPolicy::new(config.reconnect_delay_max),
            resolve_concurrency: config.resolve_concurrency.max(1),
        }
    }
}

pub struct Jukebox {
    registry: Arc<TenantRegistry>,
    connector: VoiceConnector,
    driver: Arc<PlaybackDriver>,
    resolver: SongResolver,
    catalog: CatalogExpander,
    resolve_concurrency: usize,
}

impl Jukebox {
    pub fn new(
        gateway: Arc<dyn VoiceGateway>,
        resolver: SongResolver,
        catalog: CatalogExpander,
        settings: JukeboxSettings,
    ) -> (Self, PlaybackEvents) {
        let registry = Arc::new(TenantRegistry::new());
        let idle = IdleScheduler::new(settings.idle_timeout, gateway.clone());
        let (driver, events) =
            PlaybackDriver::new(registry.clone(), gateway.clone(), idle, settings.reconnect);

        let jukebox = Self {
            registry,
            connector: VoiceConnector::new(gateway, settings.voice),
            driver: Arc::new(driver),
            resolver,
            catalog,
            resolve_concurrency: settings.resolve_concurrency,
        };
        (jukebox, events)
    }

    /// Production wiring: yt-dlp, oEmbed and (when configured) Spotify.
    pub fn from_config(config: &Config, gateway: Arc<dyn VoiceGateway>) -> (Self, PlaybackEvents) {
        let resolver = SongResolver::new(
            Arc::new(YtDlpExtractor::new(config.ytdlp_path.clone())),
            Arc::new(OEmbedClient::new()),
            ExtractProfile::youtube(
                config.ytdlp_player_clients.clone(),
                config.ytdlp_cookie_file.clone(),
            ),
            ExtractProfile::soundcloud(),
        );

        let api = match (&config.spotify_client_id, &config.spotify_client_secret) {
            (Some(id), Some(secret)) => {
                Some(Arc::new(SpotifyClient::new(id.clone(), secret.clone())) as Arc<dyn CatalogApi>)
            }
            _ => None,
        };
        let catalog = CatalogExpander::new(api, config.max_catalog_tracks);

        Self::new(gateway, resolver, catalog, JukeboxSettings::from_config(config))
    }

    pub fn driver(&self) -> Arc<PlaybackDriver> {
        self.driver.clone()
    }

    pub async fn join(&self, request: &CommandRequest) -> Result<Reply, CommandError> {
        let guild_id = request.guild()?;
        let tenant = self.registry.get_or_create(guild_id);

        self.connector
            .ensure_connected(guild_id, &tenant, request.voice_channel)
            .await?;
        // Arms the idle timer when nothing is queued, resumes the queue otherwise.
        self.driver.advance(guild_id).await;

        Ok(Reply::ephemeral("Joined your voice channel."))
    }

    pub async fn play(&self, request: &CommandRequest, query: &str) -> Result<Reply, CommandError> {
        let guild_id = request.guild()?;
        let tenant = self.registry.get_or_create(guild_id);

        self.connector
            .ensure_connected(guild_id, &tenant, request.voice_channel)
            .await?;
        self.driver.hold_active(guild_id).await;

        let result = if is_catalog_link(query) {
            self.play_catalog(guild_id, request.user_id, query).await
        } else {
            self.play_single(guild_id, request.user_id, query).await
        };

        if result.is_err() {
            // Nothing was queued: re-arm the idle timer unless something else plays.
            self.driver.advance(guild_id).await;
        }
        result
    }

    async fn play_single(
        &self,
        guild_id: GuildId,
        requested_by: UserId,
        query: &str,
    ) -> Result<Reply, CommandError> {
        let song = self.resolver.resolve(query, requested_by).await?;
        let now_playing = self.driver.enqueue(guild_id, vec![song.clone()]).await;

        if now_playing.as_ref() == Some(&song) {
            Ok(Reply::public(format!("Now playing: **{}**\n{}", song.title, song.page_url)))
        } else {
            Ok(Reply::public(format!("Queued: **{}**", song.title)))
        }
    }

    async fn play_catalog(
        &self,
        guild_id: GuildId,
        requested_by: UserId,
        url: &str,
    ) -> Result<Reply, CommandError> {
        let queries = self.catalog.expand(url).await?;
        let requested = queries.len();

        let pending: Vec<_> = queries
            .iter()
            .map(|query| async move { (query, self.resolver.resolve(query, requested_by).await) })
            .collect();
        let results: Vec<_> = stream::iter(pending)
            .buffered(self.resolve_concurrency)
            .collect()
            .await;

        let mut songs: Vec<Song> = Vec::with_capacity(requested);
        for (query, result) in results {
            match result {
                Ok(song) => songs.push(song),
                Err(e) => warn!("⚠️ No se pudo resolver '{}' de Spotify: {}", query, e),
            }
        }

        let failed = requested - songs.len();
        let Some(first) = songs.first().cloned() else {
            return Err(CommandError::NothingResolved);
        };
        let added = songs.len();

        info!("🎧 {} de {} pistas de Spotify resueltas en guild {}", added, requested, guild_id);
        let now_playing = self.driver.enqueue(guild_id, songs).await;

        let skipped = if failed > 0 {
            format!(" Skipped {} track(s).", failed)
        } else {
            String::new()
        };

        if now_playing.as_ref() == Some(&first) {
            return Ok(Reply::public(format!(
                "Now playing from Spotify: **{}**\nQueued {} more track(s).{}",
                first.title,
                added - 1,
                skipped
            )));
        }

        let limited = if requested >= self.catalog.max_tracks() {
            format!(" (Limited to first {} tracks.)", self.catalog.max_tracks())
        } else {
            String::new()
        };
        Ok(Reply::public(format!(
            "Queued {} track(s) from Spotify.{}{}",
            added, skipped, limited
        )))
    }

    pub async fn skip(&self, request: &CommandRequest) -> Result<Reply, CommandError> {
        self.driver.skip(request.guild()?).await?;
        Ok(Reply::public("Skipped."))
    }

    pub async fn stop(&self, request: &CommandRequest) -> Result<Reply, CommandError> {
        self.driver.stop(request.guild()?).await;
        Ok(Reply::public("Stopped playback and cleared the queue."))
    }

    pub async fn queue(&self, request: &CommandRequest) -> Result<Reply, CommandError> {
        let info = self.driver.snapshot(request.guild()?).await;
        Ok(Reply::ephemeral(info.render()))
    }

    pub async fn leave(&self, request: &CommandRequest) -> Result<Reply, CommandError> {
        self.driver.leave(request.guild()?).await?;
        Ok(Reply::public("Disconnected and cleared queue."))
    }

    /// The bot was removed from voice by someone else.
    pub async fn voice_lost(&self, guild_id: GuildId) {
        self.driver.forget_connection(guild_id).await;
    }
}
