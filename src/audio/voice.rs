//! Voice connection management.
//!
//! [`VoiceGateway`] and [`VoiceLink`] are the boundary to the chat platform's voice
//! subsystem and the transcoder streaming into it. [`VoiceConnector`] owns the
//! connect / reconnect / move policy for one guild at a time.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use crate::{audio::state::TenantState, error::VoiceError};

/// Invoked exactly once when a stream ends, with the transcoder's error if any.
pub type CompletionCallback = Box<dyn FnOnce(Option<String>) + Send + 'static>;

/// What the transcoder is doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl StreamStatus {
    /// Playing or paused both count as an ongoing stream.
    pub fn is_active(self) -> bool {
        matches!(self, StreamStatus::Playing | StreamStatus::Paused)
    }
}

/// How the transcoder should behave when the upstream stream drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub reconnect: bool,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_delay: Duration) -> Self {
        Self {
            reconnect: true,
            max_delay,
        }
    }

    /// ffmpeg input options implementing the policy.
    pub fn ffmpeg_input_args(&self) -> Vec<String> {
        if !self.reconnect {
            return Vec::new();
        }
        vec![
            "-reconnect".into(),
            "1".into(),
            "-reconnect_streamed".into(),
            "1".into(),
            "-reconnect_delay_max".into(),
            self.max_delay.as_secs().to_string(),
        ]
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Stream attachment failed locally (e.g. the transcoder could not be spawned).
#[derive(Debug, thiserror::Error)]
#[error("failed to attach stream: {0}")]
pub struct AttachError(pub String);

/// Voice subsystem of the gateway.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    /// Current connection for the guild, if any.
    async fn link(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceLink>>;

    /// Opens a new connection. Callers apply their own timeout.
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> anyhow::Result<Arc<dyn VoiceLink>>;
}

/// One guild's voice connection, including the transcoder streaming into it.
#[async_trait]
pub trait VoiceLink: Send + Sync {
    async fn channel(&self) -> Option<ChannelId>;

    async fn is_connected(&self) -> bool;

    async fn move_to(&self, channel_id: ChannelId) -> anyhow::Result<()>;

    async fn disconnect(&self, force: bool);

    async fn status(&self) -> StreamStatus;

    /// Starts streaming `stream_url`; `on_complete` fires once when it ends.
    async fn start_streaming(
        &self,
        stream_url: &str,
        policy: &ReconnectPolicy,
        on_complete: CompletionCallback,
    ) -> Result<(), AttachError>;

    /// Force-terminates the current stream. Its completion callback still fires.
    async fn stop(&self);
}

/// Retry policy for voice connects.
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub attempts: u32,
    pub backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(1500),
            attempt_timeout: Duration::from_secs(20),
        }
    }
}

pub struct VoiceConnector {
    gateway: Arc<dyn VoiceGateway>,
    settings: VoiceSettings,
}

impl VoiceConnector {
    pub fn new(gateway: Arc<dyn VoiceGateway>, settings: VoiceSettings) -> Self {
        Self { gateway, settings }
    }

    /// Makes sure the bot sits in `requested` for this guild.
    ///
    /// Never interrupts an active stream to satisfy a join in another channel.
    pub async fn ensure_connected(
        &self,
        guild_id: GuildId,
        tenant: &TenantState,
        requested: Option<ChannelId>,
    ) -> Result<Arc<dyn VoiceLink>, VoiceError> {
        let channel_id = requested.ok_or(VoiceError::NoVoiceChannel)?;
        let _guard = tenant.connection.lock().await;

        let Some(link) = self.gateway.link(guild_id).await else {
            return self.connect_with_retry(guild_id, channel_id).await;
        };

        if !link.is_connected().await {
            warn!("🔌 Conexión de voz caída en guild {}, reconectando", guild_id);
            link.disconnect(true).await;
            return self.connect_with_retry(guild_id, channel_id).await;
        }

        match link.channel().await {
            Some(current) if current == channel_id => {}
            current => {
                if let Some(current) = current {
                    if link.status().await.is_active() {
                        return Err(VoiceError::ChannelConflict { channel: current });
                    }
                }
                info!("↪️ Moviendo a canal {} en guild {}", channel_id, guild_id);
                link.move_to(channel_id)
                    .await
                    .map_err(|e| VoiceError::ConnectionFailed(e.to_string()))?;
            }
        }

        Ok(link)
    }

    async fn connect_with_retry(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceLink>, VoiceError> {
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.settings.attempts {
            info!("🔄 Intento {} de conexión de voz en guild {}", attempt, guild_id);

            match tokio::time::timeout(
                self.settings.attempt_timeout,
                self.gateway.connect(guild_id, channel_id),
            )
            .await
            {
                Ok(Ok(link)) => {
                    if link.is_connected().await {
                        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
                        return Ok(link);
                    }
                    last_error = "I could not stay connected to voice.".to_string();
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "timed out after {}",
                        humantime::format_duration(self.settings.attempt_timeout)
                    )
                }
            }

            warn!("⚠️ Intento {} falló en guild {}: {}", attempt, guild_id, last_error);
            if attempt < self.settings.attempts {
                tokio::time::sleep(self.settings.backoff).await;
            }
        }

        Err(VoiceError::ConnectionFailed(last_error))
    }
}
