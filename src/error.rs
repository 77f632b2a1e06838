//! Error types shared by the playback core and the command layer.
//!
//! Display strings double as the user-facing replies, so keep them short and
//! phrased for the person who ran the command.

use serenity::model::id::ChannelId;
use thiserror::Error;

/// Failures of the voice connection manager.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Join a voice channel first.")]
    NoVoiceChannel,

    #[error("Voice connection failed: {0}")]
    ConnectionFailed(String),

    #[error("I'm already active in <#{channel}>. Join that channel or use /leave first.")]
    ChannelConflict { channel: ChannelId },
}

/// Failures of the song resolver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("This video is DRM-protected and cannot be played.")]
    DrmProtected,

    #[error("YouTube blocked this request. Try another video.")]
    PlatformBlocked,

    #[error("Failed to fetch audio from YouTube.")]
    ExtractionFailed(String),

    #[error("Could not get audio stream URL.")]
    NoStreamFound,
}

impl ResolveError {
    /// Maps a raw extraction failure message onto the resolver taxonomy.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("drm") {
            Self::DrmProtected
        } else if lower.contains("sign in to confirm") {
            Self::PlatformBlocked
        } else {
            Self::ExtractionFailed(message.to_string())
        }
    }
}

/// Failures of the catalog expander.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Spotify is not configured. Set SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET in .env.")]
    CatalogNotConfigured,

    #[error("Unsupported Spotify URL. Use track, album, or playlist links.")]
    UnsupportedLink,

    #[error("No playable tracks found in that Spotify link.")]
    NoPlayableTracks,

    #[error("Spotify request failed: {0}")]
    Api(#[from] anyhow::Error),
}

/// Everything a command handler can fail with.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("This command can only be used in a server.")]
    NotInServer,

    #[error("I'm not connected to voice.")]
    NotInVoice,

    #[error("Nothing is playing.")]
    NothingPlaying,

    #[error("Could not resolve any Spotify tracks to playable sources.")]
    NothingResolved,

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl CommandError {
    /// Text sent back to the user. Context-validation failures are shown as-is,
    /// everything else gets the `Error:` prefix.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotInServer | Self::NotInVoice | Self::NothingPlaying => self.to_string(),
            other => format!("Error: {}", other),
        }
    }
}
