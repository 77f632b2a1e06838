//! songbird implementation of the voice seam.
//!
//! Each stream is an ffmpeg child process writing 48 kHz stereo WAV to stdout,
//! handed to songbird through a [`ChildContainer`].

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::{ChildContainer, Input},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{
    process::{Command, Stdio},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::audio::voice::{
    AttachError, CompletionCallback, ReconnectPolicy, StreamStatus, VoiceGateway, VoiceLink,
};

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    ffmpeg_path: String,
    links: DashMap<GuildId, Arc<SongbirdLink>>,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>, ffmpeg_path: String) -> Self {
        Self {
            manager,
            ffmpeg_path,
            links: DashMap::new(),
        }
    }

    /// Reuses the wrapper for `call` so the current track handle survives lookups.
    fn wrap(&self, guild_id: GuildId, call: Arc<Mutex<Call>>) -> Arc<SongbirdLink> {
        let existing = self.links.get(&guild_id).map(|l| l.clone());
        if let Some(link) = existing.filter(|l| Arc::ptr_eq(&l.call, &call)) {
            return link;
        }

        let link = Arc::new(SongbirdLink {
            guild_id,
            call,
            manager: self.manager.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            track: SyncMutex::new(None),
        });
        self.links.insert(guild_id, link.clone());
        link
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn link(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceLink>> {
        let call = self.manager.get(guild_id)?;
        Some(self.wrap(guild_id, call))
    }

    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> anyhow::Result<Arc<dyn VoiceLink>> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(self.wrap(guild_id, call))
    }
}

pub struct SongbirdLink {
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    manager: Arc<Songbird>,
    ffmpeg_path: String,
    track: SyncMutex<Option<TrackHandle>>,
}

#[async_trait]
impl VoiceLink for SongbirdLink {
    async fn channel(&self) -> Option<ChannelId> {
        let call = self.call.lock().await;
        call.current_channel().map(|c| ChannelId::new(c.0.get()))
    }

    async fn is_connected(&self) -> bool {
        self.call.lock().await.current_connection().is_some()
    }

    async fn move_to(&self, channel_id: ChannelId) -> anyhow::Result<()> {
        self.manager
            .join(self.guild_id, channel_id)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    async fn disconnect(&self, force: bool) {
        if let Some(track) = self.track.lock().take() {
            let _ = track.stop();
        }

        if let Err(e) = self.manager.remove(self.guild_id).await {
            if force {
                debug!("Limpieza forzada de voz en guild {}: {}", self.guild_id, e);
            } else {
                warn!("⚠️ Error al desconectar de voz en guild {}: {}", self.guild_id, e);
            }
        }
    }

    async fn status(&self) -> StreamStatus {
        let Some(track) = self.track.lock().clone() else {
            return StreamStatus::Stopped;
        };

        match track.get_info().await {
            Ok(state) => match state.playing {
                PlayMode::Play => StreamStatus::Playing,
                PlayMode::Pause => StreamStatus::Paused,
                _ => StreamStatus::Stopped,
            },
            Err(_) => StreamStatus::Stopped,
        }
    }

    async fn start_streaming(
        &self,
        stream_url: &str,
        policy: &ReconnectPolicy,
        on_complete: CompletionCallback,
    ) -> Result<(), AttachError> {
        let child = transcoder_command(&self.ffmpeg_path, stream_url, policy)
            .spawn()
            .map_err(|e| AttachError(format!("{}: {}", self.ffmpeg_path, e)))?;

        let input: Input = ChildContainer::from(child).into();
        let handle = self.call.lock().await.play_input(input);

        let notify = Arc::new(SyncMutex::new(Some(on_complete)));
        for event in [TrackEvent::End, TrackEvent::Error] {
            let completion = TrackCompletion {
                guild_id: self.guild_id,
                notify: notify.clone(),
            };
            if let Err(e) = handle.add_event(Event::Track(event), completion) {
                let _ = handle.stop();
                return Err(AttachError(format!("could not watch track: {}", e)));
            }
        }

        *self.track.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        let track = self.track.lock().clone();
        if let Some(track) = track {
            if let Err(e) = track.stop() {
                debug!("Track ya detenido en guild {}: {}", self.guild_id, e);
            }
        }
    }
}

fn transcoder_command(ffmpeg: &str, stream_url: &str, policy: &ReconnectPolicy) -> Command {
    let mut command = Command::new(ffmpeg);
    command
        .args(["-hide_banner", "-loglevel", "error"])
        .args(policy.ffmpeg_input_args())
        .args(["-i", stream_url])
        .args(["-vn", "-f", "wav", "-ac", "2", "-ar", "48000", "-acodec", "pcm_s16le", "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    command
}

/// Fires the stream's completion callback on whichever of End / Error arrives first.
struct TrackCompletion {
    guild_id: GuildId,
    notify: Arc<SyncMutex<Option<CompletionCallback>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackCompletion {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(format!("{:?}", e)),
                _ => None,
            }),
            _ => None,
        };

        let callback = self.notify.lock().take();
        if let Some(callback) = callback {
            debug!("🏁 Track terminado en guild {}", self.guild_id);
            callback(error);
        }

        Some(Event::Cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcoder_reconnects_and_emits_pcm_wav() {
        let command = transcoder_command("ffmpeg", "https://media.example/a", &ReconnectPolicy::default());
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "https://media.example/a");
        assert!(args[..input].windows(2).any(|w| w == ["-reconnect_delay_max", "5"]));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
        assert!(args.windows(2).any(|w| w == ["-ar", "48000"]));
    }
}
