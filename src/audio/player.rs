//! Playback state machine.
//!
//! [`PlaybackDriver`] owns every transition of a guild's queue and now-playing
//! song. Transcoder completions never touch state directly: they post a
//! [`PlaybackEvent`] that the coordinator task ([`PlaybackEvents::spawn`]) feeds
//! back into [`PlaybackDriver::advance`].

use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        idle::IdleScheduler,
        queue::{MusicQueue, QueueInfo, Song},
        state::{TenantRegistry, TenantState},
        voice::{CompletionCallback, ReconnectPolicy, VoiceGateway},
    },
    error::CommandError,
};

/// Upcoming songs shown by `/queue`.
pub const QUEUE_DISPLAY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The transcoder finished a stream, `error` set if it failed mid-stream.
    Finished {
        guild_id: GuildId,
        error: Option<String>,
    },
}

/// Result of one [`PlaybackDriver::advance`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    NoConnection,
    AlreadyPlaying,
    Idle,
    Started(Song),
}

pub struct PlaybackDriver {
    registry: Arc<TenantRegistry>,
    gateway: Arc<dyn VoiceGateway>,
    idle: IdleScheduler,
    policy: ReconnectPolicy,
    events: flume::Sender<PlaybackEvent>,
}

/// Receiving half of the completion channel.
pub struct PlaybackEvents {
    rx: flume::Receiver<PlaybackEvent>,
}

impl PlaybackEvents {
    /// Runs the coordinator loop until every sender is gone.
    ///
    /// Each event is handled in its own task so a guild stuck on its locks
    /// never delays another guild's completions.
    pub fn spawn(self, driver: Arc<PlaybackDriver>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok(event) = self.rx.recv_async().await {
                let driver = driver.clone();
                tokio::spawn(async move { driver.handle_event(event).await });
            }
            debug!("Canal de eventos de reproducción cerrado");
        })
    }

    #[cfg(test)]
    pub fn try_next(&self) -> Option<PlaybackEvent> {
        self.rx.try_recv().ok()
    }
}

impl PlaybackDriver {
    pub fn new(
        registry: Arc<TenantRegistry>,
        gateway: Arc<dyn VoiceGateway>,
        idle: IdleScheduler,
        policy: ReconnectPolicy,
    ) -> (Self, PlaybackEvents) {
        let (events, rx) = flume::unbounded();
        (
            Self {
                registry,
                gateway,
                idle,
                policy,
                events,
            },
            PlaybackEvents { rx },
        )
    }

    pub async fn handle_event(&self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Finished { guild_id, error } => {
                if let Some(e) = error {
                    error!("❌ Playback error in guild {}: {}", guild_id, e);
                }
                self.advance(guild_id).await;
            }
        }
    }

    /// Starts the next queued song unless something is already streaming.
    ///
    /// Safe to call at any time: it is a no-op while a stream is active.
    pub async fn advance(&self, guild_id: GuildId) -> Advance {
        let tenant = self.registry.get_or_create(guild_id);
        let mut queue = tenant.playback.lock().await;
        self.advance_locked(guild_id, &tenant, &mut queue).await
    }

    async fn advance_locked(
        &self,
        guild_id: GuildId,
        tenant: &Arc<TenantState>,
        queue: &mut MusicQueue,
    ) -> Advance {
        let link = match self.gateway.link(guild_id).await {
            Some(link) if link.is_connected().await => link,
            _ => {
                debug!("Sin conexión de voz en guild {}, no se avanza la cola", guild_id);
                return Advance::NoConnection;
            }
        };

        if link.status().await.is_active() {
            self.idle.disarm(guild_id, tenant);
            return Advance::AlreadyPlaying;
        }

        loop {
            let Some(song) = queue.next_track() else {
                self.idle.arm(guild_id, tenant);
                return Advance::Idle;
            };

            self.idle.disarm(guild_id, tenant);
            let on_complete = self.completion_callback(guild_id);

            match link.start_streaming(&song.stream_url, &self.policy, on_complete).await {
                Ok(()) => {
                    info!("🎵 Reproduciendo: {} en guild {}", song.title, guild_id);
                    return Advance::Started(song);
                }
                Err(e) => {
                    warn!("⚠️ No se pudo iniciar '{}' en guild {}: {}", song.title, guild_id, e);
                    queue.clear_current();
                }
            }
        }
    }

    fn completion_callback(&self, guild_id: GuildId) -> CompletionCallback {
        let events = self.events.clone();
        Box::new(move |error| {
            // Only fails once the coordinator is gone, i.e. during shutdown.
            let _ = events.send(PlaybackEvent::Finished { guild_id, error });
        })
    }

    /// Cancels any pending idle disconnect while a command is working on the guild.
    pub async fn hold_active(&self, guild_id: GuildId) {
        let tenant = self.registry.get_or_create(guild_id);
        let _queue = tenant.playback.lock().await;
        self.idle.disarm(guild_id, &tenant);
    }

    /// Appends a batch in order and advances. Returns the song now playing afterwards.
    pub async fn enqueue(&self, guild_id: GuildId, songs: Vec<Song>) -> Option<Song> {
        let tenant = self.registry.get_or_create(guild_id);
        let mut queue = tenant.playback.lock().await;

        self.idle.disarm(guild_id, &tenant);
        queue.extend(songs);
        self.advance_locked(guild_id, &tenant, &mut queue).await;

        queue.current().cloned()
    }

    /// Stops the active stream; its completion advances the queue.
    pub async fn skip(&self, guild_id: GuildId) -> Result<(), CommandError> {
        let link = self.gateway.link(guild_id).await.ok_or(CommandError::NotInVoice)?;

        if !link.status().await.is_active() {
            return Err(CommandError::NothingPlaying);
        }

        info!("⏭️ Track saltado en guild {}", guild_id);
        link.stop().await;
        Ok(())
    }

    /// Clears the queue and stops playback but stays connected.
    pub async fn stop(&self, guild_id: GuildId) {
        let tenant = self.registry.get_or_create(guild_id);
        let mut queue = tenant.playback.lock().await;
        queue.clear();

        let Some(link) = self.gateway.link(guild_id).await else {
            return;
        };

        if link.status().await.is_active() {
            link.stop().await;
        }
        if link.is_connected().await {
            self.idle.arm(guild_id, &tenant);
        }
        info!("⏹️ Reproducción detenida en guild {}", guild_id);
    }

    /// Clears everything and disconnects.
    pub async fn leave(&self, guild_id: GuildId) -> Result<(), CommandError> {
        let tenant = self.registry.get_or_create(guild_id);
        let _connection = tenant.connection.lock().await;
        let mut queue = tenant.playback.lock().await;
        queue.clear();
        self.idle.disarm(guild_id, &tenant);

        let link = self.gateway.link(guild_id).await.ok_or(CommandError::NotInVoice)?;
        link.disconnect(false).await;
        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }

    /// Drops queue state after the bot was removed from voice by someone else.
    pub async fn forget_connection(&self, guild_id: GuildId) {
        let Some(tenant) = self.registry.get(guild_id) else {
            return;
        };
        let mut queue = tenant.playback.lock().await;
        queue.clear();
        self.idle.disarm(guild_id, &tenant);
        info!("🔌 Desconectado externamente de voz en guild {}, cola limpiada", guild_id);
    }

    pub async fn snapshot(&self, guild_id: GuildId) -> QueueInfo {
        let tenant = self.registry.get_or_create(guild_id);
        let queue = tenant.playback.lock().await;
        queue.get_info(QUEUE_DISPLAY_LIMIT)
    }

    #[cfg(test)]
    pub fn is_idle_armed(&self, guild_id: GuildId) -> bool {
        self.registry
            .get(guild_id)
            .is_some_and(|tenant| tenant.idle.is_armed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        queue::song,
        voice::{
            fake::{ConnectStep, FakeGateway, FakeLink},
            StreamStatus, VoiceConnector, VoiceSettings,
        },
    };
    use pretty_assertions::assert_eq;
    use serenity::model::id::ChannelId;
    use std::time::Duration;

    fn guild() -> GuildId {
        GuildId::new(77)
    }

    fn driver_with_link() -> (Arc<PlaybackDriver>, PlaybackEvents, Arc<FakeLink>) {
        let link = FakeLink::connected_to(ChannelId::new(700));
        let gateway = FakeGateway::with_link(guild(), link.clone());
        let (driver, events) = PlaybackDriver::new(
            Arc::new(TenantRegistry::new()),
            gateway.clone(),
            IdleScheduler::new(Duration::from_secs(3600), gateway),
            ReconnectPolicy::default(),
        );
        (Arc::new(driver), events, link)
    }

    /// Delivers pending completion events the way the coordinator would.
    async fn drain(driver: &PlaybackDriver, events: &PlaybackEvents) {
        while let Some(event) = events.try_next() {
            driver.handle_event(event).await;
        }
    }

    #[tokio::test]
    async fn songs_play_in_enqueue_order() {
        let (driver, events, link) = driver_with_link();

        for title in ["a", "b", "c"] {
            driver.enqueue(guild(), vec![song(title)]).await;
        }
        assert_eq!(link.streamed(), vec!["https://media.example/a"]);

        link.finish(None);
        drain(&driver, &events).await;
        link.finish(None);
        drain(&driver, &events).await;

        assert_eq!(
            link.streamed(),
            vec!["https://media.example/a", "https://media.example/b", "https://media.example/c"]
        );
        assert_eq!(driver.snapshot(guild()).await.current, Some(song("c")));
    }

    #[tokio::test]
    async fn advance_is_a_no_op_while_streaming() {
        let (driver, _events, link) = driver_with_link();
        driver.enqueue(guild(), vec![song("a"), song("b")]).await;

        assert_eq!(driver.advance(guild()).await, Advance::AlreadyPlaying);
        assert_eq!(driver.advance(guild()).await, Advance::AlreadyPlaying);

        assert_eq!(link.streamed().len(), 1);
        assert_eq!(driver.snapshot(guild()).await.total_items, 1);
    }

    #[tokio::test]
    async fn stop_clears_state_and_arms_idle_timer() {
        let (driver, events, link) = driver_with_link();
        driver.enqueue(guild(), vec![song("a"), song("b")]).await;

        driver.stop(guild()).await;

        let info = driver.snapshot(guild()).await;
        assert_eq!(info.current, None);
        assert_eq!(info.total_items, 0);
        assert_eq!(*link.status.lock(), StreamStatus::Stopped);
        assert!(driver.is_idle_armed(guild()));

        // The stopped stream's completion finds nothing left to play.
        drain(&driver, &events).await;
        assert_eq!(driver.advance(guild()).await, Advance::Idle);
        assert!(driver.is_idle_armed(guild()));
        assert_eq!(link.streamed().len(), 1);
    }

    #[tokio::test]
    async fn second_play_queues_behind_first() {
        let (driver, _events, _link) = driver_with_link();

        let first = driver.enqueue(guild(), vec![song("a")]).await;
        let second = driver.enqueue(guild(), vec![song("b")]).await;

        assert_eq!(first, Some(song("a")));
        assert_eq!(second, Some(song("a")));
        let info = driver.snapshot(guild()).await;
        assert_eq!(info.upcoming, vec![song("b")]);
    }

    #[tokio::test]
    async fn attach_failure_moves_on_to_next_song() {
        let (driver, _events, link) = driver_with_link();
        link.failing_urls.lock().push("https://media.example/broken".into());

        let now_playing = driver.enqueue(guild(), vec![song("broken"), song("good")]).await;

        assert_eq!(now_playing, Some(song("good")));
        assert_eq!(link.streamed(), vec!["https://media.example/good"]);
        assert_eq!(driver.snapshot(guild()).await.total_items, 0);
    }

    #[tokio::test]
    async fn attach_failure_on_last_song_goes_idle() {
        let (driver, _events, link) = driver_with_link();
        link.failing_urls.lock().push("https://media.example/broken".into());

        let now_playing = driver.enqueue(guild(), vec![song("broken")]).await;

        assert_eq!(now_playing, None);
        assert!(driver.is_idle_armed(guild()));
    }

    #[tokio::test]
    async fn transcoder_error_still_advances() {
        let (driver, events, link) = driver_with_link();
        driver.enqueue(guild(), vec![song("a"), song("b")]).await;

        link.finish(Some("Server returned 403 Forbidden"));
        assert_eq!(
            events.try_next(),
            Some(PlaybackEvent::Finished {
                guild_id: guild(),
                error: Some("Server returned 403 Forbidden".into()),
            })
        );
        driver
            .handle_event(PlaybackEvent::Finished {
                guild_id: guild(),
                error: Some("Server returned 403 Forbidden".into()),
            })
            .await;

        assert_eq!(link.streamed().last().map(String::as_str), Some("https://media.example/b"));
    }

    #[tokio::test]
    async fn skip_requires_an_active_stream() {
        let (driver, events, link) = driver_with_link();

        assert!(matches!(driver.skip(guild()).await, Err(CommandError::NothingPlaying)));

        driver.enqueue(guild(), vec![song("a"), song("b")]).await;
        driver.skip(guild()).await.unwrap();
        drain(&driver, &events).await;

        assert_eq!(driver.snapshot(guild()).await.current, Some(song("b")));
        assert_eq!(link.streamed().len(), 2);
    }

    #[tokio::test]
    async fn leave_disconnects_and_clears() {
        let (driver, _events, link) = driver_with_link();
        driver.enqueue(guild(), vec![song("a"), song("b")]).await;

        driver.leave(guild()).await.unwrap();

        assert_eq!(link.disconnects(), 1);
        assert!(!driver.is_idle_armed(guild()));
        let info = driver.snapshot(guild()).await;
        assert_eq!((info.current, info.total_items), (None, 0));
    }

    #[tokio::test]
    async fn commands_without_connection_report_not_in_voice() {
        let gateway = Arc::new(FakeGateway::default());
        let (driver, _events) = PlaybackDriver::new(
            Arc::new(TenantRegistry::new()),
            gateway.clone(),
            IdleScheduler::new(Duration::from_secs(3600), gateway),
            ReconnectPolicy::default(),
        );

        assert!(matches!(driver.skip(guild()).await, Err(CommandError::NotInVoice)));
        assert!(matches!(driver.leave(guild()).await, Err(CommandError::NotInVoice)));
        assert_eq!(driver.advance(guild()).await, Advance::NoConnection);
    }

    fn two_guild_driver() -> (Arc<PlaybackDriver>, PlaybackEvents, Arc<FakeGateway>, Arc<TenantRegistry>) {
        let gateway = FakeGateway::with_link(guild(), FakeLink::connected_to(ChannelId::new(700)));
        let registry = Arc::new(TenantRegistry::new());
        let (driver, events) = PlaybackDriver::new(
            registry.clone(),
            gateway.clone(),
            IdleScheduler::new(Duration::from_secs(3600), gateway.clone()),
            ReconnectPolicy::default(),
        );
        (Arc::new(driver), events, gateway, registry)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn busy_guild_does_not_delay_other_guild_completions() {
        let busy = GuildId::new(1);
        let (driver, events, gateway, registry) = two_guild_driver();
        driver.enqueue(guild(), vec![song("a"), song("b")]).await;

        // The busy guild's playback lock is held for the whole test.
        let busy_tenant = registry.get_or_create(busy);
        let _held = busy_tenant.playback.lock().await;

        events.spawn(driver.clone());
        (driver.completion_callback(busy))(None);
        gateway.fake_link(guild()).unwrap().finish(None);
        settle().await;

        assert_eq!(driver.snapshot(guild()).await.current, Some(song("b")));
    }

    #[tokio::test]
    async fn leave_waits_for_connect_without_holding_playback() {
        let busy = GuildId::new(1);
        let (driver, _events, gateway, registry) = two_guild_driver();
        gateway.script.lock().push_back(ConnectStep::Hang);

        let connector = VoiceConnector::new(gateway.clone(), VoiceSettings::default());
        let tenant = registry.get_or_create(busy);
        let connecting = tenant.clone();
        tokio::spawn(async move {
            let _ = connector
                .ensure_connected(busy, &connecting, Some(ChannelId::new(10)))
                .await;
        });
        settle().await;

        let leaving = driver.clone();
        let leave = tokio::spawn(async move { leaving.leave(busy).await });
        settle().await;

        assert!(!leave.is_finished());
        assert!(tenant.playback.try_lock().is_ok());
        assert_eq!(driver.advance(busy).await, Advance::NoConnection);
    }
}
