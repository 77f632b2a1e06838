//! Per-guild idle disconnect timer.
//!
//! At most one timer is armed per guild. Arming replaces any previous timer,
//! disarming cancels it. A timer that wakes up re-checks the guild under its
//! playback lock before touching the connection, so a stale or cancelled timer
//! never disconnects an active guild.

use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audio::{state::TenantState, voice::VoiceGateway};

#[derive(Debug)]
struct IdleTimer {
    generation: u64,
    token: CancellationToken,
}

/// Slot holding the armed timer of one guild.
#[derive(Debug, Default)]
pub struct IdleSlot {
    timer: Mutex<Option<IdleTimer>>,
    generation: AtomicU64,
}

impl IdleSlot {
    pub fn is_armed(&self) -> bool {
        self.timer.lock().is_some()
    }

    fn replace(&self, token: CancellationToken) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.timer.lock().replace(IdleTimer { generation, token });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        generation
    }

    fn cancel(&self) -> bool {
        match self.timer.lock().take() {
            Some(timer) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Clears the slot only if it still holds the given timer.
    fn release(&self, generation: u64) {
        let mut timer = self.timer.lock();
        if timer.as_ref().is_some_and(|t| t.generation == generation) {
            *timer = None;
        }
    }
}

pub struct IdleScheduler {
    window: Duration,
    gateway: Arc<dyn VoiceGateway>,
}

impl IdleScheduler {
    pub fn new(window: Duration, gateway: Arc<dyn VoiceGateway>) -> Self {
        Self { window, gateway }
    }

    /// Schedules a disconnect after the idle window, replacing any pending one.
    pub fn arm(&self, guild_id: GuildId, tenant: &Arc<TenantState>) {
        let token = CancellationToken::new();
        let generation = tenant.idle.replace(token.clone());

        let window = self.window;
        let gateway = self.gateway.clone();
        let tenant = tenant.clone();

        debug!(
            "⏲️ Desconexión por inactividad programada en guild {} ({})",
            guild_id,
            humantime::format_duration(window)
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(window) => {}
            }
            fire(guild_id, &tenant, gateway.as_ref(), &token).await;
            tenant.idle.release(generation);
        });
    }

    /// Cancels the pending disconnect, if any. Idempotent.
    pub fn disarm(&self, guild_id: GuildId, tenant: &TenantState) {
        if tenant.idle.cancel() {
            debug!("⏲️ Desconexión por inactividad cancelada en guild {}", guild_id);
        }
    }
}

async fn fire(
    guild_id: GuildId,
    tenant: &TenantState,
    gateway: &dyn VoiceGateway,
    token: &CancellationToken,
) {
    let _connection = tenant.connection.lock().await;
    let mut queue = tenant.playback.lock().await;

    // Cancelled while waiting for the locks.
    if token.is_cancelled() {
        return;
    }

    let Some(link) = gateway.link(guild_id).await else {
        return;
    };

    if !link.is_connected().await || link.status().await.is_active() || !queue.is_empty() {
        debug!("⏲️ Guild {} ya no está inactiva, se omite la desconexión", guild_id);
        return;
    }

    link.disconnect(false).await;
    queue.clear_current();
    info!("🚪 Idle timeout reached in guild {}; disconnected from voice.", guild_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        queue::song,
        voice::{
            fake::{FakeGateway, FakeLink},
            StreamStatus,
        },
    };
    use serenity::model::id::ChannelId;

    const WINDOW: Duration = Duration::from_secs(3600);

    fn setup() -> (IdleScheduler, Arc<FakeLink>, Arc<TenantState>, GuildId) {
        let guild_id = GuildId::new(5);
        let link = FakeLink::connected_to(ChannelId::new(50));
        let gateway = FakeGateway::with_link(guild_id, link.clone());
        (
            IdleScheduler::new(WINDOW, gateway),
            link,
            Arc::new(TenantState::new()),
            guild_id,
        )
    }

    async fn sleep_past_window() {
        tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;
        // Let the timer task finish its lock-protected checks.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_window_disconnects_once() {
        let (scheduler, link, tenant, guild_id) = setup();
        {
            // A finished song is still recorded as now-playing.
            let mut queue = tenant.playback.lock().await;
            queue.push(song("last"));
            queue.next_track();
        }

        scheduler.arm(guild_id, &tenant);
        assert!(tenant.idle.is_armed());

        sleep_past_window().await;
        sleep_past_window().await;

        assert_eq!(link.disconnects(), 1);
        assert!(!tenant.idle.is_armed());
        assert_eq!(tenant.playback.lock().await.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_before_window_prevents_disconnect() {
        let (scheduler, link, tenant, guild_id) = setup();

        scheduler.arm(guild_id, &tenant);
        tokio::time::sleep(Duration::from_secs(60)).await;
        scheduler.disarm(guild_id, &tenant);
        scheduler.disarm(guild_id, &tenant);

        sleep_past_window().await;
        assert_eq!(link.disconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn playing_when_timer_fires_prevents_disconnect() {
        let (scheduler, link, tenant, guild_id) = setup();

        scheduler.arm(guild_id, &tenant);
        // Activity starts without anyone disarming the timer.
        *link.status.lock() = StreamStatus::Playing;

        sleep_past_window().await;
        assert_eq!(link.disconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_songs_prevent_disconnect() {
        let (scheduler, link, tenant, guild_id) = setup();

        scheduler.arm(guild_id, &tenant);
        tenant.playback.lock().await.push(song("pending"));

        sleep_past_window().await;
        assert_eq!(link.disconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_timer() {
        let (scheduler, link, tenant, guild_id) = setup();

        scheduler.arm(guild_id, &tenant);
        tokio::time::sleep(Duration::from_secs(1800)).await;
        scheduler.arm(guild_id, &tenant);

        // The first timer's deadline passes without effect.
        tokio::time::sleep(Duration::from_secs(1801)).await;
        tokio::task::yield_now().await;
        assert_eq!(link.disconnects(), 0);

        sleep_past_window().await;
        assert_eq!(link.disconnects(), 1);
    }
}
