use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::audio::{idle::IdleSlot, queue::MusicQueue};

/// Playback state of one guild.
///
/// `playback` guards the queue and now-playing transitions, `connection` guards
/// connect/move/disconnect. When both are needed, take `connection` first.
#[derive(Debug, Default)]
pub struct TenantState {
    pub playback: Mutex<MusicQueue>,
    pub connection: Mutex<()>,
    pub(crate) idle: IdleSlot,
}

impl TenantState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Process-wide guild → state map. Entries are created on first use and never removed.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: DashMap<GuildId, Arc<TenantState>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<TenantState> {
        self.tenants
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("🆕 Estado creado para guild {}", guild_id);
                Arc::new(TenantState::new())
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<TenantState>> {
        self.tenants.get(&guild_id).map(|t| t.clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tenants.len()
    }
}
