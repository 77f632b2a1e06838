//! # Bot Module
//!
//! Discord side of the jukebox: slash command registration, interaction
//! dispatch and voice state tracking. All playback logic lives in
//! [`music::Jukebox`]; this module only translates gateway events into calls on it.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info};

pub mod commands;
pub mod handlers;
pub mod music;

use crate::config::Config;
use music::Jukebox;

pub struct MusicBot {
    config: Arc<Config>,
    pub jukebox: Arc<Jukebox>,
}

impl MusicBot {
    pub fn new(config: Arc<Config>, jukebox: Arc<Jukebox>) -> Self {
        Self { config, jukebox }
    }

    /// Registers slash commands per configured guild, or globally when none are set.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        if self.config.guild_ids.is_empty() {
            info!("🌐 Registrando comandos globalmente");
            commands::register_global_commands(ctx).await?;
            info!("✅ Comandos globales registrados");
            return Ok(());
        }

        for &raw_id in &self.config.guild_ids {
            let guild_id = GuildId::new(raw_id);
            match commands::register_guild_commands(ctx, guild_id).await {
                Ok(()) => info!("✅ Comandos de guild registrados para: {}", guild_id),
                Err(e) => error!("❌ Error registrando comandos en guild {}: {:?}", guild_id, e),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Cleans up when someone else disconnects the bot from voice.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.jukebox.voice_lost(guild_id).await;
        }
    }
}
