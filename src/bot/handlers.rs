use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup, CreateInteractionResponseMessage,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    bot::{
        music::{CommandRequest, Reply},
        MusicBot,
    },
    error::CommandError,
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    info!(
        "📝 Comando /{} usado por {} en guild {:?}",
        command.data.name, command.user.name, command.guild_id
    );

    let request = CommandRequest {
        guild_id: command.guild_id,
        user_id: command.user.id,
        voice_channel: command
            .guild_id
            .and_then(|guild_id| user_voice_channel(ctx, guild_id, command.user.id)),
    };
    let jukebox = &bot.jukebox;

    match command.data.name.as_str() {
        "join" => {
            defer(ctx, &command, true).await?;
            follow_up(ctx, &command, jukebox.join(&request).await).await?;
        }
        "play" => {
            let query = command
                .data
                .options
                .first()
                .and_then(|opt| opt.value.as_str())
                .unwrap_or_default()
                .to_string();

            defer(ctx, &command, false).await?;
            follow_up(ctx, &command, jukebox.play(&request, &query).await).await?;
        }
        "skip" => respond(ctx, &command, jukebox.skip(&request).await).await?,
        "stop" => respond(ctx, &command, jukebox.stop(&request).await).await?,
        "queue" => respond(ctx, &command, jukebox.queue(&request).await).await?,
        "leave" => respond(ctx, &command, jukebox.leave(&request).await).await?,
        _ => {
            respond(ctx, &command, Ok(Reply::ephemeral("❌ Comando no reconocido"))).await?;
        }
    }

    Ok(())
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id)
}

fn into_reply(result: Result<Reply, CommandError>) -> Reply {
    match result {
        Ok(reply) => reply,
        Err(e) => {
            warn!("⚠️ Slash command error: {}", e);
            Reply::ephemeral(e.user_message())
        }
    }
}

async fn defer(ctx: &Context, command: &CommandInteraction, ephemeral: bool) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new().ephemeral(ephemeral)),
        )
        .await?;
    Ok(())
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    result: Result<Reply, CommandError>,
) -> Result<()> {
    let reply = into_reply(result);
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(reply.content)
                    .ephemeral(reply.ephemeral),
            ),
        )
        .await?;
    Ok(())
}

async fn follow_up(
    ctx: &Context,
    command: &CommandInteraction,
    result: Result<Reply, CommandError>,
) -> Result<()> {
    let reply = into_reply(result);
    command
        .create_followup(
            &ctx.http,
            CreateInteractionResponseFollowup::new()
                .content(reply.content)
                .ephemeral(reply.ephemeral),
        )
        .await?;
    Ok(())
}
