use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

fn all_commands() -> Vec<CreateCommand> {
    vec![
        CreateCommand::new("join").description("Join your current voice channel."),
        CreateCommand::new("play")
            .description("Play a YouTube URL, search query, or Spotify link.")
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::String,
                    "query",
                    "YouTube URL, search terms, or Spotify track/album/playlist link",
                )
                .required(true),
            ),
        CreateCommand::new("skip").description("Skip the current track."),
        CreateCommand::new("stop").description("Stop playback and clear the queue."),
        CreateCommand::new("queue").description("Show the current queue."),
        CreateCommand::new("leave").description("Disconnect from voice and clear the queue."),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }
    Ok(())
}

/// Registra comandos para una guild específica
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}
