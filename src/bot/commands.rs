use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

use super::throttle::ThrottleRule;

/// Nombres de todos los comandos que el bot sabe ejecutar.
pub const COMMAND_NAMES: &[&str] = &[
    "play",
    "search",
    "skip",
    "queue",
    "remove",
    "move",
    "clear",
    "loop",
    "disconnect",
    "invite",
];

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        search_command(),
        skip_command(),
        queue_command(),
        remove_command(),
        move_command(),
        clear_command(),
        loop_command(),
        disconnect_command(),
        invite_command(),
    ]
}

/// Usos permitidos por usuario para cada comando.
pub fn throttle_rule(command: &str) -> ThrottleRule {
    match command {
        "play" => ThrottleRule::new(60, 60),
        "search" => ThrottleRule::new(20, 20),
        "queue" => ThrottleRule::new(1, 2),
        "skip" | "remove" | "move" | "loop" => ThrottleRule::new(2, 1),
        _ => ThrottleRule::new(1, 1),
    }
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play the top result of a query, a video link or a playlist link")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "YouTube query or link")
                .required(true),
        )
}

fn search_command() -> CreateCommand {
    CreateCommand::new("search")
        .description("Pick from a list of results from the query to play")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "YouTube search query")
                .required(true),
        )
}

// Comandos de control

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip what is playing.")
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Clear the queue and skip any playing item.")
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop").description("Enable or disable looping")
}

fn disconnect_command() -> CreateCommand {
    CreateCommand::new("disconnect").description("Disconnect the bot from the voice channel.")
}

// Comandos de cola

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Display the queue.")
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Remove items in the queue. Comma-separated indexes or index ranges are supported.")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "positions",
                "Queue positions (ex: 4, 8-12, 16, 20-24)",
            )
            .required(true),
        )
}

fn move_command() -> CreateCommand {
    CreateCommand::new("move")
        .description("Move an item or range in the queue to a new index.")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "position",
                "Queue position (ex: 9) or range (ex: 3-5)",
            )
            .required(true),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "new_position", "New position")
                .min_int_value(1)
                .required(true),
        )
}

// Varios

fn invite_command() -> CreateCommand {
    CreateCommand::new("invite").description("Provide a link to invite the bot to a server.")
}
