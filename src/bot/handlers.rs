use anyhow::Result;
use futures::StreamExt;
use serenity::{
    all::{Colour, ComponentInteraction, ComponentInteractionDataKind},
    builder::{
        CreateActionRow, CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::{sync::Arc, time::Instant};
use tracing::{error, info, warn};

use super::{commands, ranges::parse_ranges, MusicBot};
use crate::{
    music::{GuildMusicManager, QueueItem, Requester, VoiceChannelRef},
    ui::{
        buttons::{self, button_ids},
        embeds::{self, PlayReply},
    },
};

const NOT_IN_VOICE: &str = ":face_with_raised_eyebrow: I ain't in a voice channel...";
const NOT_LISTENING: &str = "You ain't even listenin' to me! :anger: Why would I listen to ya?!";
const NOT_FOUND: &str = "Go get your eyes checked! :anger: I ain't find nothin!";
const COMMAND_FAILED: &str = "Yikes! :scream: Somethin' went **horribly** wrong tryna run this command!";

/// Maneja los comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return reply(ctx, &command, "I only perform in servers! :microphone:", true).await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    if bot.config.maintenance {
        return reply(
            ctx,
            &command,
            ":construction: The stage is under maintenance! Come back in a bit!",
            true,
        )
        .await;
    }

    let Some(manager) = bot.registry.get(guild_id) else {
        warn!("⚠️ Comando en guild no registrada: {}", guild_id);
        return reply(
            ctx,
            &command,
            ":face_with_raised_eyebrow: I'm still settlin' into this place! Try again in a sec",
            true,
        )
        .await;
    };

    let name = command.data.name.clone();
    if let Err(wait) = bot.throttle.check(
        command.user.id,
        &name,
        commands::throttle_rule(&name),
        Instant::now(),
    ) {
        let wait = std::time::Duration::from_secs(wait.as_secs().max(1));
        return reply(
            ctx,
            &command,
            &format!(
                ":hourglass: Easy there! Try `/{}` again in {}",
                name,
                humantime::format_duration(wait)
            ),
            true,
        )
        .await;
    }

    let result = match name.as_str() {
        "play" => handle_play(ctx, &command, bot, &manager).await,
        "search" => handle_search(ctx, &command, bot, &manager).await,
        "skip" => handle_skip(ctx, &command, &manager).await,
        "queue" => handle_queue(ctx, &command, bot, &manager).await,
        "remove" => handle_remove(ctx, &command, &manager).await,
        "move" => handle_move(ctx, &command, &manager).await,
        "clear" => handle_clear(ctx, &command, &manager).await,
        "loop" => handle_loop(ctx, &command, &manager).await,
        "disconnect" => handle_disconnect(ctx, &command, &manager).await,
        "invite" => handle_invite(ctx, &command).await,
        _ => {
            reply(
                ctx,
                &command,
                "Sorry! :man_shrugging: I don't know how to execute this command!",
                true,
            )
            .await
        }
    };

    if result.is_err() {
        report_failure(ctx, &command).await;
    }

    result
}

async fn report_failure(ctx: &Context, command: &CommandInteraction) {
    let sent = reply(ctx, command, COMMAND_FAILED, true).await;
    if sent.is_err() {
        let _ = command
            .edit_response(&ctx.http, EditInteractionResponse::new().content(COMMAND_FAILED))
            .await;
    }
}

// Handlers específicos para cada comando

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    manager: &Arc<GuildMusicManager>,
) -> Result<()> {
    let query = option_str(command, "query").unwrap_or_default();
    let Some(items) = process_search(ctx, command, manager, query, false).await? else {
        return Ok(());
    };

    let reply = process_play(ctx, manager, command.user.id, requester_of(command), items, bot.color()).await;
    command.edit_response(&ctx.http, edit_from(reply)).await?;

    Ok(())
}

/// Valida la consulta y busca. `None` si ya se respondió al usuario.
async fn process_search(
    ctx: &Context,
    command: &CommandInteraction,
    manager: &GuildMusicManager,
    query: &str,
    multi: bool,
) -> Result<Option<Vec<QueueItem>>> {
    let query = query.trim();
    if query.is_empty() {
        reply(ctx, command, ":pinched_fingers: Gimme somethin' that makes sense kiddo!", true).await?;
        return Ok(None);
    }

    let channel = voice_channel_of(ctx, manager.guild_id(), command.user.id);
    if let Err(e) = manager.can_play(channel.as_ref()) {
        reply(ctx, command, &e.to_string(), true).await?;
        return Ok(None);
    }

    // Defer la respuesta ya que puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    match manager.search(query, multi).await {
        Ok(items) if items.is_empty() => {
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new().content(
                        ":x: I got nothin'! :person_shrugging: Ain't find squat! :pinching_hand: You must be into weird stuff, huh?",
                    ),
                )
                .await?;
            Ok(None)
        }
        Ok(items) => Ok(Some(items)),
        Err(e) => {
            error!("❌ Error de búsqueda: {:?}", e);
            command
                .edit_response(
                    &ctx.http,
                    EditInteractionResponse::new()
                        .content(":x: I couldn't search for what'cha askin' for... :grimacing: Sorry!"),
                )
                .await?;
            Ok(None)
        }
    }
}

/// Encola `items` y arma la respuesta para el usuario.
async fn process_play(
    ctx: &Context,
    manager: &GuildMusicManager,
    user_id: UserId,
    requester: Requester,
    items: Vec<QueueItem>,
    color: Colour,
) -> PlayReply {
    let channel = voice_channel_of(ctx, manager.guild_id(), user_id);

    match manager.play(items, channel.as_ref(), &requester).await {
        Ok(batch) => embeds::create_play_reply(&batch, color),
        Err(e) => {
            if !e.is_rejection() {
                error!("❌ Error encolando en guild {}: {:?}", manager.guild_id(), e);
            }
            PlayReply::Content(e.to_string())
        }
    }
}

async fn handle_search(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    manager: &Arc<GuildMusicManager>,
) -> Result<()> {
    let query = option_str(command, "query").unwrap_or_default();
    let Some(results) = process_search(ctx, command, manager, query, true).await? else {
        return Ok(());
    };

    let color = bot.color();
    let page_count = embeds::search_page_count(results.len());
    let mut page = 0;
    let mut complete = false;

    let search_page = |page: usize| -> (Vec<CreateEmbed>, Vec<CreateActionRow>) {
        let mut components = buttons::create_page_buttons(page, page_count);
        components.push(buttons::create_result_select(&results, page));
        (embeds::create_search_page_embeds(&results, page, color), components)
    };

    let (page_embeds, components) = search_page(page);
    let message = command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new()
                .embeds(page_embeds)
                .components(components),
        )
        .await?;

    let mut interactions = message
        .await_component_interactions(ctx)
        .author_id(command.user.id)
        .timeout(bot.config.interact_lifetime())
        .stream();

    while let Some(interaction) = interactions.next().await {
        let id = interaction.data.custom_id.as_str();

        if complete {
            if id == button_ids::SELECT_MORE {
                complete = false;
                let (page_embeds, components) = search_page(page);
                update_message(ctx, &interaction, page_embeds, components).await?;
            }
            continue;
        }

        if id == button_ids::RESULT_SELECT {
            let Some(item) = selected_index(&interaction).and_then(|index| results.get(index)) else {
                continue;
            };

            complete = true;
            interaction
                .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
                .await?;

            let reply = process_play(
                ctx,
                manager,
                interaction.user.id,
                requester_of(command),
                vec![item.clone()],
                color,
            )
            .await;

            interaction
                .edit_response(
                    &ctx.http,
                    edit_from(reply).components(vec![buttons::create_select_more_button()]),
                )
                .await?;
        } else {
            page = buttons::page_index_from_button(id, page, page_count);
            let (page_embeds, components) = search_page(page);
            update_message(ctx, &interaction, page_embeds, components).await?;
        }
    }

    expire(ctx, command).await
}

fn selected_index(interaction: &ComponentInteraction) -> Option<usize> {
    match &interaction.data.kind {
        ComponentInteractionDataKind::StringSelect { values } => values.first()?.parse().ok(),
        _ => None,
    }
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    manager: &GuildMusicManager,
) -> Result<()> {
    if let Err(reason) = ensure_listening(ctx, manager, command.user.id) {
        return reply(ctx, command, reason, true).await;
    }

    let state = manager.state();
    let Some(playing) = state.playing else {
        return reply(ctx, command, ":face_with_raised_eyebrow: There's nothin' to skip friend...", true).await;
    };

    manager.skip();

    let mut content = format!(":track_next: **Skipping** `{}`", playing.title);
    if let Some(next) = state.queue.first() {
        content.push_str(&format!("\n:arrow_forward: **Next up is** `{}`", next.title));
    }
    reply(ctx, command, &content, false).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &MusicBot,
    manager: &GuildMusicManager,
) -> Result<()> {
    let state = manager.state();
    if state.playing.is_none() && state.queue.is_empty() {
        return reply(
            ctx,
            command,
            "I ain't performing or planning to yet! :anger: Maybe queue somethin' up first!",
            true,
        )
        .await;
    }

    let guild_name = manager
        .guild_id()
        .name(&ctx.cache)
        .unwrap_or_else(|| "this server".to_string());
    let pages = embeds::create_queue_embeds(
        &guild_name,
        &state,
        bot.config.max_queue_page_size,
        bot.color(),
    );
    let page_count = pages.len();
    let mut page = 0;

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(pages[page].clone())
                    .components(buttons::create_page_buttons(page, page_count)),
            ),
        )
        .await?;

    if page_count < 2 {
        return Ok(());
    }

    let message = command.get_response(&ctx.http).await?;
    let mut interactions = message
        .await_component_interactions(ctx)
        .timeout(bot.config.interact_lifetime())
        .stream();

    while let Some(interaction) = interactions.next().await {
        page = buttons::page_index_from_button(&interaction.data.custom_id, page, page_count);
        update_message(
            ctx,
            &interaction,
            vec![pages[page].clone()],
            buttons::create_page_buttons(page, page_count),
        )
        .await?;
    }

    expire(ctx, command).await
}

async fn handle_remove(
    ctx: &Context,
    command: &CommandInteraction,
    manager: &GuildMusicManager,
) -> Result<()> {
    let mut ranges = parse_ranges(option_str(command, "positions").unwrap_or_default());
    ranges.sort_by(|a, b| b.0.cmp(&a.0));

    let removed = manager.remove(&ranges);
    match removed.as_slice() {
        [] => reply(ctx, command, NOT_FOUND, true).await,
        [item] => {
            let content = format!(":white_check_mark: **Cut** `{}` from performances!", item.title);
            reply(ctx, command, &content, false).await
        }
        items => {
            let content = format!(":white_check_mark: **Cut** `{}` performances!", items.len());
            reply(ctx, command, &content, false).await
        }
    }
}

async fn handle_move(
    ctx: &Context,
    command: &CommandInteraction,
    manager: &GuildMusicManager,
) -> Result<()> {
    let Some((start, count)) = parse_ranges(option_str(command, "position").unwrap_or_default())
        .into_iter()
        .next()
    else {
        return reply(ctx, command, "What'cha doin? :anger: Enter a valid range!", true).await;
    };

    let to = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "new_position")
        .and_then(|opt| opt.value.as_i64())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(0) as usize;

    let moved = manager
        .move_range(start, count, to)
        .filter(|moved| !moved.items.is_empty());
    let Some(moved) = moved else {
        return reply(ctx, command, NOT_FOUND, true).await;
    };

    let what = match moved.items.as_slice() {
        [item] => format!("`{}`", item.title),
        items => format!("`{}` performances", items.len()),
    };
    let content = format!(
        ":white_check_mark: **Moved** {} to **`#{}`** in the queue!",
        what,
        moved.index + 1
    );
    reply(ctx, command, &content, false).await
}

async fn handle_clear(
    ctx: &Context,
    command: &CommandInteraction,
    manager: &GuildMusicManager,
) -> Result<()> {
    if let Err(reason) = ensure_listening(ctx, manager, command.user.id) {
        return reply(ctx, command, reason, true).await;
    }

    let state = manager.state();
    if state.playing.is_none() && state.queue.is_empty() {
        return reply(ctx, command, ":face_with_raised_eyebrow: There's nothin' to clear...", true).await;
    }

    manager.clear();
    reply(
        ctx,
        command,
        ":microphone2: Don't really like cuttin' the cord but ya the boss!",
        false,
    )
    .await
}

async fn handle_loop(
    ctx: &Context,
    command: &CommandInteraction,
    manager: &GuildMusicManager,
) -> Result<()> {
    if let Err(reason) = ensure_listening(ctx, manager, command.user.id) {
        return reply(ctx, command, reason, true).await;
    }

    let looping = if manager.state().playing.is_some() {
        manager.toggle_loop()
    } else {
        None
    };
    let Some(looping) = looping else {
        return reply(ctx, command, ":face_with_raised_eyebrow: I ain't playin' anything...", true).await;
    };

    let content = if looping {
        ":white_check_mark: :repeat_one:"
    } else {
        ":x: :repeat_one:"
    };
    reply(ctx, command, content, false).await
}

async fn handle_disconnect(
    ctx: &Context,
    command: &CommandInteraction,
    manager: &GuildMusicManager,
) -> Result<()> {
    if manager.disconnect() {
        reply(ctx, command, ":wave: Goodbye...", false).await
    } else {
        reply(ctx, command, NOT_IN_VOICE, true).await
    }
}

async fn handle_invite(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(embeds::EMPTY_UNICODE)
                    .components(vec![buttons::create_invite_button(command.application_id.get())])
                    .ephemeral(true),
            ),
        )
        .await?;

    Ok(())
}

// Funciones auxiliares

async fn reply(ctx: &Context, command: &CommandInteraction, content: &str, ephemeral: bool) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;

    Ok(())
}

async fn update_message(
    ctx: &Context,
    interaction: &ComponentInteraction,
    embeds: Vec<CreateEmbed>,
    components: Vec<CreateActionRow>,
) -> Result<()> {
    interaction
        .create_response(
            &ctx.http,
            CreateInteractionResponse::UpdateMessage(
                CreateInteractionResponseMessage::new()
                    .content("")
                    .embeds(embeds)
                    .components(components),
            ),
        )
        .await?;

    Ok(())
}

/// Deja la respuesta con un botón deshabilitado cuando el colector termina.
async fn expire(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .edit_response(
            &ctx.http,
            EditInteractionResponse::new().components(vec![buttons::create_expired_button()]),
        )
        .await?;

    Ok(())
}

fn edit_from(reply: PlayReply) -> EditInteractionResponse {
    match reply {
        PlayReply::Content(content) => EditInteractionResponse::new().content(content).embeds(Vec::new()),
        PlayReply::Embed(embed) => EditInteractionResponse::new().content("").embeds(vec![embed]),
    }
}

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn requester_of(command: &CommandInteraction) -> Requester {
    Requester::new(command.user.id, command.user.tag())
        .with_nickname(command.member.as_ref().and_then(|member| member.nick.clone()))
}

/// Canal de voz del usuario con los permisos del bot en él.
fn voice_channel_of(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<VoiceChannelRef> {
    let bot_id = ctx.cache.current_user().id;
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    let channel_id = guild.voice_states.get(&user_id)?.channel_id?;
    let channel = guild.channels.get(&channel_id)?;
    let bot_permissions = guild
        .members
        .get(&bot_id)
        .map(|member| guild.user_permissions_in(channel, member));

    Some(VoiceChannelRef {
        id: channel_id,
        name: channel.name.clone(),
        bot_permissions,
    })
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild.voice_states.get(&user_id)?.channel_id
}

/// El usuario tiene que estar en el mismo canal que el bot.
fn ensure_listening(
    ctx: &Context,
    manager: &GuildMusicManager,
    user_id: UserId,
) -> Result<(), &'static str> {
    let bot_channel = manager.voice_channel().ok_or(NOT_IN_VOICE)?;
    if user_voice_channel(ctx, manager.guild_id(), user_id) != Some(bot_channel) {
        return Err(NOT_LISTENING);
    }
    Ok(())
}

impl MusicBot {
    fn color(&self) -> Colour {
        Colour::new(self.config.primary_color)
    }
}
