use serenity::{
    all::Colour,
    builder::{CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter},
};

use crate::music::{item::total_duration, QueueItem, QueuedBatch, SessionSnapshot};

/// Algunos valores de campo no pueden ir vacíos.
pub const EMPTY_UNICODE: &str = "\u{200b}";

/// Resultados de búsqueda por página.
pub const SEARCH_PAGE_SIZE: usize = 5;

const FIELD_VALUE_LIMIT: usize = 1024;

/// `m:ss`, con los minutos sin tope.
pub fn format_seconds(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{}...", cut)
}

/// Respuesta a un `/play` o a una selección de `/search`.
#[derive(Debug, Clone)]
pub enum PlayReply {
    Content(String),
    Embed(CreateEmbed),
}

pub fn create_play_reply(batch: &QueuedBatch, color: Colour) -> PlayReply {
    let wait = format_seconds(batch.estimated_wait());

    match batch.items.as_slice() {
        [item] if batch.is_playing_now => PlayReply::Content(format!(
            ":arrow_forward: **Performing** :microphone: `{}` **now!**",
            item.title
        )),
        [item] => {
            let mut embed = CreateEmbed::default()
                .color(color)
                .author(CreateEmbedAuthor::new("Performance Queued"))
                .description(format!("[**{}**]({})", item.title, item.url()))
                .field("Channel", or_empty(&item.channel_name), true)
                .field("Duration", format_seconds(item.duration_seconds), true)
                .field("Estimated Wait", wait, true)
                .field("Queue Position", (batch.items_start + 1).to_string(), false);

            if let Some(thumbnail) = &item.thumbnail_url {
                embed = embed.thumbnail(thumbnail);
            }

            PlayReply::Embed(embed)
        }
        items => {
            let position = if batch.is_playing_now {
                "_Now Performing_".to_string()
            } else {
                (batch.items_start + 1).to_string()
            };

            PlayReply::Embed(
                CreateEmbed::default()
                    .color(color)
                    .author(CreateEmbedAuthor::new("Performance Set Queued"))
                    .field("Performances", format!("`{}`", items.len()), true)
                    .field("Duration", format_seconds(batch.items_duration), true)
                    .field("Estimated Wait", wait, true)
                    .field("Queue Position", position, false),
            )
        }
    }
}

fn or_empty(text: &str) -> &str {
    if text.is_empty() {
        EMPTY_UNICODE
    } else {
        text
    }
}

/// Línea de un item de la cola; `position` es base 1.
fn queue_item_line(item: &QueueItem, position: Option<usize>) -> String {
    let prefix = position.map_or(String::new(), |position| format!("**`{}.`** ", position));
    let requester = item
        .requester
        .as_ref()
        .map_or(String::new(), |requester| format!(" Requested by: {}", requester.display_name()));

    format!(
        "{}[{}]({}) | `{}{}`",
        prefix,
        item.title,
        item.url(),
        format_seconds(item.duration_seconds),
        requester
    )
}

/// Páginas de la cola: la primera lleva además la cabecera de lo que suena.
pub fn queue_page_fields(snapshot: &SessionSnapshot, page_size: usize) -> Vec<Vec<String>> {
    let page_size = page_size.max(1);
    let mut first = Vec::new();

    if let Some(playing) = &snapshot.playing {
        let heading = if snapshot.looping {
            "Looping :repeat_one:"
        } else {
            "Performing"
        };
        first.push(format!("__Now {}:__\n{}", heading, queue_item_line(playing, None)));

        if !snapshot.queue.is_empty() {
            let next = if snapshot.looping { "Queue" } else { "Up Next" };
            first.push(format!(":arrow_down:__{}:__:arrow_down:", next));
        }
    }

    let lines: Vec<String> = snapshot
        .queue
        .iter()
        .enumerate()
        .map(|(index, item)| truncate(&queue_item_line(item, Some(index + 1)), FIELD_VALUE_LIMIT))
        .collect();

    let mut pages = Vec::new();
    let mut chunks = lines.chunks(page_size);
    first.extend(chunks.next().unwrap_or_default().iter().cloned());
    pages.push(first);
    pages.extend(chunks.map(<[String]>::to_vec));
    pages
}

pub fn queue_footer(queue: &[QueueItem]) -> Option<String> {
    if queue.is_empty() {
        return None;
    }
    Some(format!(
        "{} song{} in queue | {} total in length",
        queue.len(),
        if queue.len() > 1 { "s" } else { "" },
        format_seconds(total_duration(queue))
    ))
}

/// Embeds de la cola, uno por página.
pub fn create_queue_embeds(
    guild_name: &str,
    snapshot: &SessionSnapshot,
    page_size: usize,
    color: Colour,
) -> Vec<CreateEmbed> {
    let footer = queue_footer(&snapshot.queue);

    queue_page_fields(snapshot, page_size)
        .into_iter()
        .map(|fields| {
            let mut embed = CreateEmbed::default()
                .color(color)
                .title(format!("Performance Queue for {}", guild_name))
                .fields(fields.into_iter().map(|value| (EMPTY_UNICODE, value, false)));

            if let Some(footer) = &footer {
                embed = embed.footer(CreateEmbedFooter::new(footer));
            }
            embed
        })
        .collect()
}

/// Embeds de una página de resultados: cabecera y un embed por resultado.
pub fn create_search_page_embeds(results: &[QueueItem], page: usize, color: Colour) -> Vec<CreateEmbed> {
    let start = page * SEARCH_PAGE_SIZE;
    let mut embeds = vec![CreateEmbed::default()
        .color(color)
        .title(":mag_right: Search Results")];

    embeds.extend(
        results
            .iter()
            .enumerate()
            .skip(start)
            .take(SEARCH_PAGE_SIZE)
            .map(|(index, item)| {
                let mut embed = CreateEmbed::default()
                    .color(color)
                    .description(format!(
                        "**`{}.`** [**{}**]({})",
                        index + 1,
                        item.title,
                        item.url()
                    ))
                    .field("Channel", or_empty(&item.channel_name), true)
                    .field("Duration", format_seconds(item.duration_seconds), true);

                if let Some(thumbnail) = &item.thumbnail_url {
                    embed = embed.thumbnail(thumbnail);
                }
                embed
            }),
    );

    embeds
}

pub fn search_page_count(results: usize) -> usize {
    results.div_ceil(SEARCH_PAGE_SIZE).max(1)
}
