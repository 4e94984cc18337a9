use serenity::{
    all::ButtonStyle,
    builder::{
        CreateActionRow, CreateButton, CreateSelectMenu, CreateSelectMenuKind,
        CreateSelectMenuOption,
    },
    model::Permissions,
};

use crate::music::QueueItem;

use super::embeds::SEARCH_PAGE_SIZE;

/// IDs personalizados para los componentes
pub mod button_ids {
    pub const FIRST_PAGE: &str = "frst_page";
    pub const PREV_PAGE: &str = "prev_page";
    pub const CURRENT_PAGE: &str = "curr_page";
    pub const NEXT_PAGE: &str = "next_page";
    pub const LAST_PAGE: &str = "last_page";
    pub const RESULT_SELECT: &str = "result_select_menu";
    pub const SELECT_MORE: &str = "search_again_button";
    pub const EXPIRED: &str = "interaction_expired";
}

/// Botones de paginación. Con dos páginas solo aparecen anterior/actual/siguiente.
pub fn create_page_buttons(page: usize, page_count: usize) -> Vec<CreateActionRow> {
    if page_count < 2 {
        return Vec::new();
    }

    let last = page_count - 1;
    let previous = CreateButton::new(button_ids::PREV_PAGE)
        .emoji('◀')
        .style(ButtonStyle::Primary)
        .disabled(page == 0);
    let current = CreateButton::new(button_ids::CURRENT_PAGE)
        .label(format!("Page {}/{}", page + 1, page_count))
        .style(ButtonStyle::Secondary)
        .disabled(true);
    let next = CreateButton::new(button_ids::NEXT_PAGE)
        .emoji('▶')
        .style(ButtonStyle::Primary)
        .disabled(page == last);

    let buttons = if page_count > 2 {
        vec![
            CreateButton::new(button_ids::FIRST_PAGE)
                .emoji('⏮')
                .style(ButtonStyle::Primary)
                .disabled(page < 2),
            previous,
            current,
            next,
            CreateButton::new(button_ids::LAST_PAGE)
                .emoji('⏭')
                .style(ButtonStyle::Primary)
                .disabled(page + 2 >= page_count),
        ]
    } else {
        vec![previous, current, next]
    };

    vec![CreateActionRow::Buttons(buttons)]
}

/// Nueva página tras pulsar `id`; otros ids dejan la página igual.
pub fn page_index_from_button(id: &str, page: usize, page_count: usize) -> usize {
    match id {
        button_ids::FIRST_PAGE => 0,
        button_ids::PREV_PAGE => page.saturating_sub(1),
        button_ids::NEXT_PAGE => (page + 1).min(page_count.saturating_sub(1)),
        button_ids::LAST_PAGE => page_count.saturating_sub(1),
        _ => page,
    }
}

/// Menú con los resultados de la página; el valor es el índice absoluto.
pub fn create_result_select(results: &[QueueItem], page: usize) -> CreateActionRow {
    let start = page * SEARCH_PAGE_SIZE;
    let options = results
        .iter()
        .enumerate()
        .skip(start)
        .take(SEARCH_PAGE_SIZE)
        .map(|(index, item)| {
            let description: String = item.title.chars().take(100).collect();
            CreateSelectMenuOption::new(format!("#{}", index + 1), index.to_string())
                .description(description)
        })
        .collect();

    CreateActionRow::SelectMenu(
        CreateSelectMenu::new(button_ids::RESULT_SELECT, CreateSelectMenuKind::String { options })
            .placeholder("Please Select a Search Result")
            .min_values(1)
            .max_values(1),
    )
}

pub fn create_select_more_button() -> CreateActionRow {
    CreateActionRow::Buttons(vec![CreateButton::new(button_ids::SELECT_MORE)
        .emoji('🔎')
        .label("Select More")
        .style(ButtonStyle::Primary)])
}

/// Sustituye los componentes cuando el colector termina.
pub fn create_expired_button() -> CreateActionRow {
    CreateActionRow::Buttons(vec![CreateButton::new(button_ids::EXPIRED)
        .label("Interaction Expired")
        .style(ButtonStyle::Secondary)
        .disabled(true)])
}

/// Permisos que el bot pide al ser invitado.
pub fn invite_permissions() -> Permissions {
    Permissions::VIEW_CHANNEL
        | Permissions::SEND_MESSAGES
        | Permissions::EMBED_LINKS
        | Permissions::CONNECT
        | Permissions::SPEAK
}

pub fn invite_url(application_id: u64) -> String {
    format!(
        "https://discord.com/api/oauth2/authorize?client_id={}&permissions={}&scope=bot%20applications.commands",
        application_id,
        invite_permissions().bits()
    )
}

pub fn create_invite_button(application_id: u64) -> CreateActionRow {
    CreateActionRow::Buttons(vec![
        CreateButton::new_link(invite_url(application_id)).label("Invite Me!")
    ])
}
