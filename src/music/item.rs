use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::sync::atomic::{AtomicBool, Ordering};

/// Miembro que pidió un item.
///
/// Es solo una referencia: la cola no controla la vida del miembro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: UserId,
    pub tag: String,
    pub nickname: Option<String>,
}

impl Requester {
    pub fn new(user_id: UserId, tag: impl Into<String>) -> Self {
        Self {
            user_id,
            tag: tag.into(),
            nickname: None,
        }
    }

    pub fn with_nickname(mut self, nickname: Option<String>) -> Self {
        self.nickname = nickname;
        self
    }

    /// `apodo (usuario#0000)` o solo el tag si no hay apodo.
    pub fn display_name(&self) -> String {
        match &self.nickname {
            Some(nickname) => format!("{} ({})", nickname, self.tag),
            None => self.tag.clone(),
        }
    }
}

/// Una unidad reproducible de la cola.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: String,
    pub title: String,
    pub channel_name: String,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: u64,
    pub requester: Option<Requester>,
}

impl QueueItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            channel_name: String::new(),
            thumbnail_url: None,
            duration_seconds: 0,
            requester: None,
        }
    }

    pub fn with_channel_name(mut self, channel_name: impl Into<String>) -> Self {
        self.channel_name = channel_name.into();
        self
    }

    pub fn with_thumbnail(mut self, thumbnail_url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(thumbnail_url.into());
        self
    }

    pub fn with_duration(mut self, duration_seconds: u64) -> Self {
        self.duration_seconds = duration_seconds;
        self
    }

    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = Some(requester);
        self
    }

    pub fn url(&self) -> String {
        watch_url(&self.id)
    }
}

pub fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}

/// Suma de duraciones en segundos.
pub fn total_duration<'a>(items: impl IntoIterator<Item = &'a QueueItem>) -> u64 {
    items.into_iter().map(|item| item.duration_seconds).sum()
}

/// Metadatos adjuntos al recurso que está sonando.
///
/// `loopable` se limpia al hacer skip para que el loop no repita ese item.
#[derive(Debug)]
pub struct PlaybackTag {
    pub item: QueueItem,
    pub started_at: DateTime<Utc>,
    loopable: AtomicBool,
}

impl PlaybackTag {
    pub fn new(item: QueueItem) -> Self {
        Self {
            item,
            started_at: Utc::now(),
            loopable: AtomicBool::new(true),
        }
    }

    pub fn is_loopable(&self) -> bool {
        self.loopable.load(Ordering::Acquire)
    }

    pub fn break_loop(&self) {
        self.loopable.store(false, Ordering::Release);
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn break_loop_clears_loopable() {
        let tag = PlaybackTag::new(QueueItem::new("abc", "Song"));
        assert!(tag.is_loopable());

        tag.break_loop();
        assert!(!tag.is_loopable());
    }

    #[test]
    fn requester_display_prefers_nickname() {
        let plain = Requester::new(UserId::new(1), "mic#0001");
        assert_eq!(plain.display_name(), "mic#0001");

        let nick = plain.with_nickname(Some("Mic".to_string()));
        assert_eq!(nick.display_name(), "Mic (mic#0001)");
    }

    #[test]
    fn total_duration_sums_items() {
        let items = vec![
            QueueItem::new("a", "A").with_duration(60),
            QueueItem::new("b", "B").with_duration(90),
        ];
        assert_eq!(total_duration(&items), 150);
    }
}
