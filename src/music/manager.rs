use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::model::{
    id::{ChannelId, GuildId, UserId},
    Permissions,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    error::{PlayError, SessionError},
    item::{total_duration, QueueItem, Requester},
    session::{Enqueued, Moved, PlaybackSession, SessionSettings, SessionSnapshot},
};
use crate::{
    sources::{SearchProvider, StreamProvider},
    voice::{VoiceConnection, VoiceTransport},
};

/// Canal de voz pedido, con los permisos efectivos del bot en él.
#[derive(Debug, Clone)]
pub struct VoiceChannelRef {
    pub id: ChannelId,
    pub name: String,
    pub bot_permissions: Option<Permissions>,
}

impl VoiceChannelRef {
    pub fn can_join(&self) -> bool {
        self.bot_permissions
            .is_some_and(|permissions| permissions.contains(Permissions::CONNECT | Permissions::SPEAK))
    }
}

/// Miembros presentes en un canal de voz.
#[derive(Debug, Clone)]
pub struct ChannelOccupancy {
    pub channel_id: ChannelId,
    pub members: Vec<UserId>,
}

/// Colaboradores compartidos por todos los guilds.
#[derive(Clone)]
pub struct MusicServices {
    pub transport: Arc<dyn VoiceTransport>,
    pub provider: Arc<dyn StreamProvider>,
    pub searcher: Arc<dyn SearchProvider>,
    pub settings: SessionSettings,
    pub max_queue_items: usize,
}

/// Resultado de `play` con las cifras para estimar la espera.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedBatch {
    pub is_playing_now: bool,
    pub current_duration_left: u64,
    pub queue_before_duration: u64,
    pub items_start: usize,
    pub items_duration: u64,
    pub items: Vec<QueueItem>,
}

impl QueuedBatch {
    /// Cifras de un lote encolado sobre el estado `before`.
    pub fn compute(before: &SessionSnapshot, items: Vec<QueueItem>, now: DateTime<Utc>) -> Self {
        Self {
            is_playing_now: before.playing.is_none() && before.queue.is_empty(),
            current_duration_left: before.current_duration_left(now),
            queue_before_duration: total_duration(&before.queue),
            items_start: before.queue.len(),
            items_duration: total_duration(&items),
            items,
        }
    }

    /// Segundos hasta que empiece el primer item del lote.
    pub fn estimated_wait(&self) -> u64 {
        self.queue_before_duration + self.current_duration_left
    }
}

/// Música de un guild: crea y desecha la sesión ligada a la conexión de voz.
pub struct GuildMusicManager {
    guild_id: GuildId,
    services: MusicServices,
    session: Mutex<Option<PlaybackSession>>,
    opening: tokio::sync::Mutex<()>,
}

impl GuildMusicManager {
    pub fn new(guild_id: GuildId, services: MusicServices) -> Self {
        if let Some(connection) = services.transport.connection(guild_id) {
            info!("🧹 Destruyendo conexión de voz previa en guild {}", guild_id);
            connection.destroy();
        }

        Self {
            guild_id,
            services,
            session: Mutex::new(None),
            opening: tokio::sync::Mutex::new(()),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn max_queue_items(&self) -> usize {
        self.services.max_queue_items
    }

    /// Sesión ya ligada a la conexión viva, sin crear nada.
    fn peek_session(&self) -> Option<PlaybackSession> {
        let connection = self.services.transport.connection(self.guild_id)?;
        self.session
            .lock()
            .as_ref()
            .filter(|session| session.connection_id() == connection.id() && !session.is_destroyed())
            .cloned()
    }

    /// Sesión de la conexión viva; se crea si la anterior quedó obsoleta.
    fn current_session(&self) -> Option<PlaybackSession> {
        let connection = self.services.transport.connection(self.guild_id)?;
        Some(self.bind(connection))
    }

    fn bind(&self, connection: Arc<dyn VoiceConnection>) -> PlaybackSession {
        let mut slot = self.session.lock();

        if let Some(session) = slot.as_ref() {
            if session.connection_id() == connection.id() && !session.is_destroyed() {
                return session.clone();
            }
        }

        if let Some(stale) = slot.take() {
            debug!(
                "♻️ Reemplazando sesión obsoleta de guild {} (conexión #{})",
                self.guild_id,
                stale.connection_id()
            );
            stale.destroy();
        }

        let session = PlaybackSession::new(
            self.guild_id,
            connection,
            self.services.provider.clone(),
            self.services.settings.clone(),
        );
        *slot = Some(session.clone());
        session
    }

    async fn obtain_session(
        &self,
        channel: Option<&VoiceChannelRef>,
    ) -> Result<PlaybackSession, PlayError> {
        let _opening = self.opening.lock().await;

        if let Some(session) = self.current_session() {
            return Ok(session);
        }

        let channel = channel.ok_or(PlayError::NotInVoiceChannel)?;
        let connection = self
            .services
            .transport
            .open_connection(self.guild_id, channel.id)
            .await
            .map_err(PlayError::Connection)?;

        Ok(self.bind(connection))
    }

    /// Comprueba capacidad y permisos sin efectos secundarios.
    pub fn can_play(&self, channel: Option<&VoiceChannelRef>) -> Result<(), PlayError> {
        if self.services.transport.connection(self.guild_id).is_some() {
            let queued = self.peek_session().map_or(0, |session| session.queue_len());
            if queued >= self.services.max_queue_items {
                return Err(PlayError::QueueFull {
                    max: self.services.max_queue_items,
                });
            }
            return Ok(());
        }

        let channel = channel.ok_or(PlayError::NotInVoiceChannel)?;
        if !channel.can_join() {
            return Err(PlayError::MissingPermissions {
                channel: channel.name.clone(),
            });
        }

        Ok(())
    }

    pub async fn search(&self, query: &str, multi: bool) -> Result<Vec<QueueItem>, PlayError> {
        info!("🔍 Buscando en guild {}: {}", self.guild_id, query);
        self.services
            .searcher
            .search(query, multi)
            .await
            .map_err(PlayError::Search)
    }

    /// Encola `items` a nombre de `requester`, uniéndose a `channel` si hace falta.
    pub async fn play(
        &self,
        items: Vec<QueueItem>,
        channel: Option<&VoiceChannelRef>,
        requester: &Requester,
    ) -> Result<QueuedBatch, PlayError> {
        self.can_play(channel)?;

        let session = self.obtain_session(channel).await?;
        let items: Vec<QueueItem> = items
            .into_iter()
            .map(|item| item.with_requester(requester.clone()))
            .collect();

        let admitted = session.enqueue_within(items, self.services.max_queue_items)?;
        if admitted.items.is_empty() {
            return Err(PlayError::QueueFull {
                max: self.services.max_queue_items,
            });
        }

        for item in &admitted.items {
            info!("➕ Encolando \"{}\" - link: {}", item.title, item.url());
        }

        let count = admitted.items.len();
        let batch = QueuedBatch::compute(&admitted.before, admitted.items, Utc::now());

        if !admitted.processing.outcome().await.is_success() {
            return Err(PlayError::Queueing { count });
        }

        Ok(batch)
    }

    pub fn state(&self) -> SessionSnapshot {
        self.current_session()
            .map(|session| session.state())
            .unwrap_or_default()
    }

    pub fn enqueue(&self, items: Vec<QueueItem>, index: Option<usize>) -> Option<Enqueued> {
        let session = self.current_session()?;
        self.log_destroyed(session.enqueue(items, index))
    }

    pub fn remove(&self, ranges: &[(usize, usize)]) -> Vec<QueueItem> {
        self.current_session()
            .and_then(|session| self.log_destroyed(session.remove(ranges)))
            .unwrap_or_default()
    }

    pub fn move_range(&self, start: usize, count: usize, to: usize) -> Option<Moved> {
        let session = self.current_session()?;
        self.log_destroyed(session.move_range(start, count, to))
    }

    pub fn skip(&self) -> bool {
        self.current_session()
            .and_then(|session| self.log_destroyed(session.skip()))
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Some(session) = self.current_session() {
            self.log_destroyed(session.clear());
        }
    }

    pub fn toggle_loop(&self) -> Option<bool> {
        let session = self.current_session()?;
        self.log_destroyed(session.toggle_loop())
    }

    /// Canal de voz donde está el bot, si hay conexión.
    pub fn voice_channel(&self) -> Option<ChannelId> {
        self.services
            .transport
            .connection(self.guild_id)
            .map(|connection| connection.channel_id())
    }

    /// Destruye la conexión; la sesión cae con ella.
    pub fn disconnect(&self) -> bool {
        match self.services.transport.connection(self.guild_id) {
            Some(connection) => {
                info!("👋 Desconectando de guild {}", self.guild_id);
                connection.destroy();
                true
            }
            None => false,
        }
    }

    /// Sale del canal si el bot se quedó solo en él.
    pub fn handle_voice_state_update(&self, occupancy: &ChannelOccupancy, bot_id: UserId) -> bool {
        let Some(connection) = self.services.transport.connection(self.guild_id) else {
            return false;
        };

        let alone = occupancy.channel_id == connection.channel_id()
            && occupancy.members.len() == 1
            && occupancy.members.contains(&bot_id);

        if alone {
            info!("🔇 Canal vacío en guild {}, saliendo", self.guild_id);
            connection.destroy();
        }
        alone
    }

    fn log_destroyed<T>(&self, result: Result<T, SessionError>) -> Option<T> {
        result
            .map_err(|e| warn!("⚠️ Operación descartada en guild {}: {}", self.guild_id, e))
            .ok()
    }
}
