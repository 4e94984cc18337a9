//! # Voice Module
//!
//! Seam between the playback core and the voice transport.
//!
//! The core never talks to songbird directly. It sees three traits:
//!
//! - [`VoiceTransport`]: finds or opens the connection of a guild
//! - [`VoiceConnection`]: one live voice connection with its lifecycle
//! - [`OutputPlayer`]: the single audio output subscribed to a connection
//!
//! Connection and player changes are pushed as [`VoiceEvent`]s through an
//! unbounded channel handed over in [`VoiceConnection::subscribe`].
//! The songbird-backed implementation lives in [`driver`].

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::input::Input;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{music::item::PlaybackTag, sources::{AudioStream, MediaType}};

pub mod driver;

pub use driver::SongbirdTransport;

/// Close code del websocket de voz cuando el bot fue movido o expulsado.
pub const CLOSE_CODE_DISCONNECTED: u16 = 4014;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    WebSocketClose(Option<u16>),
    Timeout,
    Other,
}

/// Estado de la conexión de voz, con el motivo de desconexión.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Signalling,
    Connecting,
    Ready,
    Disconnected(DisconnectReason),
    Destroyed,
}

/// Discriminante de [`ConnectionState`] sin datos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

impl ConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Signalling => ConnectionStatus::Signalling,
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Ready => ConnectionStatus::Ready,
            Self::Disconnected(_) => ConnectionStatus::Disconnected,
            Self::Destroyed => ConnectionStatus::Destroyed,
        }
    }

    /// 4014: movido de canal o expulsado, no se debe reconectar a mano.
    pub fn is_kick_ambiguous(&self) -> bool {
        matches!(
            self,
            Self::Disconnected(DisconnectReason::WebSocketClose(Some(CLOSE_CODE_DISCONNECTED)))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Playing,
    Paused,
}

/// Estado del reproductor: fuera de `Idle` siempre hay un recurso.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub status: PlayerStatus,
    pub resource: Option<Arc<PlaybackTag>>,
}

impl PlayerState {
    pub fn idle() -> Self {
        Self {
            status: PlayerStatus::Idle,
            resource: None,
        }
    }

    pub fn playing(resource: Arc<PlaybackTag>) -> Self {
        Self {
            status: PlayerStatus::Playing,
            resource: Some(resource),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == PlayerStatus::Idle
    }
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    StateChange { old: PlayerState, new: PlayerState },
    Error { resource: Arc<PlaybackTag>, message: String },
}

#[derive(Debug, Clone)]
pub enum VoiceEvent {
    Connection(ConnectionState),
    Player(PlayerEvent),
}

pub type VoiceEventSender = mpsc::UnboundedSender<VoiceEvent>;

/// Audio listo para el reproductor, etiquetado con el item que representa.
pub struct AudioResource {
    pub input: Input,
    pub media_type: MediaType,
    pub tag: Arc<PlaybackTag>,
}

impl AudioResource {
    pub fn new(stream: AudioStream, tag: PlaybackTag) -> Self {
        Self {
            input: stream.input,
            media_type: stream.media_type,
            tag: Arc::new(tag),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no se pudo unir al canal de voz: {0}")]
    Join(String),
    #[error("no se pudo reproducir el recurso: {0}")]
    Play(String),
    #[error("el gestor de voz no está disponible")]
    Unavailable,
}

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Conexión viva del guild, si existe y no fue destruida.
    fn connection(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceConnection>>;

    /// Abre una conexión nueva hacia `channel_id`.
    async fn open_connection(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, TransportError>;
}

pub trait VoiceConnection: Send + Sync {
    /// Identificador único de esta instancia de conexión.
    fn id(&self) -> u64;
    fn channel_id(&self) -> ChannelId;
    fn state(&self) -> ConnectionState;
    fn destroy(&self);
    fn rejoin(&self);
    /// Crea el reproductor suscrito a esta conexión; los eventos de ambos
    /// llegan por `events`.
    fn subscribe(&self, events: VoiceEventSender) -> Arc<dyn OutputPlayer>;
}

#[async_trait]
pub trait OutputPlayer: Send + Sync {
    fn state(&self) -> PlayerState;
    async fn play(&self, resource: AudioResource) -> Result<(), TransportError>;
    /// Detiene el recurso actual; el paso a `Idle` llega como evento.
    fn stop(&self, force: bool) -> bool;
}
