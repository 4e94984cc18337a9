//! Fakes shared by the unit tests: an in-memory voice transport whose
//! connection and player are driven by hand, plus stream helpers.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::input::{File, Input};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    music::item::{PlaybackTag, QueueItem},
    sources::{AudioStream, MediaType, MockStreamProvider, StreamError, StreamOptions, StreamProvider},
    voice::{
        AudioResource, ConnectionState, OutputPlayer, PlayerEvent, PlayerState, TransportError,
        VoiceConnection, VoiceEvent, VoiceEventSender, VoiceTransport,
    },
};

pub fn guild() -> GuildId {
    GuildId::new(1)
}

pub fn channel() -> ChannelId {
    ChannelId::new(10)
}

pub fn item(id: &str, seconds: u64) -> QueueItem {
    QueueItem::new(id, format!("Song {}", id)).with_duration(seconds)
}

pub fn items(ids: &[&str]) -> Vec<QueueItem> {
    ids.iter().map(|id| item(id, 60)).collect()
}

pub fn silent_stream() -> AudioStream {
    AudioStream {
        input: Input::from(File::new("silence.ogg")),
        media_type: MediaType::Arbitrary,
    }
}

/// Proveedor mock que abre todo salvo los ids en `broken`.
pub fn provider_failing_on(broken: &[&str]) -> Arc<dyn StreamProvider> {
    let broken: HashSet<String> = broken.iter().map(|id| id.to_string()).collect();
    let mut provider = MockStreamProvider::new();
    provider
        .expect_open_audio_stream()
        .returning(move |id, _| {
            if broken.contains(id) {
                Err(StreamError::Unavailable {
                    id: id.to_string(),
                    message: "video unavailable".to_string(),
                })
            } else {
                Ok(silent_stream())
            }
        });
    Arc::new(provider)
}

pub fn working_provider() -> Arc<dyn StreamProvider> {
    provider_failing_on(&[])
}

/// Proveedor que nunca termina de abrir los ids en `stalled`.
pub struct StallingProvider {
    pub stalled: HashSet<String>,
}

#[async_trait]
impl StreamProvider for StallingProvider {
    async fn open_audio_stream(
        &self,
        track_id: &str,
        _options: &StreamOptions,
    ) -> Result<AudioStream, StreamError> {
        if self.stalled.contains(track_id) {
            std::future::pending::<()>().await;
        }
        Ok(silent_stream())
    }
}

/// Deja correr las tareas pendientes; con el reloj pausado avanza en cuanto todo está ocioso.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub struct FakePlayer {
    state: Mutex<PlayerState>,
    events: VoiceEventSender,
    played: Mutex<Vec<String>>,
    overlapped: AtomicBool,
}

impl FakePlayer {
    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(VoiceEvent::Player(event));
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    pub fn current(&self) -> Option<Arc<PlaybackTag>> {
        self.state.lock().resource.clone()
    }

    pub fn current_id(&self) -> Option<String> {
        self.current().map(|tag| tag.item.id.clone())
    }

    /// `play` llamado mientras otro recurso seguía sonando.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    /// El recurso actual termina normalmente.
    pub fn finish(&self) {
        let old = std::mem::replace(&mut *self.state.lock(), PlayerState::idle());
        if !old.is_idle() {
            self.emit(PlayerEvent::StateChange {
                old,
                new: PlayerState::idle(),
            });
        }
    }

    /// El recurso actual falla a mitad de reproducción.
    pub fn fail(&self, message: &str) {
        if let Some(resource) = self.current() {
            self.emit(PlayerEvent::Error {
                resource,
                message: message.to_string(),
            });
        }
        self.finish();
    }
}

#[async_trait]
impl OutputPlayer for FakePlayer {
    fn state(&self) -> PlayerState {
        self.state.lock().clone()
    }

    async fn play(&self, resource: AudioResource) -> Result<(), TransportError> {
        let new = PlayerState::playing(resource.tag.clone());
        let old = std::mem::replace(&mut *self.state.lock(), new.clone());
        if !old.is_idle() {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.played.lock().push(resource.tag.item.id.clone());
        self.emit(PlayerEvent::StateChange { old, new });
        Ok(())
    }

    fn stop(&self, _force: bool) -> bool {
        if self.state.lock().is_idle() {
            return false;
        }
        self.finish();
        true
    }
}

pub struct FakeConnection {
    id: u64,
    channel_id: ChannelId,
    state: Mutex<ConnectionState>,
    events: Mutex<Option<VoiceEventSender>>,
    player: Mutex<Option<Arc<FakePlayer>>>,
    rejoins: AtomicU32,
}

impl FakeConnection {
    pub fn new(id: u64, channel_id: ChannelId, initial: ConnectionState) -> Arc<Self> {
        Arc::new(Self {
            id,
            channel_id,
            state: Mutex::new(initial),
            events: Mutex::new(None),
            player: Mutex::new(None),
            rejoins: AtomicU32::new(0),
        })
    }

    pub fn ready() -> Arc<Self> {
        Self::new(1, channel(), ConnectionState::Ready)
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(VoiceEvent::Connection(state));
        }
    }

    pub fn rejoins(&self) -> u32 {
        self.rejoins.load(Ordering::SeqCst)
    }

    pub fn player(&self) -> Arc<FakePlayer> {
        self.player
            .lock()
            .clone()
            .expect("la conexión no tiene reproductor suscrito")
    }
}

impl VoiceConnection for FakeConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn destroy(&self) {
        if self.state() != ConnectionState::Destroyed {
            self.set_state(ConnectionState::Destroyed);
        }
    }

    fn rejoin(&self) {
        self.rejoins.fetch_add(1, Ordering::SeqCst);
    }

    fn subscribe(&self, events: VoiceEventSender) -> Arc<dyn OutputPlayer> {
        *self.events.lock() = Some(events.clone());
        let player = Arc::new(FakePlayer {
            state: Mutex::new(PlayerState::idle()),
            events,
            played: Mutex::new(Vec::new()),
            overlapped: AtomicBool::new(false),
        });
        *self.player.lock() = Some(player.clone());
        player
    }
}

/// Transporte en memoria: cada `open_connection` crea una [`FakeConnection`] nueva.
pub struct FakeTransport {
    initial: ConnectionState,
    next_id: AtomicU64,
    connections: Mutex<HashMap<GuildId, Arc<FakeConnection>>>,
    opened: AtomicU32,
}

impl FakeTransport {
    pub fn new(initial: ConnectionState) -> Arc<Self> {
        Arc::new(Self {
            initial,
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
            opened: AtomicU32::new(0),
        })
    }

    pub fn ready() -> Arc<Self> {
        Self::new(ConnectionState::Ready)
    }

    /// Última conexión abierta para el guild, viva o no.
    pub fn last(&self, guild_id: GuildId) -> Option<Arc<FakeConnection>> {
        self.connections.lock().get(&guild_id).cloned()
    }

    pub fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn insert(&self, guild_id: GuildId, connection: Arc<FakeConnection>) {
        self.connections.lock().insert(guild_id, connection);
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    fn connection(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceConnection>> {
        let connection = self.last(guild_id)?;
        if connection.state() == ConnectionState::Destroyed {
            return None;
        }
        let connection: Arc<dyn VoiceConnection> = connection;
        Some(connection)
    }

    async fn open_connection(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let connection = FakeConnection::new(id, channel_id, self.initial);
        self.insert(guild_id, connection.clone());
        self.opened.fetch_add(1, Ordering::SeqCst);
        let connection: Arc<dyn VoiceConnection> = connection;
        Ok(connection)
    }
}
