use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    events::{context_data::DisconnectReason as DriverDisconnectReason, CoreEvent},
    model::CloseCode,
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{debug, info, warn};

use super::{
    AudioResource, ConnectionState, ConnectionStatus, DisconnectReason, OutputPlayer,
    PlayerEvent, PlayerState, TransportError, VoiceConnection, VoiceEvent, VoiceEventSender,
    VoiceTransport, CLOSE_CODE_DISCONNECTED,
};

/// Transporte de voz sobre songbird.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    connections: DashMap<GuildId, Arc<SongbirdConnection>>,
    next_id: AtomicU64,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    fn connection(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceConnection>> {
        let connection = self.connections.get(&guild_id).map(|entry| entry.value().clone())?;

        if connection.state() == ConnectionState::Destroyed {
            self.connections
                .remove_if(&guild_id, |_, current| current.id == connection.id);
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
        let call = self.manager.get_or_insert(guild_id);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let link = Arc::new(ConnectionLink::new(guild_id));

        {
            let mut handler = call.lock().await;
            // Una llamada reciclada puede traer handlers de una conexión anterior
            handler.remove_all_global_events();

            for event in [
                CoreEvent::DriverConnect,
                CoreEvent::DriverReconnect,
                CoreEvent::DriverDisconnect,
            ] {
                handler.add_global_event(
                    Event::Core(event),
                    DriverWatcher {
                        link: link.clone(),
                    },
                );
            }
        }

        let connection = Arc::new(SongbirdConnection {
            id,
            guild_id,
            channel_id,
            manager: self.manager.clone(),
            call,
            link,
        });

        info!(
            "🔊 Abriendo conexión de voz #{} en guild {} (canal {})",
            id, guild_id, channel_id
        );
        connection.spawn_join();

        if let Some(stale) = self.connections.insert(guild_id, connection.clone()) {
            debug!("Reemplazando conexión #{} en guild {}", stale.id, guild_id);
        }

        let connection: Arc<dyn VoiceConnection> = connection;
        Ok(connection)
    }
}

/// Estado compartido entre la conexión y los handlers de songbird.
struct ConnectionLink {
    guild_id: GuildId,
    state: Mutex<ConnectionState>,
    events: Mutex<Option<VoiceEventSender>>,
}

impl ConnectionLink {
    fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            state: Mutex::new(ConnectionState::Signalling),
            events: Mutex::new(None),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Aplica la transición y la publica. `Destroyed` es terminal.
    fn transition(&self, next: ConnectionState) -> bool {
        {
            let mut state = self.state.lock();
            if *state == next || *state == ConnectionState::Destroyed {
                return false;
            }
            *state = next;
        }

        debug!("🔌 Conexión de voz en guild {} -> {:?}", self.guild_id, next);
        self.emit(VoiceEvent::Connection(next));
        true
    }

    fn transition_from(&self, expected: ConnectionStatus, next: ConnectionState) -> bool {
        if self.state().status() != expected {
            return false;
        }
        self.transition(next)
    }

    fn emit(&self, event: VoiceEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }
}

pub struct SongbirdConnection {
    id: u64,
    guild_id: GuildId,
    channel_id: ChannelId,
    manager: Arc<Songbird>,
    call: Arc<tokio::sync::Mutex<Call>>,
    link: Arc<ConnectionLink>,
}

impl SongbirdConnection {
    fn spawn_join(&self) {
        let call = self.call.clone();
        let link = self.link.clone();
        let channel_id = self.channel_id;

        tokio::spawn(async move {
            link.transition(ConnectionState::Signalling);

            let joining = {
                let mut handler = call.lock().await;
                handler.join(channel_id).await
            };

            let joined = match joining {
                Ok(join) => {
                    link.transition_from(ConnectionStatus::Signalling, ConnectionState::Connecting);
                    join.await
                }
                Err(e) => Err(e),
            };

            match joined {
                Ok(()) => {
                    link.transition(ConnectionState::Ready);
                }
                Err(e) => {
                    warn!(
                        "❌ Error al unirse al canal {} en guild {}: {:?}",
                        channel_id, link.guild_id, e
                    );
                    link.transition(ConnectionState::Disconnected(DisconnectReason::Other));
                }
            }
        });
    }
}

impl VoiceConnection for SongbirdConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    fn state(&self) -> ConnectionState {
        self.link.state()
    }

    fn destroy(&self) {
        if !self.link.transition(ConnectionState::Destroyed) {
            return;
        }

        info!("👋 Destruyendo conexión de voz #{} en guild {}", self.id, self.guild_id);
        let manager = self.manager.clone();
        let guild_id = self.guild_id;
        tokio::spawn(async move {
            if let Err(e) = manager.remove(guild_id).await {
                debug!("La llamada de guild {} ya no existía: {:?}", guild_id, e);
            }
        });
    }

    fn rejoin(&self) {
        if self.state() == ConnectionState::Destroyed {
            return;
        }
        info!("🔄 Reintentando unión al canal {} en guild {}", self.channel_id, self.guild_id);
        self.spawn_join();
    }

    fn subscribe(&self, events: VoiceEventSender) -> Arc<dyn OutputPlayer> {
        *self.link.events.lock() = Some(events.clone());

        Arc::new(SongbirdPlayer {
            guild_id: self.guild_id,
            call: self.call.clone(),
            slot: Arc::new(Mutex::new(PlayerSlot {
                state: PlayerState::idle(),
                handle: None,
                generation: 0,
            })),
            events,
        })
    }
}

/// Traduce los eventos del driver de songbird a [`ConnectionState`].
struct DriverWatcher {
    link: Arc<ConnectionLink>,
}

#[async_trait]
impl VoiceEventHandler for DriverWatcher {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::DriverConnect(_) => {
                self.link.transition(ConnectionState::Ready);
            }
            EventContext::DriverReconnect(_) => {
                // songbird salta directo a conectado; se publica el paso intermedio
                self.link.transition(ConnectionState::Connecting);
                self.link.transition(ConnectionState::Ready);
            }
            EventContext::DriverDisconnect(data) => {
                let reason = match data.reason {
                    Some(DriverDisconnectReason::WsClosed(Some(CloseCode::Disconnected))) => {
                        DisconnectReason::WebSocketClose(Some(CLOSE_CODE_DISCONNECTED))
                    }
                    Some(DriverDisconnectReason::WsClosed(_)) => DisconnectReason::WebSocketClose(None),
                    Some(DriverDisconnectReason::TimedOut) => DisconnectReason::Timeout,
                    _ => DisconnectReason::Other,
                };
                self.link.transition(ConnectionState::Disconnected(reason));
            }
            _ => {}
        }

        None
    }
}

struct PlayerSlot {
    state: PlayerState,
    handle: Option<TrackHandle>,
    generation: u64,
}

/// Devuelve el estado anterior si la pista `generation` sigue siendo la actual.
fn settle(slot: &Mutex<PlayerSlot>, generation: u64) -> Option<PlayerState> {
    let mut slot = slot.lock();
    if slot.generation != generation || slot.state.is_idle() {
        return None;
    }
    slot.handle = None;
    Some(std::mem::replace(&mut slot.state, PlayerState::idle()))
}

/// Reproductor de una sola pista sobre la llamada de songbird.
pub struct SongbirdPlayer {
    guild_id: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
    slot: Arc<Mutex<PlayerSlot>>,
    events: VoiceEventSender,
}

#[async_trait]
impl OutputPlayer for SongbirdPlayer {
    fn state(&self) -> PlayerState {
        self.slot.lock().state.clone()
    }

    async fn play(&self, resource: AudioResource) -> Result<(), TransportError> {
        let AudioResource {
            input,
            media_type,
            tag,
        } = resource;

        debug!(
            "▶️ Enviando '{}' ({:?}) al driver de guild {}",
            tag.item.title, media_type, self.guild_id
        );

        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input)
        };

        let (old, generation) = {
            let mut slot = self.slot.lock();
            slot.generation += 1;
            slot.handle = Some(handle.clone());
            let old = std::mem::replace(&mut slot.state, PlayerState::playing(tag.clone()));
            (old, slot.generation)
        };

        for (event, errored) in [(TrackEvent::End, false), (TrackEvent::Error, true)] {
            let watcher = TrackWatcher {
                slot: self.slot.clone(),
                events: self.events.clone(),
                generation,
                errored,
            };

            if let Err(e) = handle.add_event(Event::Track(event), watcher) {
                // La pista murió antes de registrar los eventos
                settle(&self.slot, generation);
                return Err(TransportError::Play(e.to_string()));
            }
        }

        let _ = self.events.send(VoiceEvent::Player(PlayerEvent::StateChange {
            old,
            new: PlayerState::playing(tag),
        }));

        Ok(())
    }

    fn stop(&self, force: bool) -> bool {
        let slot = self.slot.lock();
        match &slot.handle {
            Some(handle) => {
                debug!("⏹️ Deteniendo pista en guild {} (force={})", self.guild_id, force);
                handle.stop().is_ok()
            }
            None => false,
        }
    }
}

/// Publica el paso a `Idle` cuando la pista termina o falla.
struct TrackWatcher {
    slot: Arc<Mutex<PlayerSlot>>,
    events: VoiceEventSender,
    generation: u64,
    errored: bool,
}

#[async_trait]
impl VoiceEventHandler for TrackWatcher {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let old = settle(&self.slot, self.generation)?;

        if self.errored {
            if let (Some(resource), EventContext::Track(tracks)) = (old.resource.clone(), ctx) {
                let message = tracks
                    .iter()
                    .map(|(state, _)| format!("{:?}", state.playing))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = self
                    .events
                    .send(VoiceEvent::Player(PlayerEvent::Error { resource, message }));
            }
        }

        let _ = self.events.send(VoiceEvent::Player(PlayerEvent::StateChange {
            old,
            new: PlayerState::idle(),
        }));

        None
    }
}
