//! # Playback Session
//!
//! One live audio session per guild. The session owns the queue, the single
//! output player subscribed to the voice connection, and the policy that
//! reacts to connection lifecycle changes:
//!
//! - `Disconnected` with close code 4014: wait for `Connecting` (channel move)
//!   or destroy the connection when the grace period runs out (kick)
//! - any other `Disconnected`: rejoin with a growing backoff, destroy once the
//!   attempts run out
//! - `Signalling`/`Connecting`: bounded wait for `Ready`, destroy on timeout
//! - `Destroyed`: the session destroys itself
//!
//! Every event goes through one loop task; bounded waits run as separate tasks
//! that subscribe to the status broadcast and die with the session.
//!
//! Queue advances are serialized by `queue_locked`, taken with compare-and-set
//! before the head of the queue is popped, so at most one item plays at a time.
//! An advance that loses the race leaves `advance_pending` set; the holder
//! checks it after releasing the lock and runs another round if needed.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{
    collections::VecDeque,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    error::SessionError,
    item::{PlaybackTag, QueueItem},
};
use crate::{
    sources::{StreamError, StreamOptions, StreamProvider},
    voice::{
        AudioResource, ConnectionState, ConnectionStatus, OutputPlayer, PlayerEvent,
        VoiceConnection, VoiceEvent,
    },
};

/// Tiempos y límites de la política de conexión.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub ready_timeout: Duration,
    pub move_grace: Duration,
    pub rejoin_backoff: Duration,
    pub max_rejoin_attempts: u32,
    pub stream_open_timeout: Duration,
    pub stream_options: StreamOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(20),
            move_grace: Duration::from_secs(20),
            rejoin_backoff: Duration::from_secs(5),
            max_rejoin_attempts: 5,
            stream_open_timeout: Duration::from_secs(30),
            stream_options: StreamOptions::default(),
        }
    }
}

/// Resultado de un intento de avanzar la cola.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Un item empezó a sonar.
    Started,
    /// Ya había un avance en curso o algo sonando.
    Redundant,
    /// No quedaba nada reproducible.
    Exhausted,
}

impl AdvanceOutcome {
    pub fn is_success(self) -> bool {
        !matches!(self, Self::Exhausted)
    }
}

/// Copia del estado de la sesión en un instante.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub looping: bool,
    pub queue: Vec<QueueItem>,
    pub playing: Option<QueueItem>,
    pub play_timestamp: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Segundos que le quedan al item actual.
    pub fn current_duration_left(&self, now: DateTime<Utc>) -> u64 {
        match (&self.playing, self.play_timestamp) {
            (Some(item), Some(started_at)) => {
                let elapsed = now.signed_duration_since(started_at).num_seconds().max(0) as u64;
                item.duration_seconds.saturating_sub(elapsed)
            }
            _ => 0,
        }
    }
}

/// Avance de cola en segundo plano.
pub struct Processing(JoinHandle<AdvanceOutcome>);

impl Processing {
    pub async fn outcome(self) -> AdvanceOutcome {
        match self.0.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("❌ La tarea de avance de cola terminó mal: {:?}", e);
                AdvanceOutcome::Exhausted
            }
        }
    }
}

pub struct Enqueued {
    /// Posición real donde quedó el primer item.
    pub index: usize,
    pub processing: Processing,
}

/// Lote admitido por [`PlaybackSession::enqueue_within`].
pub struct Admitted {
    /// Estado justo antes de insertar.
    pub before: SessionSnapshot,
    /// Items que cupieron, en orden.
    pub items: Vec<QueueItem>,
    pub processing: Processing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Moved {
    pub index: usize,
    pub items: Vec<QueueItem>,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    looping: bool,
}

struct SessionInner {
    guild_id: GuildId,
    connection: Arc<dyn VoiceConnection>,
    player: Arc<dyn OutputPlayer>,
    provider: Arc<dyn StreamProvider>,
    settings: SessionSettings,
    queue: Mutex<QueueState>,
    queue_locked: AtomicBool,
    advance_pending: AtomicBool,
    pending_replay: Mutex<Option<QueueItem>>,
    ready_lock: AtomicBool,
    destroyed: AtomicBool,
    rejoin_attempts: AtomicU32,
    status: broadcast::Sender<ConnectionStatus>,
    cancel: CancellationToken,
}

/// Sesión de reproducción ligada a una conexión de voz.
#[derive(Clone)]
pub struct PlaybackSession {
    inner: Arc<SessionInner>,
}

impl PlaybackSession {
    /// Se suscribe a `connection` y arranca el bucle de eventos.
    pub fn new(
        guild_id: GuildId,
        connection: Arc<dyn VoiceConnection>,
        provider: Arc<dyn StreamProvider>,
        settings: SessionSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let player = connection.subscribe(events_tx);
        let (status, _) = broadcast::channel(16);

        let inner = Arc::new(SessionInner {
            guild_id,
            connection,
            player,
            provider,
            settings,
            queue: Mutex::new(QueueState::default()),
            queue_locked: AtomicBool::new(false),
            advance_pending: AtomicBool::new(false),
            pending_replay: Mutex::new(None),
            ready_lock: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            rejoin_attempts: AtomicU32::new(0),
            status,
            cancel: CancellationToken::new(),
        });

        debug!(
            "🎛️ Sesión creada para guild {} (conexión #{})",
            guild_id,
            inner.connection.id()
        );
        tokio::spawn(inner.clone().run(events_rx));

        Self { inner }
    }

    pub fn guild_id(&self) -> GuildId {
        self.inner.guild_id
    }

    pub fn connection_id(&self) -> u64 {
        self.inner.connection.id()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }

    pub fn state(&self) -> SessionSnapshot {
        let queue = self.inner.queue.lock();
        self.inner.snapshot(&queue)
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().items.len()
    }

    /// Lanza un avance de cola; `replay` fuerza el candidato.
    pub fn process_next(&self, replay: Option<QueueItem>) -> Processing {
        self.inner.spawn_advance(replay)
    }

    /// Inserta `items` en `index` (al final si es `None`, acotado a la cola).
    pub fn enqueue(
        &self,
        items: Vec<QueueItem>,
        index: Option<usize>,
    ) -> Result<Enqueued, SessionError> {
        self.ensure_alive()?;

        let index = {
            let mut queue = self.inner.queue.lock();
            insert_at(&mut queue.items, items, index)
        };

        Ok(Enqueued {
            index,
            processing: self.inner.spawn_advance(None),
        })
    }

    /// Añade al final tantos `items` como quepan bajo `capacity`.
    ///
    /// Mide, recorta e inserta con la cola tomada: dos lotes concurrentes no
    /// pueden pasarse del límite.
    pub fn enqueue_within(
        &self,
        mut items: Vec<QueueItem>,
        capacity: usize,
    ) -> Result<Admitted, SessionError> {
        self.ensure_alive()?;

        let (before, items) = {
            let mut queue = self.inner.queue.lock();
            let before = self.inner.snapshot(&queue);
            items.truncate(capacity.saturating_sub(queue.items.len()));
            queue.items.extend(items.iter().cloned());
            (before, items)
        };

        let processing = self.inner.spawn_advance(None);
        Ok(Admitted {
            before,
            items,
            processing,
        })
    }

    /// Quita cada rango `(inicio, cantidad)` en el orden dado.
    ///
    /// Los índices de cada rango se evalúan contra la cola ya recortada por
    /// los anteriores: quien llama ordena por inicio descendente.
    pub fn remove(&self, ranges: &[(usize, usize)]) -> Result<Vec<QueueItem>, SessionError> {
        self.ensure_alive()?;

        let mut queue = self.inner.queue.lock();
        let mut removed = Vec::new();
        for &(start, count) in ranges {
            removed.extend(splice(&mut queue.items, start, count));
        }
        Ok(removed)
    }

    /// Mueve `count` items desde `start` a `to` en un solo paso.
    pub fn move_range(
        &self,
        start: usize,
        count: usize,
        to: usize,
    ) -> Result<Moved, SessionError> {
        self.ensure_alive()?;

        let moved = {
            let mut queue = self.inner.queue.lock();
            let items: Vec<QueueItem> = splice(&mut queue.items, start, count).collect();
            let index = if items.is_empty() {
                to.min(queue.items.len())
            } else {
                insert_at(&mut queue.items, items.clone(), Some(to))
            };
            Moved { index, items }
        };

        if !moved.items.is_empty() {
            drop(self.inner.spawn_advance(None));
        }
        Ok(moved)
    }

    /// Salta el item actual sin repetirlo aunque haya loop.
    pub fn skip(&self) -> Result<bool, SessionError> {
        self.ensure_alive()?;
        Ok(self.inner.skip_current())
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        self.ensure_alive()?;
        self.inner.queue.lock().items.clear();
        self.inner.skip_current();
        Ok(())
    }

    pub fn toggle_loop(&self) -> Result<bool, SessionError> {
        self.ensure_alive()?;
        let mut queue = self.inner.queue.lock();
        queue.looping = !queue.looping;
        Ok(queue.looping)
    }

    /// Bloquea la cola para siempre, la vacía y detiene la salida.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    fn ensure_alive(&self) -> Result<(), SessionError> {
        if self.inner.is_destroyed() {
            return Err(SessionError::Destroyed(self.inner.guild_id));
        }
        Ok(())
    }
}

/// Inserta en un índice acotado y devuelve el índice real.
fn insert_at(queue: &mut VecDeque<QueueItem>, items: Vec<QueueItem>, index: Option<usize>) -> usize {
    let index = index.map_or(queue.len(), |index| index.min(queue.len()));
    let tail = queue.split_off(index);
    queue.extend(items);
    queue.extend(tail);
    index
}

/// Recorte acotado: rangos fuera de la cola no quitan nada.
fn splice(
    queue: &mut VecDeque<QueueItem>,
    start: usize,
    count: usize,
) -> std::collections::vec_deque::Drain<'_, QueueItem> {
    let start = start.min(queue.len());
    let end = start.saturating_add(count).min(queue.len());
    queue.drain(start..end)
}

impl SessionInner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<VoiceEvent>) {
        let initial = self.connection.state();
        self.handle_connection_event(initial);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(VoiceEvent::Connection(state)) => self.handle_connection_event(state),
                    Some(VoiceEvent::Player(event)) => self.handle_player_event(event),
                    None => break,
                },
            }
        }

        debug!("Bucle de eventos de guild {} terminado", self.guild_id);
    }

    /// Tarea ligada a la vida de la sesión.
    fn spawn_guarded<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = task => {}
            }
        });
    }

    fn handle_connection_event(self: &Arc<Self>, state: ConnectionState) {
        // Se publica antes de suscribir esperas nuevas: no se ven a sí mismas
        let _ = self.status.send(state.status());

        match state {
            ConnectionState::Disconnected(reason) => {
                if state.is_kick_ambiguous() {
                    self.spawn_move_grace();
                    return;
                }

                let attempts = self.rejoin_attempts.load(Ordering::Acquire);
                if attempts < self.settings.max_rejoin_attempts {
                    let delay = self.settings.rejoin_backoff * (attempts + 1);
                    info!(
                        "🔄 Desconexión en guild {} ({:?}), reintento {} en {:?}",
                        self.guild_id,
                        reason,
                        attempts + 1,
                        delay
                    );

                    let inner = self.clone();
                    self.spawn_guarded(async move {
                        sleep(delay).await;
                        inner.rejoin_attempts.fetch_add(1, Ordering::AcqRel);
                        inner.connection.rejoin();
                    });
                } else {
                    warn!(
                        "💥 Destruyendo conexión de guild {}: reintentos agotados (motivo: {:?})",
                        self.guild_id, reason
                    );
                    self.connection.destroy();
                }
            }
            ConnectionState::Destroyed => self.destroy(),
            ConnectionState::Signalling | ConnectionState::Connecting => {
                if self
                    .ready_lock
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.spawn_ready_wait();
                }
            }
            ConnectionState::Ready => {
                self.rejoin_attempts.store(0, Ordering::Release);
            }
        }
    }

    /// 4014: movido de canal si vuelve a `Connecting` a tiempo, expulsado si no.
    fn spawn_move_grace(self: &Arc<Self>) {
        let status = self.status.subscribe();
        let grace = self.settings.move_grace;
        let inner = self.clone();

        self.spawn_guarded(async move {
            if wait_for_status(status, ConnectionStatus::Connecting, grace).await {
                debug!("🔀 Guild {}: cambio de canal de voz", inner.guild_id);
                return;
            }
            info!(
                "👋 Destruyendo conexión de guild {}: sin reconexión tras close code 4014",
                inner.guild_id
            );
            inner.connection.destroy();
        });
    }

    fn spawn_ready_wait(self: &Arc<Self>) {
        let status = self.status.subscribe();
        let limit = self.settings.ready_timeout;
        let inner = self.clone();

        self.spawn_guarded(async move {
            if !wait_for_status(status, ConnectionStatus::Ready, limit).await
                && inner.connection.state() != ConnectionState::Destroyed
            {
                warn!(
                    "⏰ Destruyendo conexión de guild {}: no llegó a Ready en {:?}",
                    inner.guild_id, limit
                );
                inner.connection.destroy();
            }
            inner.ready_lock.store(false, Ordering::Release);
        });
    }

    fn handle_player_event(self: &Arc<Self>, event: PlayerEvent) {
        match event {
            PlayerEvent::StateChange { old, new } => {
                if !new.is_idle() || old.is_idle() {
                    return;
                }

                debug!("✅ Reproducción completa en guild {}", self.guild_id);
                let looping = self.queue.lock().looping;
                let replay = old
                    .resource
                    .filter(|tag| looping && tag.is_loopable())
                    .map(|tag| tag.item.clone());

                drop(self.spawn_advance(replay));
            }
            PlayerEvent::Error { resource, message } => {
                error!(
                    "❌ Error de reproducción en '{}' ({}): {}",
                    resource.item.title, resource.item.id, message
                );
                drop(self.spawn_advance(None));
            }
        }
    }

    fn spawn_advance(self: &Arc<Self>, replay: Option<QueueItem>) -> Processing {
        let inner = self.clone();
        Processing(tokio::spawn(async move { inner.process_next(replay).await }))
    }

    async fn process_next(&self, replay: Option<QueueItem>) -> AdvanceOutcome {
        if let Some(item) = replay {
            *self.pending_replay.lock() = Some(item);
        }
        self.advance_pending.store(true, Ordering::SeqCst);

        let mut outcome = AdvanceOutcome::Redundant;
        loop {
            if self
                .queue_locked
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // Quien tiene el lock verá `advance_pending` al soltarlo
                return outcome;
            }
            self.advance_pending.store(false, Ordering::SeqCst);

            outcome = match (outcome, self.advance_locked().await) {
                (AdvanceOutcome::Started, _) => AdvanceOutcome::Started,
                (_, round) => round,
            };

            if !self.unlock_queue() || !self.advance_pending.load(Ordering::SeqCst) {
                return outcome;
            }
            debug!("🔂 Avance pendiente en guild {}, otra ronda", self.guild_id);
        }
    }

    /// Una ronda de avance con `queue_locked` tomado.
    async fn advance_locked(&self) -> AdvanceOutcome {
        let mut replay = self.pending_replay.lock().take();

        if !self.player.state().is_idle() {
            return AdvanceOutcome::Redundant;
        }

        loop {
            let candidate = replay.take().or_else(|| self.queue.lock().items.pop_front());

            let Some(item) = candidate else {
                let mut queue = self.queue.lock();
                if queue.looping {
                    debug!("🔁 Cola vacía en guild {}, desactivando loop", self.guild_id);
                    queue.looping = false;
                }
                return AdvanceOutcome::Exhausted;
            };

            info!("🎵 Reproduciendo: {} - {}", item.title, item.url());

            let resource = match self.open_resource(item).await {
                Ok(resource) => resource,
                Err(e) => {
                    warn!("⚠️ Saltando item en guild {}: {}", self.guild_id, e);
                    continue;
                }
            };

            if self.is_destroyed() {
                return AdvanceOutcome::Exhausted;
            }

            match self.player.play(resource).await {
                Ok(()) => return AdvanceOutcome::Started,
                Err(e) => {
                    error!("❌ El reproductor rechazó el recurso en guild {}: {}", self.guild_id, e);
                }
            }
        }
    }

    async fn open_resource(&self, item: QueueItem) -> Result<AudioResource, StreamError> {
        let limit = self.settings.stream_open_timeout;
        let opening = self
            .provider
            .open_audio_stream(&item.id, &self.settings.stream_options);

        let stream = timeout(limit, opening)
            .await
            .map_err(|_| StreamError::Timeout(limit))??;

        Ok(AudioResource::new(stream, PlaybackTag::new(item)))
    }

    /// Una sesión destruida conserva la cola bloqueada.
    fn unlock_queue(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.queue_locked.store(false, Ordering::SeqCst);
        if self.is_destroyed() {
            self.queue_locked.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn snapshot(&self, queue: &QueueState) -> SessionSnapshot {
        let resource = self.player.state().resource;

        SessionSnapshot {
            looping: queue.looping,
            queue: queue.items.iter().cloned().collect(),
            playing: resource.as_ref().map(|tag| tag.item.clone()),
            play_timestamp: resource.map(|tag| tag.started_at),
        }
    }

    fn skip_current(&self) -> bool {
        match self.player.state().resource {
            Some(tag) => {
                tag.break_loop();
                self.player.stop(true)
            }
            None => false,
        }
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("💥 Destruyendo reproductor de guild {}", self.guild_id);
        self.queue_locked.store(true, Ordering::SeqCst);
        self.queue.lock().items.clear();
        self.skip_current();
        self.cancel.cancel();
    }
}

/// Espera a que la conexión publique `target`; falso si vence `limit` o se destruye.
async fn wait_for_status(
    mut status: broadcast::Receiver<ConnectionStatus>,
    target: ConnectionStatus,
    limit: Duration,
) -> bool {
    let waiting = async {
        loop {
            match status.recv().await {
                Ok(current) if current == target => return true,
                Ok(ConnectionStatus::Destroyed) | Err(RecvError::Closed) => return false,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
            }
        }
    };

    timeout(limit, waiting).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{
            guild, item, items, provider_failing_on, settle, working_provider, FakeConnection,
            StallingProvider,
        },
        voice::DisconnectReason,
    };
    use pretty_assertions::assert_eq;

    fn session_on(connection: &Arc<FakeConnection>) -> PlaybackSession {
        session_with(connection, working_provider(), SessionSettings::default())
    }

    fn session_with(
        connection: &Arc<FakeConnection>,
        provider: Arc<dyn StreamProvider>,
        settings: SessionSettings,
    ) -> PlaybackSession {
        let connection: Arc<dyn VoiceConnection> = connection.clone();
        PlaybackSession::new(guild(), connection, provider, settings)
    }

    fn ids(queue: &[QueueItem]) -> Vec<&str> {
        queue.iter().map(|item| item.id.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_on_idle_session_starts_playing() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);

        let enqueued = session.enqueue(items(&["a", "b"]), None).unwrap();
        assert_eq!(enqueued.index, 0);
        assert_eq!(enqueued.processing.outcome().await, AdvanceOutcome::Started);

        let state = session.state();
        assert_eq!(state.playing.map(|item| item.id), Some("a".to_string()));
        assert!(state.play_timestamp.is_some());
        assert_eq!(ids(&state.queue), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_while_playing_is_redundant_success() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);

        session.enqueue(items(&["a"]), None).unwrap().processing.outcome().await;
        let enqueued = session.enqueue(items(&["b"]), None).unwrap();

        assert_eq!(enqueued.processing.outcome().await, AdvanceOutcome::Redundant);
        assert!(AdvanceOutcome::Redundant.is_success());
        assert_eq!(connection.player().played(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn items_play_in_fifo_order_one_at_a_time() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);

        session.enqueue(items(&["a", "b"]), None).unwrap();
        settle().await;
        session.enqueue(items(&["c"]), None).unwrap();
        settle().await;

        let player = connection.player();
        for _ in 0..3 {
            player.finish();
            settle().await;
        }

        assert_eq!(player.played(), vec!["a", "b", "c"]);
        assert!(!player.overlapped());
        assert_eq!(session.state().playing, None);
    }

    #[tokio::test(start_paused = true)]
    async fn unplayable_item_is_skipped_without_surfacing_error() {
        let connection = FakeConnection::ready();
        let session = session_with(
            &connection,
            provider_failing_on(&["broken"]),
            SessionSettings::default(),
        );

        let enqueued = session.enqueue(items(&["broken", "good"]), None).unwrap();

        assert_eq!(enqueued.processing.outcome().await, AdvanceOutcome::Started);
        assert_eq!(connection.player().played(), vec!["good"]);
        assert!(session.state().queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn all_items_failing_exhausts_queue_and_disables_loop() {
        let connection = FakeConnection::ready();
        let session = session_with(
            &connection,
            provider_failing_on(&["x", "y"]),
            SessionSettings::default(),
        );
        assert!(session.toggle_loop().unwrap());

        let enqueued = session.enqueue(items(&["x", "y"]), None).unwrap();

        assert_eq!(enqueued.processing.outcome().await, AdvanceOutcome::Exhausted);
        assert!(!session.state().looping);
        assert!(connection.player().played().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn playback_error_advances_to_next_item() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);

        session.enqueue(items(&["a", "b"]), None).unwrap();
        settle().await;
        connection.player().fail("decoder exploded");
        settle().await;

        assert_eq!(connection.player().played(), vec!["a", "b"]);
        assert!(!connection.player().overlapped());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_times_out_and_next_item_plays() {
        let connection = FakeConnection::ready();
        let provider = Arc::new(StallingProvider {
            stalled: ["slow".to_string()].into_iter().collect(),
        });
        let session = session_with(&connection, provider, SessionSettings::default());

        let enqueued = session.enqueue(items(&["slow", "fast"]), None).unwrap();

        assert_eq!(enqueued.processing.outcome().await, AdvanceOutcome::Started);
        assert_eq!(connection.player().played(), vec!["fast"]);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_replays_until_skip_breaks_it_once() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);
        let player = connection.player();

        assert!(session.toggle_loop().unwrap());
        session.enqueue(items(&["a", "b"]), None).unwrap();
        settle().await;

        player.finish();
        settle().await;
        assert_eq!(player.played(), vec!["a", "a"]);
        assert!(player.current().is_some_and(|tag| tag.is_loopable()));

        assert!(session.skip().unwrap());
        settle().await;

        assert_eq!(player.played(), vec!["a", "a", "b"]);
        assert!(session.state().looping);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_descending_ranges_hits_absolute_positions() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);

        session.enqueue(items(&["now"]), None).unwrap().processing.outcome().await;
        session
            .enqueue(items(&["q0", "q1", "q2", "q3", "q4", "q5", "q6", "q7"]), None)
            .unwrap();

        let removed = session.remove(&[(5, 1), (2, 3)]).unwrap();

        assert_eq!(ids(&removed), vec!["q5", "q2", "q3", "q4"]);
        assert_eq!(ids(&session.state().queue), vec!["q0", "q1", "q6", "q7"]);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_on_empty_queue_returns_nothing() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);

        assert_eq!(session.remove(&[(0, 1)]).unwrap(), Vec::new());
        assert_eq!(session.remove(&[(7, 100)]).unwrap(), Vec::new());
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_clamps_index() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);

        session.enqueue(items(&["now"]), None).unwrap().processing.outcome().await;
        session.enqueue(items(&["a", "b"]), None).unwrap();

        assert_eq!(session.enqueue(items(&["front"]), Some(0)).unwrap().index, 0);
        assert_eq!(session.enqueue(items(&["back"]), Some(99)).unwrap().index, 3);
        assert_eq!(ids(&session.state().queue), vec!["front", "a", "b", "back"]);
    }

    #[tokio::test(start_paused = true)]
    async fn move_range_reinserts_atomically() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);

        session.enqueue(items(&["now"]), None).unwrap().processing.outcome().await;
        session.enqueue(items(&["a", "b", "c", "d"]), None).unwrap();

        let moved = session.move_range(1, 2, 0).unwrap();
        assert_eq!(moved.index, 0);
        assert_eq!(ids(&moved.items), vec!["b", "c"]);
        assert_eq!(ids(&session.state().queue), vec!["b", "c", "a", "d"]);

        let missing = session.move_range(10, 1, 0).unwrap();
        assert!(missing.items.is_empty());
        assert_eq!(session.queue_len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_empties_queue_and_stops_output() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);

        session.enqueue(items(&["a", "b", "c"]), None).unwrap();
        settle().await;
        session.clear().unwrap();
        settle().await;

        assert_eq!(session.state(), SessionSnapshot::default());
        assert_eq!(connection.player().played(), vec!["a"]);
        assert!(!session.skip().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_connection_destroys_session() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);

        session.enqueue(items(&["a", "b"]), None).unwrap();
        settle().await;
        connection.set_state(ConnectionState::Destroyed);
        settle().await;

        assert!(session.is_destroyed());
        assert!(session.state().queue.is_empty());
        assert!(session.state().playing.is_none());
        assert!(matches!(
            session.enqueue(items(&["c"]), None),
            Err(SessionError::Destroyed(_))
        ));
        assert_eq!(connection.player().played(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn kick_without_reconnect_destroys_after_grace() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);
        settle().await;

        connection.set_state(ConnectionState::Disconnected(DisconnectReason::WebSocketClose(Some(4014))));
        sleep(Duration::from_secs(19)).await;
        assert!(!session.is_destroyed());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(connection.state(), ConnectionState::Destroyed);
        assert!(session.is_destroyed());
        assert_eq!(connection.rejoins(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_move_survives_grace_period() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);
        settle().await;

        connection.set_state(ConnectionState::Disconnected(DisconnectReason::WebSocketClose(Some(4014))));
        sleep(Duration::from_secs(3)).await;
        connection.set_state(ConnectionState::Connecting);
        settle().await;
        connection.set_state(ConnectionState::Ready);
        sleep(Duration::from_secs(60)).await;

        assert!(!session.is_destroyed());
        assert_eq!(connection.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn rejoin_backoff_grows_then_gives_up() {
        let connection = FakeConnection::ready();
        let settings = SessionSettings {
            max_rejoin_attempts: 2,
            ..SessionSettings::default()
        };
        let session = session_with(&connection, working_provider(), settings);
        settle().await;

        let dropped = ConnectionState::Disconnected(DisconnectReason::Timeout);

        connection.set_state(dropped);
        sleep(Duration::from_secs(4)).await;
        assert_eq!(connection.rejoins(), 0);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(connection.rejoins(), 1);

        connection.set_state(dropped);
        sleep(Duration::from_secs(9)).await;
        assert_eq!(connection.rejoins(), 1);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(connection.rejoins(), 2);

        connection.set_state(dropped);
        settle().await;
        assert_eq!(connection.state(), ConnectionState::Destroyed);
        assert!(session.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn ready_resets_rejoin_attempts() {
        let connection = FakeConnection::ready();
        let settings = SessionSettings {
            max_rejoin_attempts: 1,
            ..SessionSettings::default()
        };
        let session = session_with(&connection, working_provider(), settings);
        settle().await;

        let dropped = ConnectionState::Disconnected(DisconnectReason::Other);
        connection.set_state(dropped);
        sleep(Duration::from_secs(6)).await;
        connection.set_state(ConnectionState::Ready);
        settle().await;

        connection.set_state(dropped);
        sleep(Duration::from_secs(6)).await;

        assert_eq!(connection.rejoins(), 2);
        assert!(!session.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn connection_stuck_signalling_is_destroyed() {
        let connection = FakeConnection::new(1, crate::testing::channel(), ConnectionState::Signalling);
        let session = session_on(&connection);

        sleep(Duration::from_secs(19)).await;
        assert!(!session.is_destroyed());

        sleep(Duration::from_secs(2)).await;
        assert!(session.is_destroyed());
    }

    #[tokio::test(start_paused = true)]
    async fn connection_reaching_ready_in_time_is_kept() {
        let connection = FakeConnection::new(1, crate::testing::channel(), ConnectionState::Signalling);
        let session = session_on(&connection);
        settle().await;

        connection.set_state(ConnectionState::Connecting);
        sleep(Duration::from_secs(5)).await;
        connection.set_state(ConnectionState::Ready);
        sleep(Duration::from_secs(60)).await;

        assert!(!session.is_destroyed());
        let enqueued = session.enqueue(vec![item("late", 30)], None).unwrap();
        assert_eq!(enqueued.processing.outcome().await, AdvanceOutcome::Started);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn enqueue_racing_an_exhausting_advance_still_plays() {
        for round in 0..200 {
            let connection = FakeConnection::ready();
            let session = session_on(&connection);

            let advance = {
                let session = session.clone();
                tokio::spawn(async move { session.process_next(None).outcome().await })
            };
            let enqueue = {
                let session = session.clone();
                tokio::spawn(async move {
                    session.enqueue(items(&["x"]), None).unwrap().processing.outcome().await
                })
            };
            advance.await.unwrap();
            enqueue.await.unwrap();

            let state = session.state();
            assert!(
                state.playing.is_some() && state.queue.is_empty(),
                "ronda {}: cola atascada {:?}",
                round,
                ids(&state.queue)
            );
            session.destroy();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn enqueue_racing_track_end_still_plays() {
        for round in 0..100 {
            let connection = FakeConnection::ready();
            let session = session_on(&connection);
            session.enqueue(items(&["a"]), None).unwrap().processing.outcome().await;
            let player = connection.player();

            let finishing = {
                let player = player.clone();
                tokio::spawn(async move { player.finish() })
            };
            let enqueued = session.enqueue(items(&["b"]), None).unwrap();
            finishing.await.unwrap();
            enqueued.processing.outcome().await;

            let mut waited = 0;
            while player.current_id().as_deref() != Some("b") && waited < 100 {
                sleep(Duration::from_millis(10)).await;
                waited += 1;
            }

            assert_eq!(player.current_id().as_deref(), Some("b"), "ronda {}", round);
            assert!(session.state().queue.is_empty());
            session.destroy();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_within_caps_queue_and_snapshots_before() {
        let connection = FakeConnection::ready();
        let session = session_on(&connection);

        session.enqueue(items(&["now"]), None).unwrap().processing.outcome().await;
        session.enqueue(items(&["a", "b"]), None).unwrap();

        let admitted = session.enqueue_within(items(&["c", "d", "e"]), 3).unwrap();
        assert_eq!(ids(&admitted.before.queue), vec!["a", "b"]);
        assert_eq!(admitted.before.playing.map(|item| item.id), Some("now".to_string()));
        assert_eq!(ids(&admitted.items), vec!["c"]);
        assert_eq!(admitted.processing.outcome().await, AdvanceOutcome::Redundant);

        let full = session.enqueue_within(items(&["f"]), 3).unwrap();
        assert!(full.items.is_empty());
        assert_eq!(ids(&session.state().queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn snapshot_reports_time_left() {
        let now = Utc::now();
        let snapshot = SessionSnapshot {
            playing: Some(item("a", 180)),
            play_timestamp: Some(now - chrono::Duration::seconds(30)),
            ..SessionSnapshot::default()
        };

        assert_eq!(snapshot.current_duration_left(now), 150);
        assert_eq!(SessionSnapshot::default().current_duration_left(now), 0);
    }
}
