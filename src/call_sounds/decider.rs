//! CallSoundDecider
//!
//! Vereint alle Event-Quellen eines Calls zu einem einzigen, geordneten
//! Stream von Sound-Cues und verwaltet die Countdown-Timer, die aus
//! kurzen Verbindungsabbrüchen endgültige Aktionen machen:
//! - Finish-Call: 1:1-Call wird nach der Grace-Zeit aufgelegt
//! - Waiting-for-others: allein im Call, Mikrofon wird gemutet
//! - Waiting-Room: kurze Verzögerung vor dem Warteraum-Sound

use super::cue::{CallSoundCue, ParticipantKey, WaitingForOthersNotice};
use super::timers::{DelayedActions, TimerState};
use crate::config::CallSoundConfig;
use crate::events::{
    AloneStatus, CallChange, CallStatus, ChatCall, ParticipantChange, ParticipantChangeKind,
    SessionStatus, SessionTermCode, SessionUpdate, SoundNotifications,
};
use crate::gateway::{
    AudioManager, CallEventSource, CallGateway, CallSessionCoordinator, EventStream,
    SoundPreferences,
};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Ein ausgehender Call, bei dem nur ich selbst im Call bin
const ONE_PARTICIPANT: usize = 1;

/// Kapazität des Notice-Kanals
const NOTICE_BUFFER: usize = 16;

// ============================================================================
// TYPES
// ============================================================================

/// Die Timer, die der Decider besitzt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    FinishCall,
    WaitingForOthers,
    WaitingRoomAnnouncement,
}

/// Alle Collaborators des Deciders
#[derive(Clone)]
pub struct CallSoundDeps {
    pub events: Arc<dyn CallEventSource>,
    pub gateway: Arc<dyn CallGateway>,
    pub coordinator: Arc<dyn CallSessionCoordinator>,
    pub audio: Arc<dyn AudioManager>,
    pub preferences: Arc<dyn SoundPreferences>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegState {
    /// Session läuft stabil
    Active,
    /// Recoverable abgebrochen, Finish-Call-Timer läuft
    PendingHangUp,
}

#[derive(Debug, Default)]
struct DeciderState {
    legs: HashMap<ParticipantKey, LegState>,
    /// Leg, dem der laufende Finish-Call-Timer gehört
    finish_call_owner: Option<ParticipantKey>,
    /// Latch für den verzögerten Warteraum-Sound
    announce_waiting_room: bool,
}

struct Inner {
    id: Uuid,
    config: CallSoundConfig,
    deps: CallSoundDeps,
    state: Mutex<DeciderState>,
    timers: DelayedActions<TimerKind>,
    cue_tx: broadcast::Sender<CallSoundCue>,
    notice_tx: broadcast::Sender<WaitingForOthersNotice>,
    cancel_token: CancellationToken,
    audio_released: AtomicBool,
}

// ============================================================================
// CALL SOUND DECIDER
// ============================================================================

/// Entscheidet, wann ein Call-Sound abgespielt werden muss
pub struct CallSoundDecider {
    inner: Arc<Inner>,
}

impl CallSoundDecider {
    pub fn new(config: CallSoundConfig, deps: CallSoundDeps) -> Self {
        let (cue_tx, _) = broadcast::channel(config.cue_buffer.max(1));
        let (notice_tx, _) = broadcast::channel(NOTICE_BUFFER);
        let cancel_token = CancellationToken::new();

        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                config,
                deps,
                state: Mutex::new(DeciderState::default()),
                timers: DelayedActions::new(cancel_token.clone()),
                cue_tx,
                notice_tx,
                cancel_token,
                audio_released: AtomicBool::new(false),
            }),
        }
    }

    /// Abonniert alle Quellen und gibt den Cue-Stream zurück
    pub fn start(self) -> CallSounds {
        let inner = self.inner;
        let span = tracing::info_span!("call_sounds", decider = %inner.id);
        span.in_scope(|| tracing::info!("Starting call sounds"));

        // Vor dem Spawnen subscriben, damit kein Cue verloren geht
        let cues = cue_stream(inner.cue_tx.subscribe(), inner.cancel_token.clone());
        let events = Arc::clone(&inner.deps.events);

        let tasks = vec![
            spawn_source(
                &inner,
                &span,
                "reconnecting",
                events.monitor_reconnecting_status(),
                |inner, reconnecting| async move { inner.handle_reconnecting(reconnecting) },
            ),
            spawn_source(
                &inner,
                &span,
                "sessions",
                events.monitor_session_updates(),
                |inner, update| async move { inner.handle_session_update(update).await },
            ),
            spawn_source(
                &inner,
                &span,
                "alone",
                events.monitor_alone_status(),
                |inner, status| async move { inner.handle_alone_status(status) },
            ),
            spawn_source(
                &inner,
                &span,
                "calls",
                events.monitor_call_updates(),
                |inner, call| async move { inner.handle_call_update(call) },
            ),
            spawn_source(
                &inner,
                &span,
                "participants",
                events.monitor_participant_changes(),
                |inner, change| async move { inner.handle_participant_change(change).await },
            ),
            spawn_source(
                &inner,
                &span,
                "outgoing_ringing",
                events.monitor_outgoing_ringing(),
                |inner, call| async move { inner.handle_outgoing_ringing(call) },
            ),
        ];

        CallSounds { inner, cues, tasks }
    }
}

impl std::fmt::Debug for CallSoundDecider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSoundDecider")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Startet einen Task pro Quelle. Fehler einer Quelle werden geloggt und
/// beenden weder diese noch andere Quellen.
fn spawn_source<T, F, Fut>(
    inner: &Arc<Inner>,
    span: &tracing::Span,
    name: &'static str,
    mut stream: EventStream<T>,
    handler: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(Arc<Inner>, T) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let inner = Arc::clone(inner);
    let token = inner.cancel_token.clone();

    tokio::spawn(
        async move {
            loop {
                let item = tokio::select! {
                    () = token.cancelled() => break,
                    item = stream.next() => item,
                };

                match item {
                    Some(Ok(event)) => handler(Arc::clone(&inner), event).await,
                    Some(Err(e)) => tracing::error!("Source '{}' failed: {}", name, e),
                    None => {
                        tracing::debug!("Source '{}' completed", name);
                        break;
                    }
                }
            }
        }
        .instrument(span.clone()),
    )
}

fn cue_stream(
    rx: broadcast::Receiver<CallSoundCue>,
    cancel_token: CancellationToken,
) -> BoxStream<'static, CallSoundCue> {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(cue) => return Some((cue, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Consumer too slow, dropped {} older cues", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .take_until(cancel_token.cancelled_owned())
    .boxed()
}

// ============================================================================
// EVENT HANDLING
// ============================================================================

impl Inner {
    fn emit(&self, cue: CallSoundCue) {
        tracing::info!("Call sound: {:?}", cue);
        let _ = self.cue_tx.send(cue);
    }

    fn handle_reconnecting(&self, reconnecting: bool) {
        if reconnecting {
            tracing::debug!("Call reconnecting");
            self.emit(CallSoundCue::CallReconnecting);
        }
    }

    /// Session-Zustandsautomat, nur für 1:1-Calls
    async fn handle_session_update(self: &Arc<Self>, update: SessionUpdate) {
        let Some(session) = update.session else {
            return;
        };
        let participant = ParticipantKey::new(session.peer_id, session.client_id);

        let Some(call) = update.call else {
            tracing::debug!("Session update without call for {:?}", participant);
            return;
        };

        let chat = match self.deps.gateway.chat_room(call.chat_id).await {
            Ok(Some(chat)) => chat,
            Ok(None) => {
                tracing::debug!("Chat room {} not found", call.chat_id);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to get chat room {}: {}", call.chat_id, e);
                return;
            }
        };

        if !chat.is_one_to_one() {
            return;
        }

        match (session.status, session.term_code) {
            (SessionStatus::Progress, _) => {
                tracing::debug!("Session in progress");
                self.mark_leg_stable(participant);
            }
            (SessionStatus::Destroyed, Some(SessionTermCode::Recoverable)) => {
                tracing::debug!(
                    "Session destroyed, recoverable session. Wait {:?} to hang up",
                    self.config.recover_grace
                );
                self.start_finish_call_countdown(call.call_id, participant);
            }
            (SessionStatus::Destroyed, Some(SessionTermCode::NonRecoverable)) => {
                tracing::debug!("Session destroyed, unrecoverable session");
                self.mark_leg_stable(participant);
            }
            _ => {}
        }
    }

    /// Leg läuft (wieder) stabil. Stoppt einen Finish-Call-Timer desselben Peers.
    fn mark_leg_stable(&self, participant: ParticipantKey) {
        let mut state = self.state.lock();
        state
            .legs
            .retain(|other, _| other.peer_id != participant.peer_id);
        state.legs.insert(participant, LegState::Active);

        if state
            .finish_call_owner
            .is_some_and(|owner| owner.peer_id == participant.peer_id)
        {
            state.finish_call_owner = None;
            if self.timers.cancel(TimerKind::FinishCall) {
                tracing::debug!("Count down timer stops, call recovered");
            }
        }
    }

    fn start_finish_call_countdown(self: &Arc<Self>, call_id: u64, participant: ParticipantKey) {
        let mut state = self.state.lock();

        if state.legs.get(&participant) != Some(&LegState::Active) {
            tracing::debug!("{:?} is not active, no count down", participant);
            return;
        }

        state.legs.insert(participant, LegState::PendingHangUp);
        if let Some(previous) = state.finish_call_owner.replace(participant) {
            tracing::debug!("Finish call count down of {:?} replaced", previous);
        }

        let inner = Arc::clone(self);
        self.timers.schedule(
            TimerKind::FinishCall,
            self.config.recover_grace,
            async move { inner.finish_call(call_id, participant).await },
        );
        tracing::debug!("Count down timer starts");
    }

    async fn finish_call(&self, call_id: u64, participant: ParticipantKey) {
        {
            let mut state = self.state.lock();
            if state.finish_call_owner != Some(participant) {
                return;
            }
            state.finish_call_owner = None;
        }

        tracing::info!("Count down timer ends. Hang up call {}", call_id);
        match self.deps.gateway.hang_up(call_id).await {
            Ok(()) => {
                // Ein Progress während des Auflegens hat das Leg schon wiederhergestellt
                let mut state = self.state.lock();
                if state.legs.get(&participant) == Some(&LegState::PendingHangUp)
                    && state.finish_call_owner != Some(participant)
                {
                    state.legs.remove(&participant);
                }
            }
            Err(e) => tracing::error!("Failed to hang up call {}: {}", call_id, e),
        }
    }

    /// Gilt für alle Call-Arten, auch Gruppen und Meetings
    fn handle_alone_status(self: &Arc<Self>, status: AloneStatus) {
        self.timers.cancel(TimerKind::WaitingForOthers);
        self.deps.coordinator.stop_finish_call_counter();

        if !status.alone_in_call {
            self.deps.coordinator.set_end_call_dialog_ignored(false);
            return;
        }

        if status.waiting_for_others {
            let inner = Arc::clone(self);
            let chat_id = status.chat_id;
            self.timers.schedule(
                TimerKind::WaitingForOthers,
                self.config.waiting_for_others,
                async move { inner.waiting_for_others_elapsed(chat_id).await },
            );
        } else {
            self.deps.coordinator.start_finish_call_counter(status.chat_id);
        }
    }

    async fn waiting_for_others_elapsed(&self, chat_id: u64) {
        self.deps.coordinator.start_finish_call_counter(chat_id);

        let _ = self.notice_tx.send(WaitingForOthersNotice {
            chat_id,
            alone: true,
        });

        match self.deps.gateway.chat_call(chat_id).await {
            Ok(Some(call)) if call.has_local_audio => {
                tracing::debug!("I am the only participant in the call, mute microphone");
                self.deps.gateway.mute_microphone(chat_id);
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Failed to get call of chat {}: {}", chat_id, e),
        }
    }

    fn handle_call_update(self: &Arc<Self>, call: ChatCall) {
        if call.changes.is_empty() {
            return;
        }
        tracing::debug!("Call updated, changes {:?}", call.changes);

        if call.has_change(CallChange::Status)
            && call.status == CallStatus::TerminatingUserParticipation
        {
            tracing::debug!("Terminating user participation");
            self.timers.cancel(TimerKind::WaitingForOthers);
            self.deps.coordinator.stop_finish_call_counter();
            self.audio_released.store(true, Ordering::SeqCst);
            self.deps.audio.release();
            self.emit(CallSoundCue::CallEnded);
        }

        if call.has_change(CallChange::WaitingRoomUsersEntered) && call.waiting_room_size() == 1 {
            self.state.lock().announce_waiting_room = true;

            let inner = Arc::clone(self);
            self.timers.schedule(
                TimerKind::WaitingRoomAnnouncement,
                self.config.waiting_room_delay,
                async move {
                    let announce = inner.state.lock().announce_waiting_room;
                    if announce {
                        inner.emit(CallSoundCue::WaitingRoomUserEntered);
                    }
                },
            );
        }

        if call.has_change(CallChange::WaitingRoomUsersLeave) {
            self.state.lock().announce_waiting_room = false;
        }
    }

    /// Die Einstellung wird pro Event neu gelesen, sie kann sich dazwischen ändern
    async fn handle_participant_change(&self, change: ParticipantChange) {
        let mut preference = self.deps.preferences.monitor_sound_notifications();

        match preference.next().await {
            Some(Ok(SoundNotifications::Enabled)) => self.emit(match change.kind {
                ParticipantChangeKind::Join => CallSoundCue::ParticipantJoined,
                ParticipantChangeKind::Leave => CallSoundCue::ParticipantLeft,
            }),
            Some(Ok(SoundNotifications::Disabled)) => {
                tracing::debug!("Sound notifications disabled, {:?} ignored", change.kind);
            }
            Some(Err(e)) => tracing::error!("Failed to read sound notifications: {}", e),
            None => tracing::debug!("No sound notification preference available"),
        }
    }

    /// Unbeantworteter Ring, bei dem ich allein bin: auflegen.
    /// Das Auflegen läuft in einem eigenen Task und endet mit dem Decider.
    fn handle_outgoing_ringing(&self, call: ChatCall) {
        if !self.deps.coordinator.is_request_sent(call.call_id)
            || call.num_participants != ONE_PARTICIPANT
        {
            return;
        }

        tracing::debug!("Outgoing call {} not answered, hang up", call.call_id);
        let gateway = Arc::clone(&self.deps.gateway);
        let token = self.cancel_token.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    () = token.cancelled() => {}
                    result = gateway.hang_up(call.call_id) => {
                        if let Err(e) = result {
                            tracing::error!("Failed to hang up call {}: {}", call.call_id, e);
                        }
                    }
                }
            }
            .in_current_span(),
        );
    }

    /// Beendet den Decider vollständig: Quellen, Timer, Audio-Ressource
    fn shutdown(&self) {
        if self.cancel_token.is_cancelled() {
            return;
        }

        tracing::info!(decider = %self.id, "Stopping call sounds");
        self.cancel_token.cancel();
        self.timers.cancel_all();

        if !self.audio_released.swap(true, Ordering::SeqCst) {
            self.deps.audio.release();
        }
    }
}

// ============================================================================
// CALL SOUNDS STREAM
// ============================================================================

/// Cue-Stream eines gestarteten Deciders.
///
/// Ist der Konsument langsam, bleibt nur der neueste Cue erhalten (bei
/// `cue_buffer = 1`). Droppen oder `cancel()` beendet den Decider.
pub struct CallSounds {
    inner: Arc<Inner>,
    cues: BoxStream<'static, CallSoundCue>,
    tasks: Vec<JoinHandle<()>>,
}

impl CallSounds {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Events, die beim Ablauf des Waiting-for-others-Timers veröffentlicht werden
    pub fn notices(&self) -> broadcast::Receiver<WaitingForOthersNotice> {
        self.inner.notice_tx.subscribe()
    }

    pub fn timer_state(&self, kind: TimerKind) -> Option<TimerState> {
        self.inner.timers.state(kind)
    }

    pub fn cancel(&self) {
        self.inner.shutdown();
        for task in &self.tasks {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel_token.is_cancelled()
    }
}

impl Stream for CallSounds {
    type Item = CallSoundCue;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.cues.poll_next_unpin(cx)
    }
}

impl Drop for CallSounds {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for CallSounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSounds")
            .field("id", &self.inner.id)
            .field("state", &*self.inner.state.lock())
            .field("timers", &self.inner.timers)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
