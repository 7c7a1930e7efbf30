//! Gateway Module - Schnittstellen zu den Collaborators
//!
//! Der CallSoundDecider spricht nie direkt mit dem SDK. Alles, was er
//! braucht, kommt über diese Traits herein:
//! - Event-Quellen (Sessions, Calls, Teilnehmer)
//! - Befehle an den Call (auflegen, stummschalten)
//! - Koordination der Call-Session (Finish-Call-Counter, Ring-Requests)
//! - Audio-Ressource und Sound-Einstellungen

mod coordinator;

pub use coordinator::ChatManagement;

use crate::events::{
    AloneStatus, ChatCall, ChatRoom, ParticipantChange, SessionUpdate, SoundNotifications,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Event source '{source_name}' failed: {message}")]
    Source {
        source_name: &'static str,
        message: String,
    },

    #[error("Request failed: {0}")]
    RequestFailed(String),
}

/// Stream einer Event-Quelle. Fehler beenden den Stream nicht.
pub type EventStream<T> = BoxStream<'static, Result<T, GatewayError>>;

// ============================================================================
// TRAITS
// ============================================================================

/// Asynchrone Event-Quellen eines laufenden Calls
pub trait CallEventSource: Send + Sync {
    fn monitor_session_updates(&self) -> EventStream<SessionUpdate>;

    fn monitor_reconnecting_status(&self) -> EventStream<bool>;

    fn monitor_call_updates(&self) -> EventStream<ChatCall>;

    fn monitor_alone_status(&self) -> EventStream<AloneStatus>;

    fn monitor_participant_changes(&self) -> EventStream<ParticipantChange>;

    /// Feuert, wenn ein ausgehender Call klingelt
    fn monitor_outgoing_ringing(&self) -> EventStream<ChatCall>;
}

/// Lesender und steuernder Zugriff auf Calls und Chats
#[async_trait]
pub trait CallGateway: Send + Sync {
    async fn chat_room(&self, chat_id: u64) -> Result<Option<ChatRoom>, GatewayError>;

    async fn chat_call(&self, chat_id: u64) -> Result<Option<ChatCall>, GatewayError>;

    async fn hang_up(&self, call_id: u64) -> Result<(), GatewayError>;

    /// Deaktiviert das lokale Mikrofon (fire-and-forget)
    fn mute_microphone(&self, chat_id: u64);
}

/// Ersatz für den globalen Chat-Management-Singleton
pub trait CallSessionCoordinator: Send + Sync {
    /// Wurde für diesen Call eine Ring-Anfrage gesendet?
    fn is_request_sent(&self, call_id: u64) -> bool;

    fn start_finish_call_counter(&self, chat_id: u64);

    fn stop_finish_call_counter(&self);

    fn set_end_call_dialog_ignored(&self, ignored: bool);
}

/// Audio-Manager des Calls (RTC Audio)
pub trait AudioManager: Send + Sync {
    /// Gibt die Audio-Ressource frei. Mehrfacher Aufruf ist harmlos.
    fn release(&self);
}

/// Einstellung für Teilnehmer-Sounds
pub trait SoundPreferences: Send + Sync {
    /// Liefert den aktuellen Wert und danach jede Änderung
    fn monitor_sound_notifications(&self) -> EventStream<SoundNotifications>;
}
