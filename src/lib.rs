//! Call Sounds - Sound-Entscheidungen für laufende Calls
//!
//! Vereint die Event-Quellen eines Calls zu einem Stream von Sound-Cues:
//! - Session-Abbrüche in 1:1-Calls mit Grace-Zeit bis zum Auflegen
//! - Allein im Call: Warten auf andere, Finish-Call-Counter, Mikrofon muten
//! - Call-Ende, Warteraum, Reconnect und Teilnehmer-Änderungen
//! - SQLite für die Sound-Einstellung

pub mod call_sounds;
pub mod config;
pub mod events;
pub mod gateway;
pub mod preferences;

pub use call_sounds::{
    CallSoundCue, CallSoundDecider, CallSoundDeps, CallSounds, DelayedActions, ParticipantKey,
    TimerKind, TimerState, WaitingForOthersNotice,
};
pub use config::{CallSoundConfig, ConfigError};
pub use events::{CallEvent, EventHub, EventSourceKind};
pub use gateway::{
    AudioManager, CallEventSource, CallGateway, CallSessionCoordinator, ChatManagement,
    EventStream, GatewayError, SoundPreferences,
};
pub use preferences::{PreferencesError, SoundPreferenceStore};

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert das Logging (RUST_LOG, Standard: call_sounds=debug)
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("call_sounds=debug".parse()?),
        )
        .with_writer(std::io::stderr)
        .try_init()
}
