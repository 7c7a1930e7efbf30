//! Preferences Module - Call-Einstellungen
//!
//! Persistiert die Sound-Einstellung für Calls in SQLite.

mod store;

pub use store::{PreferencesError, SoundPreferenceStore};
