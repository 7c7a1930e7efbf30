//! Preferences Database
//!
//! SQLite-Datenbank für die Call-Einstellungen.
//! Speichert, ob bei Teilnehmer-Änderungen ein Sound gespielt wird, und
//! benachrichtigt Subscriber über jede Änderung.

use crate::events::SoundNotifications;
use crate::gateway::{EventStream, SoundPreferences};
use futures::StreamExt;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::watch;

const SOUND_NOTIFICATIONS_KEY: &str = "calls_sound_notifications";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum PreferencesError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("Invalid value for preference {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

// ============================================================================
// DATABASE
// ============================================================================

/// SQLite-Datenbank für Einstellungen (Thread-safe durch Mutex)
pub struct SoundPreferenceStore {
    conn: Mutex<Connection>,
    changes: watch::Sender<SoundNotifications>,
}

impl SoundPreferenceStore {
    /// Öffnet oder erstellt die Datenbank im App-Datenverzeichnis
    pub fn open() -> Result<Self, PreferencesError> {
        let db_path = Self::get_database_path()?;
        Self::open_at(&db_path)
    }

    pub fn open_at(db_path: &Path) -> Result<Self, PreferencesError> {
        // Parent-Verzeichnis erstellen
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!("Opening preferences at {:?}", db_path);
        Self::with_connection(Connection::open(db_path)?)
    }

    /// In-Memory Datenbank (Tests, Replay)
    pub fn open_in_memory() -> Result<Self, PreferencesError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PreferencesError> {
        Self::init_schema(&conn)?;
        let current = Self::read_sound_notifications(&conn)?;
        let (changes, _) = watch::channel(current);

        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    /// Ermittelt den Pfad zur Datenbank-Datei
    fn get_database_path() -> Result<PathBuf, PreferencesError> {
        let proj_dirs =
            directories::ProjectDirs::from("com", "kaufm", "call-sounds").ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine app data directory",
                )
            })?;

        let mut path = proj_dirs.data_dir().to_path_buf();
        path.push("preferences.db");
        Ok(path)
    }

    fn init_schema(conn: &Connection) -> Result<(), PreferencesError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;
        Ok(())
    }

    fn read_sound_notifications(conn: &Connection) -> Result<SoundNotifications, PreferencesError> {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![SOUND_NOTIFICATIONS_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            None => Ok(SoundNotifications::default()),
            Some(value) => {
                SoundNotifications::parse(&value).ok_or_else(|| PreferencesError::InvalidValue {
                    key: SOUND_NOTIFICATIONS_KEY.to_string(),
                    value,
                })
            }
        }
    }

    /// Gespeicherter Wert, `Enabled` wenn nie gesetzt
    pub fn sound_notifications(&self) -> Result<SoundNotifications, PreferencesError> {
        let conn = self.conn.lock();
        Self::read_sound_notifications(&conn)
    }

    /// Speichert den Wert und benachrichtigt alle Subscriber
    pub fn set_sound_notifications(&self, value: SoundNotifications) -> Result<(), PreferencesError> {
        {
            let conn = self.conn.lock();
            conn.execute(
                r#"
                INSERT INTO preferences (key, value, updated_at)
                VALUES (?1, ?2, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
                "#,
                params![SOUND_NOTIFICATIONS_KEY, value.as_str()],
            )?;
        }

        tracing::debug!("Sound notifications set to {:?}", value);
        self.changes.send_replace(value);
        Ok(())
    }
}

impl SoundPreferences for SoundPreferenceStore {
    fn monitor_sound_notifications(&self) -> EventStream<SoundNotifications> {
        let rx = self.changes.subscribe();

        futures::stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let value = *rx.borrow_and_update();
            Some((Ok(value), (rx, false)))
        })
        .boxed()
    }
}

impl std::fmt::Debug for SoundPreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundPreferenceStore")
            .field("sound_notifications", &*self.changes.borrow())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
