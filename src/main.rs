//! Replay - spielt ein Event-Skript durch den CallSoundDecider
//!
//! Jede Zeile des Skripts (JSON Lines, Datei oder stdin) ist ein Schritt:
//! - `{"after_ms": 0, "event": {...}}`   Event veröffentlichen
//! - `{"wait_ms": 11000}`                Zeit vergehen lassen
//! - `{"chat_room": {...}}`              Chat-Raum bekannt machen
//! - `{"call": {...}}`                   Call-Zustand eines Chats setzen
//! - `{"request_sent": 42}`              Ring-Anfrage für Call 42 merken
//! - `{"sound_notifications": "disabled"}`
//!
//! Cues und ausgelöste Befehle werden als JSON Lines auf stdout ausgegeben.

use anyhow::{Context, Result};
use async_trait::async_trait;
use call_sounds::events::{ChatCall, ChatRoom, SoundNotifications};
use call_sounds::{
    AudioManager, CallEvent, CallGateway, CallSoundConfig, CallSoundDecider, CallSoundDeps,
    ChatManagement, EventHub, GatewayError, SoundPreferenceStore,
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// SCRIPT
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptStep {
    Event {
        #[serde(default)]
        after_ms: u64,
        event: CallEvent,
    },
    Wait {
        wait_ms: u64,
    },
    ChatRoom {
        chat_room: ChatRoom,
    },
    Call {
        call: ChatCall,
    },
    RequestSent {
        request_sent: u64,
    },
    SoundNotifications {
        sound_notifications: SoundNotifications,
    },
}

fn parse_script(reader: impl BufRead) -> Result<Vec<ScriptStep>> {
    let mut steps = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read script")?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step = serde_json::from_str(line)
            .with_context(|| format!("Invalid script step on line {}", index + 1))?;
        steps.push(step);
    }
    Ok(steps)
}

// ============================================================================
// COLLABORATORS
// ============================================================================

fn print_command(command: &str, key: &str, id: u64) {
    println!("{}", serde_json::json!({ "command": command, key: id }));
}

/// Gateway, das nur den bekannten Zustand liefert und Befehle ausgibt
#[derive(Default)]
struct ReplayGateway {
    rooms: Mutex<HashMap<u64, ChatRoom>>,
    calls: Mutex<HashMap<u64, ChatCall>>,
}

#[async_trait]
impl CallGateway for ReplayGateway {
    async fn chat_room(&self, chat_id: u64) -> Result<Option<ChatRoom>, GatewayError> {
        Ok(self.rooms.lock().get(&chat_id).copied())
    }

    async fn chat_call(&self, chat_id: u64) -> Result<Option<ChatCall>, GatewayError> {
        Ok(self.calls.lock().get(&chat_id).cloned())
    }

    async fn hang_up(&self, call_id: u64) -> Result<(), GatewayError> {
        print_command("hang_up", "callId", call_id);
        Ok(())
    }

    fn mute_microphone(&self, chat_id: u64) {
        print_command("mute_microphone", "chatId", chat_id);
    }
}

struct ReplayAudio;

impl AudioManager for ReplayAudio {
    fn release(&self) {
        println!("{}", serde_json::json!({ "command": "release_audio" }));
    }
}

struct Replay {
    hub: Arc<EventHub>,
    gateway: Arc<ReplayGateway>,
    coordinator: Arc<ChatManagement>,
    preferences: Arc<SoundPreferenceStore>,
}

impl Replay {
    async fn run(self, steps: Vec<ScriptStep>) -> Result<()> {
        for step in steps {
            match step {
                ScriptStep::Event { after_ms, event } => {
                    tokio::time::sleep(Duration::from_millis(after_ms)).await;
                    tracing::debug!("Replay event {:?}", event);
                    self.hub.publish(event);
                }
                ScriptStep::Wait { wait_ms } => {
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
                ScriptStep::ChatRoom { chat_room } => {
                    self.gateway.rooms.lock().insert(chat_room.chat_id, chat_room);
                }
                ScriptStep::Call { call } => {
                    self.gateway.calls.lock().insert(call.chat_id, call);
                }
                ScriptStep::RequestSent { request_sent } => {
                    self.coordinator.mark_request_sent(request_sent);
                }
                ScriptStep::SoundNotifications {
                    sound_notifications,
                } => {
                    self.preferences
                        .set_sound_notifications(sound_notifications)
                        .context("Failed to store sound notifications")?;
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    call_sounds::init_tracing().map_err(|e| anyhow::anyhow!(e))?;

    let config = CallSoundConfig::from_env()?;

    let steps = match std::env::args().nth(1) {
        Some(path) => {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("Failed to open script {}", path))?;
            parse_script(BufReader::new(file))?
        }
        None => parse_script(std::io::stdin().lock())?,
    };
    tracing::info!("Replaying {} steps", steps.len());

    let hub = Arc::new(EventHub::new(config.event_buffer));
    let gateway = Arc::new(ReplayGateway::default());
    let coordinator = Arc::new(ChatManagement::new(
        gateway.clone(),
        config.finish_call_counter,
    ));
    let preferences = Arc::new(SoundPreferenceStore::open_in_memory()?);

    let deps = CallSoundDeps {
        events: hub.clone(),
        gateway: gateway.clone(),
        coordinator: coordinator.clone(),
        audio: Arc::new(ReplayAudio),
        preferences: preferences.clone(),
    };
    let mut sounds = CallSoundDecider::new(config, deps).start();

    let replay = Replay {
        hub,
        gateway,
        coordinator: coordinator.clone(),
        preferences,
    };
    let mut replay = tokio::spawn(replay.run(steps));

    loop {
        tokio::select! {
            cue = sounds.next() => match cue {
                Some(cue) => println!("{}", serde_json::json!({ "cue": cue })),
                None => break,
            },
            result = &mut replay => {
                result.context("Replay task failed")??;
                break;
            }
        }
    }

    // Cues, die kurz vor Skriptende entstanden sind
    while let Ok(Some(cue)) = tokio::time::timeout(Duration::from_millis(50), sounds.next()).await {
        println!("{}", serde_json::json!({ "cue": cue }));
    }

    sounds.cancel();
    coordinator.shutdown();
    Ok(())
}
