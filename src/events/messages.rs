//! Event-Typen der Call-Quellen
//!
//! Diese Strukturen bilden die Updates des Chat-SDKs ab (Calls, Sessions,
//! Teilnehmer) und sind serialisierbar, damit Event-Skripte im JSON-Format
//! abgespielt werden können.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// CALL
// ============================================================================

/// Lebenszyklus eines Calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initial,
    UserNoPresent,
    Connecting,
    Joining,
    InProgress,
    TerminatingUserParticipation,
    Destroyed,
    Unknown,
}

/// Welche Eigenschaften eines Calls sich mit einem Update geändert haben
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallChange {
    Status,
    LocalAvFlags,
    RingingStatus,
    CallComposition,
    OnHold,
    OutgoingRingingStop,
    OwnPermission,
    GenericNotification,
    WaitingRoomComposition,
    WaitingRoomUsersEntered,
    WaitingRoomUsersLeave,
    WaitingRoomUsersAllow,
    WaitingRoomUsersDeny,
    WaitingRoomPushedFromCall,
}

/// Teilnehmer, die im Warteraum auf Einlass warten
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingRoom {
    #[serde(default)]
    pub peers: Vec<u64>,
}

/// Snapshot eines Calls zum Zeitpunkt eines Updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCall {
    #[serde(rename = "chatId")]
    pub chat_id: u64,
    #[serde(rename = "callId")]
    pub call_id: u64,
    pub status: CallStatus,
    #[serde(default)]
    pub changes: HashSet<CallChange>,
    #[serde(rename = "waitingRoom", default)]
    pub waiting_room: Option<WaitingRoom>,
    #[serde(rename = "numParticipants", default)]
    pub num_participants: usize,
    #[serde(rename = "hasLocalAudio", default)]
    pub has_local_audio: bool,
}

impl ChatCall {
    /// Erstellt einen Call ohne Änderungen
    pub fn new(chat_id: u64, call_id: u64, status: CallStatus) -> Self {
        Self {
            chat_id,
            call_id,
            status,
            changes: HashSet::new(),
            waiting_room: None,
            num_participants: 0,
            has_local_audio: false,
        }
    }

    /// Fügt eine Änderung hinzu (Builder-Stil)
    pub fn with_change(mut self, change: CallChange) -> Self {
        self.changes.insert(change);
        self
    }

    pub fn with_waiting_room(mut self, peers: Vec<u64>) -> Self {
        self.waiting_room = Some(WaitingRoom { peers });
        self
    }

    pub fn with_participants(mut self, num_participants: usize) -> Self {
        self.num_participants = num_participants;
        self
    }

    pub fn with_local_audio(mut self, has_local_audio: bool) -> Self {
        self.has_local_audio = has_local_audio;
        self
    }

    pub fn has_change(&self, change: CallChange) -> bool {
        self.changes.contains(&change)
    }

    /// Anzahl der Peers im Warteraum (0 ohne Warteraum)
    pub fn waiting_room_size(&self) -> usize {
        self.waiting_room.as_ref().map_or(0, |room| room.peers.len())
    }
}

// ============================================================================
// SESSION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Invalid,
    Progress,
    Destroyed,
}

/// Grund für das Ende einer Session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTermCode {
    Invalid,
    /// Verbindung kann sich noch erholen
    Recoverable,
    /// Verbindung ist endgültig weg
    NonRecoverable,
}

/// Leg eines Teilnehmers innerhalb eines Calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    #[serde(rename = "peerId")]
    pub peer_id: u64,
    #[serde(rename = "clientId")]
    pub client_id: u64,
    pub status: SessionStatus,
    #[serde(rename = "termCode", default)]
    pub term_code: Option<SessionTermCode>,
}

impl ChatSession {
    pub fn progress(peer_id: u64, client_id: u64) -> Self {
        Self {
            peer_id,
            client_id,
            status: SessionStatus::Progress,
            term_code: None,
        }
    }

    pub fn destroyed(peer_id: u64, client_id: u64, term_code: SessionTermCode) -> Self {
        Self {
            peer_id,
            client_id,
            status: SessionStatus::Destroyed,
            term_code: Some(term_code),
        }
    }
}

/// Session-Update, wie es vom SDK geliefert wird
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(default)]
    pub call: Option<ChatCall>,
    #[serde(default)]
    pub session: Option<ChatSession>,
}

// ============================================================================
// CHAT ROOM & PARTICIPANTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    #[serde(rename = "chatId")]
    pub chat_id: u64,
    #[serde(rename = "isGroup", default)]
    pub is_group: bool,
    #[serde(rename = "isMeeting", default)]
    pub is_meeting: bool,
}

impl ChatRoom {
    /// Weder Gruppe noch Meeting
    pub fn is_one_to_one(&self) -> bool {
        !self.is_group && !self.is_meeting
    }
}

/// "Bin ich allein im Call?"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AloneStatus {
    #[serde(rename = "chatId")]
    pub chat_id: u64,
    #[serde(rename = "aloneInCall")]
    pub alone_in_call: bool,
    #[serde(rename = "waitingForOthers", default)]
    pub waiting_for_others: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantChangeKind {
    Join,
    Leave,
}

/// Teilnehmer sind dem Call beigetreten oder haben ihn verlassen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantChange {
    #[serde(rename = "chatId")]
    pub chat_id: u64,
    pub kind: ParticipantChangeKind,
    #[serde(default)]
    pub peers: Vec<u64>,
}

/// Einstellung: Sounds bei Teilnehmer-Änderungen abspielen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundNotifications {
    #[default]
    Enabled,
    Disabled,
}

impl SoundNotifications {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "enabled" => Some(Self::Enabled),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

// ============================================================================
// EVENT ENVELOPE
// ============================================================================

/// Alle Events, die über den EventHub verteilt werden
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
    Session(SessionUpdate),
    Reconnecting { reconnecting: bool },
    CallUpdate(ChatCall),
    Alone(AloneStatus),
    Participants(ParticipantChange),
    OutgoingRinging(ChatCall),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call_update_event() {
        let json = r#"{
            "type": "call_update",
            "chatId": 7,
            "callId": 70,
            "status": "in_progress",
            "changes": ["waiting_room_users_entered"],
            "waitingRoom": { "peers": [12] }
        }"#;

        let event: CallEvent = serde_json::from_str(json).unwrap();
        let CallEvent::CallUpdate(call) = event else {
            panic!("expected call update, got {:?}", event);
        };
        assert_eq!(call.chat_id, 7);
        assert!(call.has_change(CallChange::WaitingRoomUsersEntered));
        assert_eq!(call.waiting_room_size(), 1);
        assert!(!call.has_local_audio);
    }

    #[test]
    fn test_parse_session_event_without_call() {
        let json = r#"{
            "type": "session",
            "session": { "peerId": 5, "clientId": 9, "status": "destroyed", "termCode": "recoverable" }
        }"#;

        let event: CallEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            CallEvent::Session(SessionUpdate {
                call: None,
                session: Some(ChatSession::destroyed(5, 9, SessionTermCode::Recoverable)),
            })
        );
    }

    #[test]
    fn test_chat_room_kind() {
        let room = ChatRoom {
            chat_id: 1,
            is_group: false,
            is_meeting: false,
        };
        assert!(room.is_one_to_one());

        let meeting = ChatRoom {
            is_meeting: true,
            ..room
        };
        assert!(!meeting.is_one_to_one());
    }

    #[test]
    fn test_sound_notifications_text() {
        assert_eq!(
            SoundNotifications::parse(SoundNotifications::Disabled.as_str()),
            Some(SoundNotifications::Disabled)
        );
        assert_eq!(SoundNotifications::parse("loud"), None);
    }
}
