use serde::{Deserialize, Serialize};

/// Sound, der abgespielt werden soll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallSoundCue {
    CallReconnecting,
    CallEnded,
    ParticipantJoined,
    ParticipantLeft,
    WaitingRoomUserEntered,
}

/// Identifiziert das Leg eines Teilnehmers (Peer + Client)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantKey {
    pub peer_id: u64,
    pub client_id: u64,
}

impl ParticipantKey {
    pub fn new(peer_id: u64, client_id: u64) -> Self {
        Self { peer_id, client_id }
    }
}

/// Wird veröffentlicht, wenn niemand innerhalb der Wartezeit beigetreten ist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingForOthersNotice {
    #[serde(rename = "chatId")]
    pub chat_id: u64,
    pub alone: bool,
}
