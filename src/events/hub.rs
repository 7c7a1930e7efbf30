//! In-Process Event-Quellen
//!
//! Verteilt Call-Events über Broadcast-Kanäle an beliebig viele
//! Subscriber. Jede Quelle hat ihren eigenen Kanal, damit ein Fehler oder
//! ein langsamer Subscriber die anderen Quellen nicht beeinflusst.

use super::messages::*;
use crate::gateway::{CallEventSource, EventStream, GatewayError};
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Die einzelnen Quellen des Hubs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSourceKind {
    Sessions,
    Reconnecting,
    Calls,
    Alone,
    Participants,
    OutgoingRinging,
}

impl EventSourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Reconnecting => "reconnecting",
            Self::Calls => "calls",
            Self::Alone => "alone",
            Self::Participants => "participants",
            Self::OutgoingRinging => "outgoing_ringing",
        }
    }
}

type Channel<T> = broadcast::Sender<Result<T, GatewayError>>;

/// Broadcast-basierte Implementierung von `CallEventSource`
pub struct EventHub {
    sessions: Channel<SessionUpdate>,
    reconnecting: Channel<bool>,
    calls: Channel<ChatCall>,
    alone: Channel<AloneStatus>,
    participants: Channel<ParticipantChange>,
    outgoing_ringing: Channel<ChatCall>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: broadcast::channel(capacity).0,
            reconnecting: broadcast::channel(capacity).0,
            calls: broadcast::channel(capacity).0,
            alone: broadcast::channel(capacity).0,
            participants: broadcast::channel(capacity).0,
            outgoing_ringing: broadcast::channel(capacity).0,
        }
    }

    /// Verteilt ein Event an die passende Quelle.
    ///
    /// Gibt die Anzahl der Subscriber zurück, die es erhalten haben.
    pub fn publish(&self, event: CallEvent) -> usize {
        match event {
            CallEvent::Session(update) => send(&self.sessions, Ok(update)),
            CallEvent::Reconnecting { reconnecting } => send(&self.reconnecting, Ok(reconnecting)),
            CallEvent::CallUpdate(call) => send(&self.calls, Ok(call)),
            CallEvent::Alone(status) => send(&self.alone, Ok(status)),
            CallEvent::Participants(change) => send(&self.participants, Ok(change)),
            CallEvent::OutgoingRinging(call) => send(&self.outgoing_ringing, Ok(call)),
        }
    }

    /// Meldet einen Fehler der Upstream-Quelle an alle Subscriber
    pub fn fail(&self, kind: EventSourceKind, message: impl Into<String>) {
        let error = GatewayError::Source {
            source_name: kind.name(),
            message: message.into(),
        };

        match kind {
            EventSourceKind::Sessions => send(&self.sessions, Err(error)),
            EventSourceKind::Reconnecting => send(&self.reconnecting, Err(error)),
            EventSourceKind::Calls => send(&self.calls, Err(error)),
            EventSourceKind::Alone => send(&self.alone, Err(error)),
            EventSourceKind::Participants => send(&self.participants, Err(error)),
            EventSourceKind::OutgoingRinging => send(&self.outgoing_ringing, Err(error)),
        };
    }

    pub fn subscriber_count(&self, kind: EventSourceKind) -> usize {
        match kind {
            EventSourceKind::Sessions => self.sessions.receiver_count(),
            EventSourceKind::Reconnecting => self.reconnecting.receiver_count(),
            EventSourceKind::Calls => self.calls.receiver_count(),
            EventSourceKind::Alone => self.alone.receiver_count(),
            EventSourceKind::Participants => self.participants.receiver_count(),
            EventSourceKind::OutgoingRinging => self.outgoing_ringing.receiver_count(),
        }
    }
}

/// Sendet auf einem Kanal, 0 wenn niemand zuhört
fn send<T>(tx: &Channel<T>, item: Result<T, GatewayError>) -> usize {
    tx.send(item).unwrap_or_else(|_| {
        tracing::debug!("Event published without subscribers");
        0
    })
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(100)
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("sessions", &self.sessions.receiver_count())
            .field("calls", &self.calls.receiver_count())
            .field("participants", &self.participants.receiver_count())
            .finish()
    }
}

/// Macht aus einem Broadcast-Receiver einen Stream. Verpasste Events werden
/// übersprungen, der Stream endet erst, wenn der Hub gedroppt wird.
fn into_stream<T>(rx: broadcast::Receiver<Result<T, GatewayError>>, kind: EventSourceKind) -> EventStream<T>
where
    T: Clone + Send + 'static,
{
    futures::stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Source '{}' lagged, skipped {} events", kind.name(), skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

impl CallEventSource for EventHub {
    fn monitor_session_updates(&self) -> EventStream<SessionUpdate> {
        into_stream(self.sessions.subscribe(), EventSourceKind::Sessions)
    }

    fn monitor_reconnecting_status(&self) -> EventStream<bool> {
        into_stream(self.reconnecting.subscribe(), EventSourceKind::Reconnecting)
    }

    fn monitor_call_updates(&self) -> EventStream<ChatCall> {
        into_stream(self.calls.subscribe(), EventSourceKind::Calls)
    }

    fn monitor_alone_status(&self) -> EventStream<AloneStatus> {
        into_stream(self.alone.subscribe(), EventSourceKind::Alone)
    }

    fn monitor_participant_changes(&self) -> EventStream<ParticipantChange> {
        into_stream(self.participants.subscribe(), EventSourceKind::Participants)
    }

    fn monitor_outgoing_ringing(&self) -> EventStream<ChatCall> {
        into_stream(self.outgoing_ringing.subscribe(), EventSourceKind::OutgoingRinging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_matching_source_only() {
        let hub = EventHub::new(8);
        let mut calls = hub.monitor_call_updates();
        let mut reconnecting = hub.monitor_reconnecting_status();

        let call = ChatCall::new(1, 10, CallStatus::InProgress);
        assert_eq!(hub.publish(CallEvent::CallUpdate(call.clone())), 1);

        assert_eq!(calls.next().await, Some(Ok(call)));

        hub.publish(CallEvent::Reconnecting { reconnecting: true });
        assert_eq!(reconnecting.next().await, Some(Ok(true)));
    }

    #[tokio::test]
    async fn test_every_source_is_routed() {
        let hub = EventHub::new(8);
        let mut sessions = hub.monitor_session_updates();
        let mut reconnecting = hub.monitor_reconnecting_status();
        let mut calls = hub.monitor_call_updates();
        let mut alone = hub.monitor_alone_status();
        let mut participants = hub.monitor_participant_changes();
        let mut ringing = hub.monitor_outgoing_ringing();

        let update = SessionUpdate {
            call: Some(ChatCall::new(1, 10, CallStatus::InProgress)),
            session: Some(ChatSession::progress(5, 9)),
        };
        let status = AloneStatus {
            chat_id: 1,
            alone_in_call: false,
            waiting_for_others: false,
        };
        let change = ParticipantChange {
            chat_id: 1,
            kind: ParticipantChangeKind::Join,
            peers: vec![5],
        };
        let call = ChatCall::new(1, 10, CallStatus::InProgress);

        assert_eq!(hub.publish(CallEvent::Session(update.clone())), 1);
        assert_eq!(hub.publish(CallEvent::Reconnecting { reconnecting: true }), 1);
        assert_eq!(hub.publish(CallEvent::CallUpdate(call.clone())), 1);
        assert_eq!(hub.publish(CallEvent::Alone(status)), 1);
        assert_eq!(hub.publish(CallEvent::Participants(change.clone())), 1);
        assert_eq!(hub.publish(CallEvent::OutgoingRinging(call.clone())), 1);

        assert_eq!(sessions.next().await, Some(Ok(update)));
        assert_eq!(reconnecting.next().await, Some(Ok(true)));
        assert_eq!(calls.next().await, Some(Ok(call.clone())));
        assert_eq!(alone.next().await, Some(Ok(status)));
        assert_eq!(participants.next().await, Some(Ok(change)));
        assert_eq!(ringing.next().await, Some(Ok(call)));

        hub.fail(EventSourceKind::OutgoingRinging, "gone");
        assert!(matches!(
            ringing.next().await,
            Some(Err(GatewayError::Source { source_name: "outgoing_ringing", .. }))
        ));
    }

    #[tokio::test]
    async fn test_failure_is_delivered_as_item() {
        let hub = EventHub::new(8);
        let mut alone = hub.monitor_alone_status();

        hub.fail(EventSourceKind::Alone, "sdk unavailable");
        let status = AloneStatus {
            chat_id: 3,
            alone_in_call: true,
            waiting_for_others: false,
        };
        hub.publish(CallEvent::Alone(status));

        match alone.next().await {
            Some(Err(GatewayError::Source { source_name, message })) => {
                assert_eq!(source_name, "alone");
                assert_eq!(message, "sdk unavailable");
            }
            other => panic!("expected source error, got {:?}", other),
        }
        assert_eq!(alone.next().await, Some(Ok(status)));
    }

    #[tokio::test]
    async fn test_stream_ends_when_hub_dropped() {
        let hub = EventHub::new(8);
        let mut sessions = hub.monitor_session_updates();
        assert_eq!(hub.subscriber_count(EventSourceKind::Sessions), 1);

        drop(hub);
        assert!(sessions.next().await.is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_to_newest() {
        let hub = EventHub::new(1);
        let mut reconnecting = hub.monitor_reconnecting_status();

        hub.publish(CallEvent::Reconnecting { reconnecting: true });
        hub.publish(CallEvent::Reconnecting { reconnecting: false });

        assert_eq!(reconnecting.next().await, Some(Ok(false)));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = EventHub::default();
        assert_eq!(hub.publish(CallEvent::Reconnecting { reconnecting: true }), 0);
    }
}
