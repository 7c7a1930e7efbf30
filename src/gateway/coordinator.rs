//! Chat Management
//!
//! Hält den Zustand, der über einzelne Calls hinweg geteilt wird:
//! gesendete Ring-Anfragen, den Finish-Call-Counter und das Flag für den
//! ignorierten End-Call-Dialog. Eine Instanz wird explizit erstellt und
//! in den CallSoundDecider injiziert.

use super::{CallGateway, CallSessionCoordinator};
use crate::call_sounds::{DelayedActions, TimerState};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FinishCallCounter;

pub struct ChatManagement {
    gateway: Arc<dyn CallGateway>,
    counter_duration: Duration,
    requests_sent: Mutex<HashSet<u64>>,
    counter_chat: Arc<Mutex<Option<u64>>>,
    counter: DelayedActions<FinishCallCounter>,
    end_call_dialog_ignored: AtomicBool,
    cancel_token: CancellationToken,
}

impl ChatManagement {
    pub fn new(gateway: Arc<dyn CallGateway>, counter_duration: Duration) -> Self {
        let cancel_token = CancellationToken::new();

        Self {
            gateway,
            counter_duration,
            requests_sent: Mutex::new(HashSet::new()),
            counter_chat: Arc::new(Mutex::new(None)),
            counter: DelayedActions::new(cancel_token.clone()),
            end_call_dialog_ignored: AtomicBool::new(false),
            cancel_token,
        }
    }

    /// Merkt sich, dass für diesen Call eine Ring-Anfrage gesendet wurde
    pub fn mark_request_sent(&self, call_id: u64) {
        self.requests_sent.lock().insert(call_id);
    }

    pub fn clear_request_sent(&self, call_id: u64) {
        self.requests_sent.lock().remove(&call_id);
    }

    pub fn is_finish_call_counter_running(&self) -> bool {
        self.counter.is_running(FinishCallCounter)
    }

    pub fn finish_call_counter_state(&self) -> Option<TimerState> {
        self.counter.state(FinishCallCounter)
    }

    /// Chat, für den der Counter gerade läuft
    pub fn finish_call_counter_chat(&self) -> Option<u64> {
        *self.counter_chat.lock()
    }

    pub fn has_end_call_dialog_been_ignored(&self) -> bool {
        self.end_call_dialog_ignored.load(Ordering::SeqCst)
    }

    /// Stoppt den Counter endgültig
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
        self.counter.cancel_all();
        *self.counter_chat.lock() = None;
    }
}

impl CallSessionCoordinator for ChatManagement {
    fn is_request_sent(&self, call_id: u64) -> bool {
        self.requests_sent.lock().contains(&call_id)
    }

    fn start_finish_call_counter(&self, chat_id: u64) {
        if self.cancel_token.is_cancelled() {
            return;
        }

        *self.counter_chat.lock() = Some(chat_id);

        let gateway = Arc::clone(&self.gateway);
        let counter_chat = Arc::clone(&self.counter_chat);
        self.counter.schedule(FinishCallCounter, self.counter_duration, async move {
            counter_chat.lock().take();
            tracing::info!("Finish call counter of chat {} elapsed", chat_id);

            match gateway.chat_call(chat_id).await {
                Ok(Some(call)) => {
                    if let Err(e) = gateway.hang_up(call.call_id).await {
                        tracing::error!("Failed to hang up call {}: {}", call.call_id, e);
                    }
                }
                Ok(None) => tracing::debug!("No call in chat {}, nothing to hang up", chat_id),
                Err(e) => tracing::error!("Failed to get call of chat {}: {}", chat_id, e),
            }
        });
    }

    fn stop_finish_call_counter(&self) {
        if self.counter.cancel(FinishCallCounter) {
            tracing::debug!("Finish call counter stopped");
        }
        *self.counter_chat.lock() = None;
    }

    fn set_end_call_dialog_ignored(&self, ignored: bool) {
        self.end_call_dialog_ignored.store(ignored, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ChatManagement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatManagement")
            .field("requests_sent", &*self.requests_sent.lock())
            .field("counter_chat", &self.finish_call_counter_chat())
            .field("end_call_dialog_ignored", &self.has_end_call_dialog_been_ignored())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
