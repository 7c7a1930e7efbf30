//! Verzögerte, abbrechbare Aktionen
//!
//! Pro Timer-Art läuft höchstens eine Aktion. Ein neues `schedule` für
//! dieselbe Art bricht die laufende ab und ersetzt sie (last-wins), und zwar
//! unter einem Lock, damit nie zwei Callbacks derselben Art feuern.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Zustand eines Timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Running,
    Cancelled,
    Fired,
}

struct Entry {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Slots<K> {
    entries: HashMap<K, Entry>,
    states: HashMap<K, TimerState>,
    next_generation: u64,
}

/// Timer-Tabelle, indiziert nach Timer-Art
pub struct DelayedActions<K> {
    slots: Arc<Mutex<Slots<K>>>,
    cancel_token: CancellationToken,
}

impl<K> DelayedActions<K>
where
    K: Eq + Hash + Copy + Debug + Send + 'static,
{
    /// Alle Aktionen enden spätestens, wenn `cancel_token` abgebrochen wird
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                entries: HashMap::new(),
                states: HashMap::new(),
                next_generation: 0,
            })),
            cancel_token,
        }
    }

    /// Plant `action` nach `delay` ein und ersetzt eine laufende Aktion derselben Art
    pub fn schedule<F>(&self, kind: K, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slots = self.slots.lock();

        if self.cancel_token.is_cancelled() {
            tracing::debug!("Timer {:?} not started, already shut down", kind);
            return;
        }

        if let Some(previous) = slots.entries.remove(&kind) {
            previous.handle.abort();
            tracing::debug!("Timer {:?} replaced", kind);
        }

        slots.next_generation += 1;
        let generation = slots.next_generation;

        let shared = Arc::clone(&self.slots);
        let token = self.cancel_token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    let mut slots = shared.lock();
                    if matches!(slots.entries.get(&kind), Some(entry) if entry.generation == generation) {
                        slots.entries.remove(&kind);
                        slots.states.insert(kind, TimerState::Cancelled);
                    }
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            // Nur die aktuelle Generation darf feuern
            {
                let mut slots = shared.lock();
                match slots.entries.get(&kind) {
                    Some(entry) if entry.generation == generation => {
                        slots.entries.remove(&kind);
                        slots.states.insert(kind, TimerState::Fired);
                    }
                    _ => return,
                }
            }

            tracing::debug!("Timer {:?} fired", kind);

            tokio::select! {
                () = token.cancelled() => {}
                () = action => {}
            }
        });

        slots.entries.insert(kind, Entry { generation, handle });
        slots.states.insert(kind, TimerState::Running);
        tracing::debug!("Timer {:?} started ({:?})", kind, delay);
    }

    /// Bricht die laufende Aktion dieser Art ab. `true`, falls eine lief.
    pub fn cancel(&self, kind: K) -> bool {
        let mut slots = self.slots.lock();
        match slots.entries.remove(&kind) {
            Some(entry) => {
                entry.handle.abort();
                slots.states.insert(kind, TimerState::Cancelled);
                tracing::debug!("Timer {:?} cancelled", kind);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut slots = self.slots.lock();
        let kinds: Vec<K> = slots.entries.keys().copied().collect();
        for kind in kinds {
            if let Some(entry) = slots.entries.remove(&kind) {
                entry.handle.abort();
                slots.states.insert(kind, TimerState::Cancelled);
            }
        }
    }

    /// Letzter bekannter Zustand dieser Timer-Art
    pub fn state(&self, kind: K) -> Option<TimerState> {
        self.slots.lock().states.get(&kind).copied()
    }

    pub fn is_running(&self, kind: K) -> bool {
        self.slots.lock().entries.contains_key(&kind)
    }
}

impl<K> std::fmt::Debug for DelayedActions<K>
where
    K: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("DelayedActions")
            .field("running", &slots.entries.keys().collect::<Vec<_>>())
            .field("states", &slots.states)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        A,
        B,
    }

    fn counting_action(counter: &Arc<AtomicUsize>, amount: usize) -> impl Future<Output = ()> {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(amount, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_fires_after_delay() {
        let timers = DelayedActions::new(CancellationToken::new());
        let counter = Arc::new(AtomicUsize::new(0));

        timers.schedule(Kind::A, Duration::from_secs(10), counting_action(&counter, 1));
        assert_eq!(timers.state(Kind::A), Some(TimerState::Running));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(timers.state(Kind::A), Some(TimerState::Fired));
        assert!(!timers.is_running(Kind::A));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_replaces_same_kind() {
        let timers = DelayedActions::new(CancellationToken::new());
        let counter = Arc::new(AtomicUsize::new(0));

        timers.schedule(Kind::A, Duration::from_secs(5), counting_action(&counter, 1));
        tokio::time::sleep(Duration::from_secs(3)).await;
        timers.schedule(Kind::A, Duration::from_secs(5), counting_action(&counter, 10));

        // Der erste Timer wäre jetzt abgelaufen
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kinds_are_independent() {
        let timers = DelayedActions::new(CancellationToken::new());
        let counter = Arc::new(AtomicUsize::new(0));

        timers.schedule(Kind::A, Duration::from_secs(1), counting_action(&counter, 1));
        timers.schedule(Kind::B, Duration::from_secs(1), counting_action(&counter, 100));
        assert!(timers.cancel(Kind::B));

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(timers.state(Kind::B), Some(TimerState::Cancelled));
        assert!(!timers.cancel(Kind::B));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_token_stops_everything() {
        let token = CancellationToken::new();
        let timers = DelayedActions::new(token.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        timers.schedule(Kind::A, Duration::from_secs(1), counting_action(&counter, 1));
        timers.schedule(Kind::B, Duration::from_secs(2), counting_action(&counter, 1));
        token.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        timers.cancel_all();
        assert!(!timers.is_running(Kind::A));
        assert!(!timers.is_running(Kind::B));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_after_shutdown_is_ignored() {
        let token = CancellationToken::new();
        let timers = DelayedActions::new(token.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        timers.schedule(Kind::A, Duration::from_secs(1), counting_action(&counter, 1));
        token.cancel();
        timers.schedule(Kind::B, Duration::from_secs(1), counting_action(&counter, 1));

        assert!(!timers.is_running(Kind::B));
        assert_eq!(timers.state(Kind::B), None);

        // Ohne cancel_all räumt der Task selbst auf
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!timers.is_running(Kind::A));
        assert_eq!(timers.state(Kind::A), Some(TimerState::Cancelled));
    }
}
