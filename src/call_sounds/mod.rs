//! Call Sounds Module - Entscheidet, welcher Sound gespielt wird
//!
//! Dieses Modul verwaltet:
//! - Die Sound-Cues und Teilnehmer-Schlüssel
//! - Abbrechbare, verzögerte Aktionen (Countdown-Timer)
//! - Den CallSoundDecider, der alle Call-Events zu einem Cue-Stream vereint

mod cue;
mod decider;
mod timers;

pub use cue::{CallSoundCue, ParticipantKey, WaitingForOthersNotice};
pub use decider::{CallSoundDecider, CallSoundDeps, CallSounds, TimerKind};
pub use timers::{DelayedActions, TimerState};
