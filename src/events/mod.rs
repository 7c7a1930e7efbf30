//! Events Module - Call-Updates aus dem Chat-SDK
//!
//! Dieses Modul enthält:
//! - Das serialisierbare Event-Modell (Calls, Sessions, Teilnehmer)
//! - Den EventHub, der Events an die Subscriber verteilt
//!

mod hub;
mod messages;

pub use hub::{EventHub, EventSourceKind};
pub use messages::*;
