//! leinwand-protocol – Signaling-Protokoll
//!
//! Dieses Crate definiert den Umschlag `{type, data}`, der zwischen Relay,
//! Broadcaster und Viewern ausgetauscht wird, sowie die wenigen Payloads,
//! deren Felder Relay oder Client tatsaechlich lesen.
//!
//! `data` bleibt fuer den Codec opak und wird Byte fuer Byte durchgereicht.

pub mod control;
pub mod wire;

pub use control::{HelloDaten, JoinRejectDaten, OpCode, PeerDaten, PeerZiel, Signal, SignalTyp};
pub use wire::{DecodeError, Envelope};
