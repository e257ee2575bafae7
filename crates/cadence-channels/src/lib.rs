//! # Cadence Channels
//! Messaging transport implementations behind the [`Messenger`] seam.
//!
//! WhatsApp is the only production transport; the engine itself never knows
//! which one it is talking to.
//!
//! [`Messenger`]: cadence_core::traits::Messenger

pub mod whatsapp;

pub use whatsapp::{InboundMessage, WhatsAppMessenger, parse_webhook};
