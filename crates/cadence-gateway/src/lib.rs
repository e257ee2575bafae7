//! # Cadence Gateway
//! HTTP surface for the follow-up engine.
//!
//! Three consumer groups, none of which contain engine logic themselves:
//! admin screens (campaign CRUD), funnel dashboards (read-only), and the
//! WhatsApp webhook (inbound message intake).

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, serve};
