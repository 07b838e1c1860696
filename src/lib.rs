//! Wagate - a multi-device WhatsApp gateway server.
//!
//! Supervises one client session per registered device: pairing via QR
//! challenges, message dispatch with per-account device auto-selection,
//! auto-reply rules, and webhook fan-out.

pub mod api;
pub mod client;
pub mod config;
pub mod handlers;
pub mod qr;
pub mod server;
pub mod session;
pub mod store;
