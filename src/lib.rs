//! switchboard library
//!
//! Telephony call-control webhook orchestration and a cross-vendor
//! tool-calling bridge:
//!
//! - [`webhooks`] authenticates provider webhooks (Twilio HMAC, Telnyx Ed25519)
//! - [`calls`] turns verified events into idempotent answer/transfer actions
//! - [`dispatch`] issues those actions against the provider REST API
//! - [`tools`] translates tool declarations, calls and results between vendors
//! - [`server`] exposes all of it over HTTP

pub mod calls;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod logging;
pub mod server;
pub mod tools;
pub mod webhooks;
