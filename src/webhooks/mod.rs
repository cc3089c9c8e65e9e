//! Webhook handling for GitHub events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA256)
//! - Parsing of the deliveries the engine acts on into [`WebhookEvent`]

pub mod events;
pub mod parser;
pub mod signature;

pub use events::WebhookEvent;
pub use parser::{ParseError, parse_webhook};
pub use signature::{SignatureError, parse_signature_header, sign_payload, verify_signature};
