//! Forwarding of request payloads to an external service.
//!
//! The server hands each request's text to an optional [`Sink`]. Sink
//! failures are the sink's problem: the server logs them and answers the
//! request regardless.
//!
//! - [`twitter`] - posts each payload as a tweet
//! - [`oauth`] - OAuth 1.0a signing used by the Twitter sink

pub mod oauth;
pub mod twitter;

use anyhow::Result;
use async_trait::async_trait;

pub use twitter::TwitterSink;

/// Consumer of request payloads.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Hand over one payload (request marker already stripped).
    async fn forward(&self, payload: &[u8]) -> Result<()>;
}
