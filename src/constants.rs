//! Application-wide constants for atalk-memo.
//!
//! Wire markers, buffer sizes, protocol timers and flag defaults live here so
//! the protocol modules and the binary agree on them.
//!
//! # Categories
//!
//! - **Framing**: application-level markers and transaction buffer sizes
//! - **Timeouts**: name-directory request timing
//! - **Defaults**: command-line defaults

use std::time::Duration;

// ============================================================================
// Framing
// ============================================================================

/// Capacity of the per-transaction request buffer.
///
/// Requests larger than this are truncated by the transport.
pub const REQUEST_BUFFER_SIZE: usize = 4624;

/// Marker a HyperCard client puts in front of every request.
pub const REQUEST_MARKER: &[u8; 4] = b"REQS";

/// Marker this responder puts in front of every reply.
pub const RESPONSE_MARKER: &[u8; 4] = b"RESP";

/// Terminator appended after the standard response text.
pub const RESPONSE_TERMINATOR: u8 = 0;

// ============================================================================
// Timeouts
// ============================================================================

/// How long to wait for the local name daemon to answer one NBP request.
pub const NBP_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of NBP request attempts before giving up.
pub const NBP_ATTEMPTS: u32 = 3;

/// HTTP request timeout for sink and authorization calls.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Defaults
// ============================================================================

/// NBP name registered when none is given.
pub const DEFAULT_NBP_NAME: &str = "GophersInYourAppletalk:Twitter";

/// Reply text sent to every request when none is given.
pub const DEFAULT_STANDARD_RESPONSE: &str = "Gophers in your HyperCard!";

/// Default location of the Twitter consumer key file.
pub const DEFAULT_TWITTER_PARAMS_FILE: &str = "twitter_params.json";

/// Default location of the Twitter user token file.
pub const DEFAULT_TWITTER_TOKEN_FILE: &str = "twitter_token.json";

/// Default Twitter API base URL.
pub const DEFAULT_TWITTER_API_URL: &str = "https://api.twitter.com";
