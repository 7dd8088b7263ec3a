//! atalk-memo - an AppleTalk transaction responder.
//!
//! Registers a name on the AppleTalk network, answers every ATP request with
//! a fixed reply, and can forward each request's text to Twitter.
//!
//! # Architecture
//!
//! Two tasks share the process:
//!
//! - **Server** - a tokio task running [`TransactionServer`], one transaction at a time
//! - **Main** - registers the name, then blocks on an [`Interrupt`] and
//!   unregisters when it fires
//!
//! The network sits behind two seams so the core runs without AppleTalk:
//!
//! - [`Transport`] - request/response transactions ([`AtpEndpoint`] or [`transport::memory`])
//! - [`NameDirectory`] - name registration ([`NbpDirectory`] or [`MemoryDirectory`])
//!
//! # Modules
//!
//! - [`name`] - name grammar and Mac Roman encoding
//! - [`ddp`] / [`atp`] / [`nbp`] - AppleTalk wire protocols over `AF_APPLETALK`
//! - [`server`] - the transaction loop
//! - [`service`] - startup and shutdown wiring
//! - [`sink`] - forwarding of request text
//! - [`config`] - configuration and credential files

// Library modules
pub mod atp;
pub mod ddp;
pub mod directory;
pub mod nbp;
pub mod server;
pub mod service;
pub mod shutdown;
pub mod sink;
pub mod transport;

pub mod config;
pub mod constants;
pub mod name;

// Re-export commonly used types
pub use atp::AtpEndpoint;
pub use config::{Config, ConsumerParams, OAuthToken};
pub use ddp::AtAddress;
pub use directory::{MemoryDirectory, NameDirectory, Registration};
pub use name::ServiceName;
pub use nbp::NbpDirectory;
pub use server::TransactionServer;
pub use service::Service;
pub use shutdown::{Interrupt, InterruptTrigger};
pub use sink::{Sink, TwitterSink};
pub use transport::Transport;
