//! AppleTalk Transaction Protocol, responder side.
//!
//! - [`packet`] - TReq/TResp/TRel header codec
//! - [`endpoint`] - [`AtpEndpoint`], the [`Transport`](crate::transport::Transport)
//!   over a real DDP socket

pub mod endpoint;
pub mod packet;

pub use endpoint::AtpEndpoint;
