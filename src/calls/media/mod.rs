//! Real-time media engine integration.
//!
//! # Architecture
//!
//! - [`MediaEngine`]: capability interface of the native audio engine
//! - [`MediaEngineAdapter`]: checks availability once and guards every call
//! - [`LoopbackMediaHub`], [`LoopbackEngine`]: in-process engine used by the
//!   demo binary and tests

mod adapter;
mod engine;
mod loopback;

pub use adapter::MediaEngineAdapter;
pub use engine::{ChannelProfile, MediaEngine, MediaError, MediaEvent, RemoteLeaveReason};
pub use loopback::{LoopbackEngine, LoopbackMediaHub};
