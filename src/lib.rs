pub mod calls;
pub mod config;
pub mod permissions;
pub mod profile;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use calls::{CallError, CallManager, CallerType, LocalSessionView, SessionStatus};
pub use config::CallManagerConfig;
