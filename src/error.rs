//! Error types for the acquisition core.
//!
//! This module defines the primary error type, `AcqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! report everything a caller can get wrong (bad channel or group ids, trial
//! caches that were never configured, double callback registration) as well as
//! the few runtime failures the core can hit on its own (cache allocation).
//!
//! Public operations return [`AcqResult`]; the core never panics across the
//! API boundary. Cache storage is reserved with `try_reserve_exact`, so an
//! allocation failure surfaces as [`AcqError::TrialCacheMemory`] instead of
//! aborting the process, and never leaves a half-built cache behind.

use thiserror::Error;

use crate::dispatch::CallbackKind;
use crate::trial::TrialKind;

/// Convenience alias for results using the crate error type.
pub type AcqResult<T> = std::result::Result<T, AcqError>;

/// Errors produced by the acquisition core.
#[derive(Error, Debug)]
pub enum AcqError {
    /// The instance slot has no open link.
    #[error("Instrument link is not open")]
    Closed,

    /// The instance slot already holds an open link.
    #[error("Instance slot is already open")]
    AlreadyOpen,

    /// Instance id outside the fixed instance table.
    #[error("Invalid instance id {0}")]
    InvalidInstance(u32),

    /// Channel id outside the addressable channel space.
    #[error("Invalid channel id {0}")]
    InvalidChannel(u16),

    /// Sample group outside the 1-based group range.
    #[error("Invalid sample group {0}")]
    InvalidGroup(u16),

    /// Trackable object id outside the trackable table.
    #[error("Invalid trackable object id {0}")]
    InvalidTrackable(u16),

    /// A cache was requested with an unusable capacity.
    #[error("Invalid cache capacity {0}")]
    InvalidCapacity(u32),

    /// A sample packet carried a different channel count than the group
    /// buffer was allocated for.
    #[error("Channel count mismatch: cache holds {expected}, packet carries {got}")]
    ChannelCountMismatch {
        /// Channel count the group buffer was allocated with.
        expected: usize,
        /// Channel count carried by the offending packet.
        got: usize,
    },

    /// A read or teardown touched a trial cache that was never allocated.
    #[error("Trial cache not configured: {0:?}")]
    NotConfigured(TrialKind),

    /// Cache storage allocation failed.
    #[error("Out of memory while allocating trial cache storage")]
    TrialCacheMemory,

    /// A handler is already registered for this packet category.
    #[error("A callback is already registered for {0:?}")]
    CallbackRegistered(CallbackKind),

    /// Unregister was called on an empty callback slot.
    #[error("No callback registered for {0:?}")]
    CallbackNotRegistered(CallbackKind),

    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<figment::Error> for AcqError {
    fn from(value: figment::Error) -> Self {
        AcqError::Config(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_mismatch_names_both_counts() {
        let err = AcqError::ChannelCountMismatch {
            expected: 2,
            got: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains('2'));
        assert!(msg.contains('3'));
    }

    #[test]
    fn not_configured_names_the_cache() {
        let err = AcqError::NotConfigured(TrialKind::Comments);
        assert!(err.to_string().contains("Comments"));
    }
}
