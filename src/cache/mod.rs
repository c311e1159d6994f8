//! Trial data caches.
//!
//! Four cache families share one ring discipline (one slot kept free to tell
//! full from empty, drop-oldest on overflow, snapshot boundary latched by
//! init and honored by read):
//!
//! - [`continuous`]: per-sample-group frames in flat i16 storage
//! - [`event`]: per-channel timestamp/value pairs over the whole channel space
//! - [`comment`]: owned comment and log records
//! - [`tracking`]: per-trackable-object coordinate records with video sync
//!   association
//!
//! The caches hold no locks themselves; the trial controller wraps each one
//! in a mutex and owns the consume/peek policy.

pub mod comment;
pub mod continuous;
pub mod event;
pub mod tracking;

pub use comment::{CommentCache, CommentRecord};
pub use continuous::{ContinuousCache, GroupBuffer};
pub use event::{route_by_unit, ChannelEventBuffer, ChannelEvents, EventCache};
pub use tracking::{NodeBuffer, NodeInfo, SyncState, TrackRecord, TrackingCache};
