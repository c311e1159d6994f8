//! # neuro-daq
//!
//! Real-time acquisition core for neurophysiology instrument data streams.
//! The instrument pushes a continuous stream of packets over a link: sampled
//! analog frames, sorted spike events, digital and serial port events,
//! comments, motion tracking blobs and configuration reports. This crate
//! receives those packets one at a time, fans them out to registered
//! callbacks and buffers the cacheable classes in per-trial ring caches that
//! clients drain with a poll-style `init`/`get` API.
//!
//! ## Crate Structure
//!
//! - **`packet`**: the decoded packet model and the channel-space constants
//!   shared by every other module.
//! - **`cache`**: the four trial cache families (continuous, event, comment,
//!   tracking), all built on the same drop-oldest ring discipline.
//! - **`trial`**: the trial controller owning the caches, the begin/end
//!   trigger state machine and the channel accept mask.
//! - **`dispatch`**: packet classification and late-bound callback dispatch.
//! - **`registry`**: the fixed table of instrument instances and the public
//!   operation surface.
//! - **`config`**: TOML plus environment configuration loading.
//! - **`telemetry`**: tracing initialization.
//! - **`error`**: the crate-wide `AcqError` type.
//! - **`mock`**: a deterministic synthetic packet source for tests and
//!   benchmarks.
//!
//! ## Example
//!
//! ```
//! use neuro_daq::{Registry, TrialConfig, Packet};
//!
//! # fn main() -> neuro_daq::AcqResult<()> {
//! let registry = Registry::new();
//! registry.open(0)?;
//! registry.configure_trial(0, TrialConfig {
//!     active: true,
//!     event_samples: 1024,
//!     ..TrialConfig::default()
//! })?;
//!
//! registry.process_packet(0, &Packet::spike(100, 17, 1))?;
//!
//! let init = registry.init_events(0, None)?;
//! assert_eq!(init.channels[0].channel, 17);
//! let events = registry.get_events(0, true)?;
//! assert_eq!(events.channels[0].events.timestamps[1], vec![100]);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod mock;
pub mod packet;
pub mod registry;
pub mod telemetry;
pub mod trial;

pub use config::AcqConfig;
pub use dispatch::{Callback, CallbackKind};
pub use error::{AcqError, AcqResult};
pub use packet::{Packet, PacketBody, PacketHeader, ReportKind, TrackCoords};
pub use registry::{Instance, InstanceId, Registry, TrialData, TrialInit, TrialRequest};
pub use trial::{TrialConfig, TrialController, TrialKind, TrialStatus};
