//! rollcall-station: Runs capture-and-match cycles one at a time.
//!
//! The station thread owns the store and the embedding adapter. Handles
//! talk to it over a channel; a second request made while a cycle is in
//! flight is rejected rather than queued.

pub mod config;
pub mod embed;
pub mod station;

pub use config::{Config, ConfigError};
pub use embed::CommandAdapter;
pub use station::{spawn_station, Probe, StationError, StationHandle};
