//! Deterministic simulation harness for Parley sync testing.
//!
//! In-process implementations of the client's seams, driven by tokio's
//! virtual clock and a seeded RNG so every run of a scenario is reproducible:
//!
//! - [`SimEnv`]: [`Environment`](parley_core::Environment) over paused tokio
//!   time and ChaCha8
//! - [`SimRest`]: scriptable REST server with outage and auth toggles
//! - [`SimConnector`]: realtime server that answers pings, pushes frames and
//!   counts every channel it opens and closes

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_connector;
pub mod sim_env;
pub mod sim_rest;

pub use sim_connector::SimConnector;
pub use sim_env::{BASE_WALL_CLOCK_MILLIS, SimEnv};
pub use sim_rest::SimRest;
