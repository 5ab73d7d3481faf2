//! Data collection agents: official hydrological telemetry and
//! crowdsourced scout reports.

pub mod flood;
pub mod scout;

pub use flood::{FloodCollector, FloodCollectorStats, HydroSource};
pub use scout::{Gazetteer, ScoutCollector, ScoutCollectorStats};
