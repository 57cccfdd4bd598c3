//! District energy hub: typical-period clustering and multi-carrier
//! dispatch optimisation for building districts.

pub mod clustering;
pub mod config;
pub mod domain;
pub mod error;
pub mod optimizer;
pub mod results;
pub mod scenario;
pub mod telemetry;

pub use error::{HubError, HubResult};
