pub mod builder;
pub mod diagnose;
pub mod dispatch;
pub mod model;
pub mod strategies;
pub mod types;

pub use builder::{EnergyBalanceModelBuilder, ModelLayout};
pub use diagnose::*;
pub use dispatch::*;
pub use model::*;
pub use strategies::*;
pub use types::*;
