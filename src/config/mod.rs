//! Configuration and constants
//!
//! - [`defaults`] - Default values and file names
//! - [`master`] - Master configuration file (`buildmaster.toml`)
//! - [`builder`] - Worker configuration files

pub mod builder;
pub mod defaults;
pub mod master;

pub use builder::BuilderConfig;
pub use master::MasterConfig;
