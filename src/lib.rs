mod client;
mod diff;
mod error;
mod logger;
mod types;

pub mod encoder;
pub mod frame;
pub mod loader;
pub mod protocol;
pub mod transport;

pub use client::{FourHeatClient, FourHeatClientBuilder};
pub use error::{Error, Result, TransportError};
pub use loader::{LoaderConfig, ThermostatLocator};
pub use logger::MessageLogMode;
pub use protocol::ReadCommand;
pub use types::*;
