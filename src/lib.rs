pub mod api;
pub mod booking;
pub mod client;
pub mod config;
pub mod error;
pub mod signaling;

pub use error::{Result, SignalError};
