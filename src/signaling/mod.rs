mod message;
mod registry;
mod relay;

pub use message::{ClientEvent, ServerEvent};
pub use registry::RoomRegistry;
pub use relay::RelayServer;
