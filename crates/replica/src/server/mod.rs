mod config;
mod events;
mod server;

pub use config::ServerConfig;
pub use events::{DisconnectReason, ServerEvent};
pub use server::{NetworkServer, ServerState};
