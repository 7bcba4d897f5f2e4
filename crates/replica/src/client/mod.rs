mod client;
mod config;
mod events;

pub use client::{ClientState, NetworkClient};
pub use config::ClientConfig;
pub use events::ClientEvent;
