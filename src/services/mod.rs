pub mod daemon_client;
pub mod registry;
pub mod relay;
