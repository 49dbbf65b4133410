pub mod api;
pub mod client;
pub mod config;
pub mod forecast;
pub mod model;
pub mod monitor;
pub mod packet;
pub mod socket;
pub mod store;
pub mod ui;

pub use client::Client;
pub use config::ClientConfig;
