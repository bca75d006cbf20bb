pub mod api;
pub mod config;
pub mod datastore;
pub mod decoder_bridge;
pub mod host_system;
pub mod http_response;
pub mod middleware;
pub mod services;

pub use services::auth;
