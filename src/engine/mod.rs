// ctsync Engine - Core module structure
pub mod config;
pub mod cli;
pub mod api;
pub mod service;
pub mod updater;

pub use config::Config;
pub use service::Service;
pub use updater::UpdateJob;
