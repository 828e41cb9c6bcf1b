pub mod cli;
pub mod cmd;
pub mod config;
pub mod logging;

pub use config::{HoaConfig, LogFormat};
