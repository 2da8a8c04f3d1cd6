pub mod browser;
pub mod clock;
pub mod config;
