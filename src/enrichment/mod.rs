pub mod client;
pub mod models;

pub use client::{Enricher, TurnClient};
pub use models::*;
