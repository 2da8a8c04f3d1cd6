pub mod manager;

pub use manager::{NotificationPhase, PrState, PrStateManager, StateTimings, transition};
