pub mod app;
pub mod cache;
pub mod dispatch;
pub mod enrichment;
pub mod github;
pub mod monitor;
pub mod ratelimit;
pub mod retry;
pub mod state;
pub mod util;
