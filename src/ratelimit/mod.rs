pub mod browser;
pub mod token_bucket;

pub use browser::{BrowserLimiter, BrowserLimits};
pub use token_bucket::TokenBucket;
