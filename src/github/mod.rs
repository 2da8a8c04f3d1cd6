pub mod auth;
pub mod error;
pub mod models;
pub mod search;

pub use error::{ApiError, ErrorKind};
pub use models::*;
pub use search::{GithubClient, SearchSource};
