pub mod context;
pub mod event_loop;
pub mod state;

pub use context::AppContext;
pub use state::PrLists;
