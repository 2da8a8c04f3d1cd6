pub mod dedup;
pub mod event_monitor;
pub mod feed;
pub mod processor;

pub use dedup::{DedupSettings, EventDedup};
pub use event_monitor::{DeliveryOutcome, EventDelivery, EventMonitor, MonitorStatus, MonitoredOrgs};
pub use feed::{
    EventSink, FeedError, FeedEvent, HttpEventFeed, PrLocator, PushFeed, Subscription,
    UrlParseError, parse_pr_url,
};
pub use processor::{EventOutcome, EventProcessor, RefreshTrigger};
