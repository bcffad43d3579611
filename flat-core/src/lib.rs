pub mod config;
pub mod error;
pub mod listing;
pub mod notify;
pub mod orchestrator;
pub mod scheduler;
pub mod sources;
pub mod storage;
pub mod tracker;

pub use config::AppConfig;
pub use error::{ConfigError, FetchError, NotifyError, SchedulerError, StoreError};
pub use listing::{Listing, Source, SourceQuery};
pub use notify::commands::CommandListener;
pub use notify::telegram::{TelegramApi, TelegramSink};
pub use notify::NotificationSink;
pub use orchestrator::{
    CycleOrchestrator, CyclePhase, CycleReport, SourceOutcome, SourceReport, EMPTY_CYCLE_HEARTBEAT,
};
pub use scheduler::{spawn_scheduler, PollerHandle};
pub use sources::{build_http_client, HtmlFetcher, SourceFetcher};
pub use storage::{JsonFileBackend, MemoryBackend, NoveltyState, StateBackend};
pub use tracker::NoveltyTracker;
