pub mod content;
pub mod gc;
pub mod ingest;
pub mod item;
pub mod periodic;
pub mod replication;
pub mod stream_hub;
pub mod unit;

pub use content::ContentReader;
pub use gc::{GarbageCollector, WaitingReport};
pub use ingest::{LogIngestor, LogMessage};
pub use item::ItemService;
pub use periodic::spawn_periodic;
pub use replication::ReplicationWorker;
pub use stream_hub::{LineSubscription, StreamHub};
pub use unit::UnitManager;
