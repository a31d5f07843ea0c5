// logcdn API library
//
// HTTP surface over the log item engine: downloads, listings, live streams
// and deletion requests.

pub mod http;

// Re-export commonly used types
pub use http::{create_router, AppState};
