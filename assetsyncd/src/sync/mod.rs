pub mod cache;
pub mod commit;
pub mod executor;
pub mod integrity;
pub mod loader;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod preview;
pub mod queue;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod transfer;
