pub mod collection_sync;
pub mod config;
pub mod contract;
pub mod discovery;
pub mod group_lkg;
pub mod inventory;
pub mod logging;
pub mod model;
pub mod native;
pub mod reconcile;
pub mod runtime;
pub mod scan_cache;
pub mod search;
pub mod transport;
pub mod worker_stream;
