pub mod backfill;
pub mod canonical;
pub mod config;
pub mod error;
pub mod http_client;
pub mod identity;
pub mod merge;
pub mod model;
pub mod rating;
pub mod reconcile;
pub mod scratch_status;
pub mod snapshot_cache;
pub mod timestamp;
pub mod upstream;
