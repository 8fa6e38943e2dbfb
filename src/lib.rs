pub mod change_detector;
pub mod config;
pub mod coordinates;
pub mod db;
pub mod db_pool;
pub mod db_schema;
pub mod geocode;
pub mod indexer;
pub mod metadata_extractor;
pub mod query_engine;
pub mod warp_handlers;
pub mod warp_helpers;
