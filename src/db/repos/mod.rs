pub mod data_sources;
pub mod layouts;
pub mod links;
pub mod metrics;
pub mod sync_cache;
pub mod widgets;
