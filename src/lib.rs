pub mod aggregator;
pub mod chart;
pub mod feed;
pub mod live_ops;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod state;
