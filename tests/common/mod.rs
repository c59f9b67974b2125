//! Common test utilities
//!
//! This module is shared across all integration tests

pub mod fixtures;
pub mod recorder;

#[allow(unused_imports)]
pub use fixtures::{
    configuration, dir_entries, engine_config, layer, small_engine, test_cooldown, two_layers, two_strategies,
    FakeClock,
};
#[allow(unused_imports)]
pub use recorder::RecordingSink;
