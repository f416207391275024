//! Shared harness for integration tests

#![allow(dead_code)]

pub mod config;
pub mod mock_upstream;

use conduit_engine::Engine;

use self::config::ConfigBuilder;
use self::mock_upstream::MockUpstream;

/// Engine with every provider pointed at `mock`
pub fn engine(mock: &MockUpstream) -> Engine {
    Engine::from_config(&ConfigBuilder::new().with_mock(mock).build()).expect("engine builds from test config")
}
