//! Shared fixtures for gateway integration tests.
#![allow(dead_code)]

pub mod mock_backend;
pub mod test_gateway;

pub use mock_backend::*;
pub use test_gateway::*;
