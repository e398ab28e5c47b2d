//! Test helpers for admitgate-core integration tests.

#![allow(dead_code)]

pub mod mock_kv;

pub use mock_kv::*;
