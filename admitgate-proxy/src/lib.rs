//! admitgate HTTP gateway.
//!
//! This crate contains the reverse-proxy transport: session resolution,
//! request rewriting, keep-alive upstream pools, streaming bodies, error
//! translation, the admin server, and the accept loop used by the
//! `admitgate` binary.

pub mod admin;
pub mod error;
pub mod logging_layer;
pub mod ports;
pub mod proxy_body;
pub mod proxy_config;
pub mod proxy_service;
pub mod routing;
pub mod server;
pub mod session;
