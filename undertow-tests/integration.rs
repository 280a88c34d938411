//! Integration tests for Undertow
//!
//! Drive the gateway through its HTTP surface with in-memory and mocked
//! piece sources.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/gateway_api.rs"]
mod gateway_api;

#[path = "integration/streaming.rs"]
mod streaming;
