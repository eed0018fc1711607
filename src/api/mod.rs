//! HTTP API Module
//!
//! Provides a read-only REST API for node status, counters and placement.

mod http;

pub use http::{HttpServer, PlacementResponse, StatusResponse};
