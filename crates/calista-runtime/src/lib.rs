//! Runtime layer for the Calista ingestion service.
//!
//! Owns the fetch interface and its portal implementation, and the
//! orchestrator that drives serialized fetch → merge → import cycles.

pub mod fetcher;
pub mod orchestrator;
pub mod portal;

pub use calista_core as core;
pub use calista_data as data;
