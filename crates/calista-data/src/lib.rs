//! Data layer for the Calista ingestion service.
//!
//! Owns the pure history-merge engine, the cumulative statistics importer
//! with its checkpoint types, and the statistics sink implementations.

pub mod importer;
pub mod merge;
pub mod sink;
pub mod statistics;

pub use calista_core as core;
