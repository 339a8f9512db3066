//! Verbatim caching overlay for a normalized query store.
//!
//! Registered named queries are kept whole and served back when their
//! arguments match; everything else is delegated to the wrapped store.

pub mod cache;
pub mod config;
pub mod error;
pub mod replay;
pub mod telemetry;
