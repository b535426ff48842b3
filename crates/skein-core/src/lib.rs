//! Core types and engine for the Skein timeline reader.
//!
//! This crate owns the thread-reconstruction and fetch-frontier logic: it
//! turns individually fetched posts into rooted discussion trees, tracks
//! which referenced posts are still missing, and decides which time ranges
//! still need fetching. Storage and network access sit behind the
//! [`store::Store`] and [`fetch::FetchService`] traits.

pub mod dangling;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod frontier;
pub mod linker;
pub mod memory;
pub mod model;
pub mod plan;
pub mod relevance;
pub mod resolve;
pub mod snapshot;
pub mod store;
pub mod window;

pub use error::{Error, Result};

#[cfg(test)]
mod testing;
