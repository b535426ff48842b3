//! Twitter API v2 backend for [`skein_core::fetch::FetchService`].
//!
//! Only wire concerns live here: endpoints, pagination, status mapping and
//! decoding into raw records. Nothing in this crate touches the store.

mod client;
mod wire;

pub use client::{TwitterClient, TwitterConfig};
