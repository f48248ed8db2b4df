#![doc = "rmd-core: synchronisation pipeline for rmd."]

//! This crate holds the continuous synchronisation pipeline that mirrors unread, tagged
//! read-it-later articles onto a remote document store as EPUB files, together with the
//! collaborator contracts it drives and the stock adapters for them.
//!
//! # Pipeline
//! - [`tailer`]: polls the [`contract::Source`] with an advancing [`cursor::Cursor`] and emits
//!   targets
//! - [`worker`]: one task per target; extracts, converts and hands the artifact over
//! - [`uploader`]: the single task that talks to the remote store, with reconnect-and-retry
//! - [`shutdown`]: turns one interrupt into a stop token for every listener
//! - [`pipeline`]: wires all of the above and drains in-flight workers before returning
//!
//! CLI glue (flags, logging setup, working directory) lives in the `rmd` crate.

pub mod config;
pub mod connection;
pub mod contract;
pub mod convert;
pub mod cursor;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod shutdown;
pub mod slug;
pub mod source;
pub mod store;
pub mod tailer;
pub mod uploader;
pub mod worker;
