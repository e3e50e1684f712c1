//! Concurrent transfer engine for an interactive DBFS-style client.
//!
//! # Architecture
//!
//! - [`client`] - JSON-over-HTTPS client for the backend's file API
//! - [`rate_gate`] - concurrency bound + rate-limit cooldown shared by every request
//! - [`retry`] - classifies failures and drives the retry/backoff policy
//! - [`swarm`] - bounded worker pool with FIFO/priority task queueing
//! - [`walker`] - ordered recursive directory listing with predicate filtering
//! - [`mirror`] - recursive tree transfer (`rget`/`rput`), parameterised by direction
//! - [`chunked_reader`] - single-file ranged download
//! - [`streaming_writer`] - single-file block-streamed upload
//! - [`session`] - the `cwd`-aware façade tying everything together
//! - [`config`] - read-only INI-style configuration loader
//! - [`fileinfo`] / [`predicate`] / [`error`] - shared value types

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod chunked_reader;
pub mod client;
pub mod config;
pub mod error;
pub mod fileinfo;
pub mod mirror;
pub mod predicate;
pub mod rate_gate;
pub mod retry;
pub mod session;
pub mod streaming_writer;
pub mod swarm;
pub mod walker;

pub use client::ApiClient;
pub use config::{Config, EngineSettings, Profile};
pub use error::{ApiError, ConfigError, TransferError, WalkError};
pub use fileinfo::FileInfo;
pub use mirror::{Direction, MirrorOutcome, RGetter, RPutter};
pub use predicate::PredicateBundle;
pub use session::Session;
pub use walker::WalkEntry;
