//! # adbstatus-server
//!
//! Daemon and HTTPS status API for adbstatus.
//!
//! - [`api`] - Routes, handlers and the OpenAPI document
//! - [`daemon`] - Process lifecycle: run, stop, status
//! - [`logging`] - Subscriber setup for foreground and background runs
//! - [`report`] - One-shot device listing
//! - [`state`] - Shared application state
//! - [`tls`] - HTTPS listener

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod daemon;
pub mod logging;
pub mod report;
pub mod state;
pub mod tls;
