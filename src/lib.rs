//! # workmaster
//!
//! Event-sourced work distribution coordinator.
//!
//! Jobs submitted to a coordinator are recorded in an append-only event log
//! before anything observable happens, handed to workers on request, and
//! requeued when a worker fails or goes silent past its deadline. The ledger
//! is rebuilt by replaying the log, so every job reaches `done` exactly once
//! no matter how often submitters, workers, or the coordinator retry or crash.

pub mod announce;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod event;
pub mod ledger;
pub mod log;
pub mod model;
pub mod registry;
pub mod telemetry;
