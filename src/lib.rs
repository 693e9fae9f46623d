//! # fieldwork
//!
//! Coordinates a fleet of crowd-work survey accounts. Each account
//! repeatedly claims a unit of work from the task platform, hands it to an
//! out-of-process capture pool through a durable per-kind queue (pgmq),
//! polls a shared Postgres result store until an outcome appears, classifies
//! it, and finalizes, retries, or abandons the claim.

pub mod classify;
pub mod config;
pub mod correlate;
pub mod db;
pub mod dedup;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod source;
pub mod supervisor;
pub mod telemetry;
