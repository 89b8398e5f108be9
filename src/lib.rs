//! # Province Dispatch
//!
//! A hierarchical, message-passing work distributor for delivering medical
//! supply orders across provinces.
//!
//! This crate provides:
//! - A coordinator that pools idle workers and lends them to starved provinces
//! - Province leaders that hand orders to workers and track completions
//! - Workers that follow custody transfers between leaders
//! - A transport abstraction with an in-memory implementation
//! - YAML plans and a tabled run report

pub mod actor;
pub mod adapter;
pub mod cli;
pub mod config;
pub mod domain;
pub mod port;
pub mod ui;

pub use actor::Guardian;
pub use adapter::transport::InMemoryTransport;
pub use cli::{Cli, Commands};
pub use config::{DispatchPlan, Tuning, load_plan};
pub use domain::{error::DispatchError, state::RunReport, topology::Topology};
pub use port::transport::{Communicator, Transport};
