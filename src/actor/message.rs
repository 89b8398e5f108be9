//! Typed messages for actor communication
//!
//! Actor mailboxes only carry control ticks. Protocol traffic between
//! participants travels over the transport so that probes can filter by
//! source and topic.

use ractor::Message;

/// Messages for the Coordinator actor
#[derive(Debug, Clone)]
pub enum CoordinatorMessage {
    /// Push order counts to every leader and start the rendezvous
    Start,
    /// Run one monitoring iteration
    Poll
}

/// Messages for ProvinceLeader actors
#[derive(Debug, Clone)]
pub enum LeaderMessage {
    /// Run one assignment-loop iteration
    Poll
}

/// Messages for Worker actors
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    /// Run one run-loop iteration
    Poll
}

/// Result of one poll iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Something was handled; poll again right away
    Busy,
    /// Nothing pending; poll again after the backpressure delay
    Idle,
    /// Leave the loop
    Stop
}

// Implement Message trait for Ractor
impl Message for CoordinatorMessage {}
impl Message for LeaderMessage {}
impl Message for WorkerMessage {}
