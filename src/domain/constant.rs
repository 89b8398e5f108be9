//! Domain Events - Structured event names for internal monitoring and debugging

/// Guardian (run launcher) Events
pub mod guardian {
    pub const RUN_STARTED: &str = "run.started";
    pub const ACTORS_SPAWNING: &str = "actors.spawning";
    pub const ACTOR_SPAWN_FAILED: &str = "actors.spawn_failed";
    pub const ACTORS_SPAWNED: &str = "actors.spawned";
    pub const OUTCOME_MISSING: &str = "outcome.missing";
    pub const RUN_COMPLETED: &str = "run.completed";
    pub const RUN_FAILED: &str = "run.failed";
}

/// Coordinator Actor Events
pub mod coordinator {
    pub const COORDINATOR_STARTED: &str = "coordinator.started";
    pub const ORDER_COUNT_SENT: &str = "order_count.sent";
    pub const ORDER_COUNT_ACKED: &str = "order_count.acked";
    pub const RENDEZVOUS_COMPLETED: &str = "rendezvous.completed";
    pub const RENDEZVOUS_FAILED: &str = "rendezvous.failed";
    pub const REPORT_RECEIVED: &str = "report.received";
    pub const REPORT_DISCARDED: &str = "report.discarded";
    pub const WORKER_AVAILABLE: &str = "worker.available";
    pub const WORKER_REALLOCATED: &str = "worker.reallocated";
    pub const REALLOCATION_FAILED: &str = "reallocation.failed";
    pub const NO_DONOR_FOUND: &str = "reallocation.no_donor";
    pub const PROVINCE_COMPLETED: &str = "province.completed";
    pub const IMPLICIT_COMPLETION: &str = "province.implicit_completion";
    pub const IDLE_SWEEP: &str = "monitor.idle_sweep";
    pub const STATUS_SNAPSHOT: &str = "monitor.status";
    pub const ITERATION_CAP_REACHED: &str = "monitor.iteration_cap";
    pub const TERMINATION_BROADCAST: &str = "termination.broadcast";
    pub const TRANSPORT_FAILED: &str = "transport.failed";
}

/// ProvinceLeader Actor Events
pub mod leader {
    pub const LEADER_STARTED: &str = "leader.started";
    pub const ORDER_COUNT_RECEIVED: &str = "order_count.received";
    pub const ORDER_DISPATCHED: &str = "order.dispatched";
    pub const ORDER_COMPLETED: &str = "order.completed";
    pub const ORDER_DECLINED: &str = "order.declined";
    pub const STALE_COMPLETION: &str = "order.stale_completion";
    pub const WORKER_INCOMING: &str = "worker.incoming";
    pub const WORKER_DEPARTED: &str = "worker.departed";
    pub const WORKER_RETURNED: &str = "worker.returned";
    pub const SHORTAGE_REPORTED: &str = "shortage.reported";
    pub const STATUS_REPORTED: &str = "status.reported";
    pub const PROVINCE_FINISHED: &str = "province.finished";
    pub const LATE_WORKER_RETURNED: &str = "worker.late_returned";
    pub const TERMINATED: &str = "leader.terminated";
    pub const TRANSPORT_FAILED: &str = "transport.failed";
}

/// Worker Actor Events
pub mod worker {
    pub const WORKER_STARTED: &str = "worker.started";
    pub const TASK_RECEIVED: &str = "task.received";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_DECLINED: &str = "task.declined";
    pub const REALLOCATED: &str = "worker.reallocated";
    pub const RETURNED_HOME: &str = "worker.returned_home";
    pub const HOME_CLOSED: &str = "worker.home_closed";
    pub const TERMINATED: &str = "worker.terminated";
    pub const TRANSPORT_FAILED: &str = "transport.failed";
}
