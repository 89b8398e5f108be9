//! Run state and outcome types
//!
//! Worker lifecycle phases plus the summaries each actor publishes when it
//! stops. The guardian folds them into a [`RunReport`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use uuid::Uuid;

use crate::domain::{
    book::{CompletionPath, Reallocation},
    protocol::OrderId,
    topology::Rank
};

/// Lifecycle of a worker process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerPhase {
    Idle,
    Busy,
    Terminated
}

/// One order executed by a worker, tagged with the leader that issued it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedOrder {
    pub leader: Rank,
    pub order:  OrderId
}

/// Published by a worker when it stops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub rank:            Rank,
    pub home_province:   usize,
    pub processed:       Vec<ProcessedOrder>,
    pub loans:           u32,
    pub final_phase:     WorkerPhase,
    pub on_loan_at_exit: bool
}

/// Published by a leader when it stops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderOutcome {
    pub province:         usize,
    pub leader:           Rank,
    pub total_orders:     u32,
    pub completed_orders: Vec<OrderId>,
    pub loans_taken:      u32,
    /// True when the leader finished its backlog rather than being told to stop
    pub finished:         bool
}

/// Published by the coordinator when it stops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorOutcome {
    pub iterations:    u64,
    pub forced:        bool,
    pub completions:   Vec<Option<CompletionPath>>,
    pub reallocations: Vec<Reallocation>,
    pub reports_seen:  u64,
    pub terminations:  usize
}

/// Province line of the run report
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
pub struct ProvinceSummary {
    #[tabled(rename = "Province")]
    pub index:              usize,
    #[tabled(rename = "Leader")]
    pub leader:             Rank,
    #[tabled(rename = "Orders")]
    pub total_orders:       u32,
    #[tabled(rename = "Completed")]
    pub completed_orders:   u32,
    #[tabled(rename = "Loans In")]
    pub loans_taken:        u32,
    #[tabled(skip)]
    pub completed_ids:      Vec<OrderId>,
    /// Completion path (raw for serialization)
    #[tabled(skip)]
    pub completion:         Option<CompletionPath>,
    /// Completion path (formatted for display)
    #[serde(skip)]
    #[tabled(rename = "Completion")]
    pub completion_display: String
}

impl ProvinceSummary {
    pub fn new(leader: &LeaderOutcome, completion: Option<CompletionPath>) -> Self {
        let completion_display = completion.map(|path| format!("{:?}", path)).unwrap_or_else(|| "-".to_string());
        Self {
            index: leader.province,
            leader: leader.leader,
            total_orders: leader.total_orders,
            completed_orders: leader.completed_orders.len() as u32,
            loans_taken: leader.loans_taken,
            completed_ids: leader.completed_orders.clone(),
            completion,
            completion_display
        }
    }
}

/// Worker line of the run report
#[derive(Debug, Clone, Serialize, Deserialize, Tabled)]
pub struct WorkerSummary {
    #[tabled(rename = "Worker")]
    pub rank:            Rank,
    #[tabled(rename = "Home")]
    pub home_province:   usize,
    #[tabled(rename = "Orders")]
    pub processed_count: usize,
    #[tabled(rename = "For Other Provinces")]
    pub foreign_count:   usize,
    #[tabled(rename = "Loans")]
    pub loans:           u32,
    #[tabled(skip)]
    pub processed:       Vec<ProcessedOrder>
}

impl WorkerSummary {
    pub fn new(outcome: &WorkerOutcome, home_leader: Rank) -> Self {
        Self {
            rank:            outcome.rank,
            home_province:   outcome.home_province,
            processed_count: outcome.processed.len(),
            foreign_count:   outcome.processed.iter().filter(|p| p.leader != home_leader).count(),
            loans:           outcome.loans,
            processed:       outcome.processed.clone()
        }
    }
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id:        Uuid,
    pub started_at:    DateTime<Utc>,
    pub finished_at:   DateTime<Utc>,
    pub iterations:    u64,
    /// Some province only completed because the iteration cap was hit
    pub forced:        bool,
    pub provinces:     Vec<ProvinceSummary>,
    pub reallocations: Vec<Reallocation>,
    pub workers:       Vec<WorkerSummary>
}

impl RunReport {
    pub fn total_completed(&self) -> u32 {
        self.provinces.iter().map(|p| p.completed_orders).sum()
    }

    pub fn province(&self, index: usize) -> Option<&ProvinceSummary> {
        self.provinces.iter().find(|p| p.index == index)
    }

    pub fn worker(&self, rank: Rank) -> Option<&WorkerSummary> {
        self.workers.iter().find(|w| w.rank == rank)
    }
}
