//! Wire-level protocol
//!
//! Topics and payloads exchanged over the transport. Addressing is
//! `{source, destination, channel, topic}`; the topic of a message is derived
//! from its payload variant so a payload can never travel on the wrong topic.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::domain::topology::Rank;

/// Identity of an order, unique within its province (`1..=total`)
pub type OrderId = u32;

/// Logical channel a message is addressed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Global addressing space, ranks are global
    World,
    /// Province-local group, ranks are local to the province
    Province(usize)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    OrderCount,
    OrderCountAck,
    TaskAssign,
    TaskComplete,
    ProvinceReport,
    Reallocate,
    IncomingWorker,
    Terminate,
    Custody
}

impl Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::OrderCount => "order-count",
            Topic::OrderCountAck => "order-count-ack",
            Topic::TaskAssign => "task-assign",
            Topic::TaskComplete => "task-complete",
            Topic::ProvinceReport => "province-report",
            Topic::Reallocate => "reallocate",
            Topic::IncomingWorker => "incoming-worker",
            Topic::Terminate => "terminate",
            Topic::Custody => "custody"
        };
        write!(f, "{}", name)
    }
}

/// Source filter for a non-blocking probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Any,
    Rank(Rank)
}

impl Source {
    pub fn matches(&self, rank: Rank) -> bool {
        match self {
            Source::Any => true,
            Source::Rank(expected) => *expected == rank
        }
    }
}

/// Work handed from a leader to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assignment {
    Order(OrderId),
    /// Sentinel telling a home worker there is no more work
    Stop
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportKind {
    WorkerAvailable,
    NeedMoreDistributors,
    AllOrdersCompleted,
    StatusUpdate
}

/// Upward signal from a leader to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvinceReport {
    pub leader:    Rank,
    pub kind:      ReportKind,
    pub worker:    Option<Rank>,
    /// Unassigned orders for shortages, unfinished orders for status updates
    pub remaining: Option<u32>,
    pub active:    Option<u32>
}

impl ProvinceReport {
    pub fn worker_available(leader: Rank, worker: Rank) -> Self {
        Self { leader, kind: ReportKind::WorkerAvailable, worker: Some(worker), remaining: None, active: None }
    }

    pub fn need_more(leader: Rank, remaining: u32, active: u32) -> Self {
        Self {
            leader,
            kind: ReportKind::NeedMoreDistributors,
            worker: None,
            remaining: Some(remaining),
            active: Some(active)
        }
    }

    pub fn completed(leader: Rank) -> Self {
        Self {
            leader,
            kind: ReportKind::AllOrdersCompleted,
            worker: None,
            remaining: Some(0),
            active: Some(0)
        }
    }

    pub fn status(leader: Rank, unfinished: u32, active: u32) -> Self {
        Self {
            leader,
            kind: ReportKind::StatusUpdate,
            worker: None,
            remaining: Some(unfinished),
            active: Some(active)
        }
    }
}

/// Custody transfer sent by the coordinator to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReallocationCommand {
    pub target_province: usize,
    pub target_leader:   Rank,
    pub source_province: usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Leave the run
    Shutdown,
    /// Give a loaned worker back to its home leader
    Return
}

/// Worker-to-leader notices about custody changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustodyNotice {
    /// The worker was reallocated away from this leader
    Departed,
    /// A loaned worker is back under its home leader
    Returned,
    /// A queued task the worker will not execute
    Declined(OrderId)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    OrderCount(u32),
    OrderCountAck(u32),
    Task(Assignment),
    TaskComplete(OrderId),
    Report(ProvinceReport),
    Reallocate(ReallocationCommand),
    IncomingWorker(Rank),
    Terminate(Termination),
    Custody(CustodyNotice)
}

impl Payload {
    pub fn topic(&self) -> Topic {
        match self {
            Payload::OrderCount(_) => Topic::OrderCount,
            Payload::OrderCountAck(_) => Topic::OrderCountAck,
            Payload::Task(_) => Topic::TaskAssign,
            Payload::TaskComplete(_) => Topic::TaskComplete,
            Payload::Report(_) => Topic::ProvinceReport,
            Payload::Reallocate(_) => Topic::Reallocate,
            Payload::IncomingWorker(_) => Topic::IncomingWorker,
            Payload::Terminate(_) => Topic::Terminate,
            Payload::Custody(_) => Topic::Custody
        }
    }
}

/// A delivered message; `source` is expressed in the receiving channel's rank space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub source:  Rank,
    pub channel: Channel,
    pub payload: Payload
}

impl Envelope {
    pub fn topic(&self) -> Topic {
        self.payload.topic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_topics() {
        assert_eq!(Payload::Task(Assignment::Stop).topic(), Topic::TaskAssign);
        assert_eq!(Payload::Terminate(Termination::Return).topic(), Topic::Terminate);
        assert_eq!(Payload::Custody(CustodyNotice::Declined(3)).topic(), Topic::Custody);
        assert_eq!(Payload::Report(ProvinceReport::completed(1)).topic(), Topic::ProvinceReport);
    }

    #[test]
    fn test_report_serializes_for_the_wire() {
        let report = ProvinceReport::need_more(4, 7, 2);
        let json = serde_json::to_string(&Payload::Report(report.clone())).unwrap();
        let decoded: Payload = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, Payload::Report(report));
        assert_eq!(Topic::ProvinceReport.to_string(), "province-report");
    }

    #[test]
    fn test_source_filter() {
        assert!(Source::Any.matches(9));
        assert!(Source::Rank(3).matches(3));
        assert!(!Source::Rank(3).matches(4));
    }
}
