//! Province backlog bookkeeping
//!
//! The authoritative, leader-owned view of one province: which orders are
//! unassigned, in flight or completed, and which workers (home or loaned-in)
//! are idle. The leader actor drives it from transport events; everything here
//! is synchronous and free of I/O.
//!
//! Invariant: a worker is in the idle queue exactly when its slot is `Idle`.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use crate::domain::{protocol::OrderId, topology::Rank};

/// How a worker came to be under this leader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Home worker, addressed on the province channel
    Home { local_rank: usize },
    /// Borrowed from another province, addressed on the world channel
    LoanedIn
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Idle,
    Busy(OrderId),
    /// Home worker currently serving another province
    LoanedOut
}

#[derive(Debug, Clone, Copy)]
struct WorkerSlot {
    origin: Origin,
    status: SlotStatus
}

/// One order handed to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub worker: Rank,
    pub origin: Origin,
    pub order:  OrderId
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// First confirmation for this order id
    pub accepted: bool,
    /// Set when the worker went back to the idle queue
    pub released: Option<Origin>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub origin:   Origin,
    /// Order dispatched to the worker that it will never see
    pub stranded: Option<OrderId>
}

/// Workers to notify when the province finishes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Release {
    /// Home workers still under this leader: `(global rank, local rank)`
    pub stop_home:      Vec<(Rank, usize)>,
    /// Loaned-in workers to hand back to their home leaders
    pub return_loaned:  Vec<Rank>,
    /// Home workers serving elsewhere, left to their borrowers
    pub still_on_loan:  Vec<Rank>
}

#[derive(Debug)]
pub struct ProvinceBacklog {
    total:         u32,
    next_order:    OrderId,
    requeued:      VecDeque<OrderId>,
    outstanding:   HashMap<OrderId, Rank>,
    completed:     BTreeSet<OrderId>,
    idle:          VecDeque<Rank>,
    slots:         BTreeMap<Rank, WorkerSlot>,
    last_shortage: Option<u32>,
    loans_taken:   u32
}

impl ProvinceBacklog {
    /// Seed the backlog with `total` orders and the province's home workers
    pub fn new(total: u32, home_workers: impl IntoIterator<Item = (Rank, usize)>) -> Self {
        let mut idle = VecDeque::new();
        let mut slots = BTreeMap::new();
        for (worker, local_rank) in home_workers {
            slots.insert(worker, WorkerSlot { origin: Origin::Home { local_rank }, status: SlotStatus::Idle });
            idle.push_back(worker);
        }

        Self {
            total,
            next_order: 1,
            requeued: VecDeque::new(),
            outstanding: HashMap::new(),
            completed: BTreeSet::new(),
            idle,
            slots,
            last_shortage: None,
            loans_taken: 0
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Orders not yet handed to any worker
    pub fn pending(&self) -> u32 {
        self.requeued.len() as u32 + self.total.saturating_add(1).saturating_sub(self.next_order)
    }

    pub fn finished(&self) -> u32 {
        self.completed.len() as u32
    }

    pub fn unfinished(&self) -> u32 {
        self.total - self.finished()
    }

    pub fn is_complete(&self) -> bool {
        self.finished() == self.total
    }

    pub fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub fn is_idle(&self, worker: Rank) -> bool {
        self.idle.contains(&worker)
    }

    /// Workers currently executing an order for this province
    pub fn active(&self) -> u32 {
        self.slots.values().filter(|slot| matches!(slot.status, SlotStatus::Busy(_))).count() as u32
    }

    pub fn loans_taken(&self) -> u32 {
        self.loans_taken
    }

    pub fn completed_orders(&self) -> impl Iterator<Item = OrderId> + '_ {
        self.completed.iter().copied()
    }

    pub fn status_of(&self, worker: Rank) -> Option<SlotStatus> {
        self.slots.get(&worker).map(|slot| slot.status)
    }

    /// Take in a worker lent by the coordinator; false if it is already known here
    pub fn admit_loaned(&mut self, worker: Rank) -> bool {
        if self.slots.contains_key(&worker) {
            return false;
        }

        self.slots.insert(worker, WorkerSlot { origin: Origin::LoanedIn, status: SlotStatus::Idle });
        self.idle.push_back(worker);
        self.loans_taken += 1;
        true
    }

    /// Pair the next idle worker with the next unassigned order
    pub fn next_dispatch(&mut self) -> Option<Dispatch> {
        if self.idle.is_empty() || self.pending() == 0 {
            return None;
        }

        let worker = self.idle.pop_front()?;
        let slot = self.slots.get_mut(&worker)?;

        let order = match self.requeued.pop_front() {
            Some(order) => order,
            None => {
                let order = self.next_order;
                self.next_order += 1;
                order
            }
        };
        slot.status = SlotStatus::Busy(order);
        self.outstanding.insert(order, worker);

        Some(Dispatch { worker, origin: slot.origin, order })
    }

    /// Roll back a dispatch whose send failed
    pub fn undo_dispatch(&mut self, dispatch: Dispatch) {
        self.outstanding.remove(&dispatch.order);
        self.requeued.push_front(dispatch.order);
        if let Some(slot) = self.slots.get_mut(&dispatch.worker) {
            slot.status = SlotStatus::Idle;
            self.idle.push_front(dispatch.worker);
        }
    }

    /// Record a completion report from `worker` for `order`
    pub fn complete(&mut self, worker: Rank, order: OrderId) -> Completion {
        if order == 0 || order > self.total {
            return Completion { accepted: false, released: None };
        }

        let accepted = self.completed.insert(order);
        if accepted {
            self.outstanding.remove(&order);
            self.requeued.retain(|queued| *queued != order);
        }

        let released = match self.slots.get_mut(&worker) {
            Some(slot) if slot.status == SlotStatus::Busy(order) => {
                slot.status = SlotStatus::Idle;
                self.idle.push_back(worker);
                Some(slot.origin)
            }
            _ => None
        };

        Completion { accepted, released }
    }

    /// A worker refused a queued task; requeue it if it was still owed by that worker
    pub fn decline(&mut self, worker: Rank, order: OrderId) -> bool {
        if self.completed.contains(&order) || self.outstanding.get(&order) != Some(&worker) {
            return false;
        }

        self.outstanding.remove(&order);
        self.requeued.push_front(order);
        true
    }

    /// The worker was reallocated away from this leader
    pub fn depart(&mut self, worker: Rank) -> Option<Departure> {
        let slot = *self.slots.get(&worker)?;

        let stranded = match slot.status {
            SlotStatus::Idle => {
                self.idle.retain(|queued| *queued != worker);
                None
            }
            SlotStatus::Busy(order) if self.outstanding.get(&order) == Some(&worker) => {
                self.outstanding.remove(&order);
                self.requeued.push_front(order);
                Some(order)
            }
            SlotStatus::Busy(_) | SlotStatus::LoanedOut => None
        };

        match slot.origin {
            Origin::Home { .. } => {
                if let Some(slot) = self.slots.get_mut(&worker) {
                    slot.status = SlotStatus::LoanedOut;
                }
            }
            Origin::LoanedIn => {
                self.slots.remove(&worker);
            }
        }

        Some(Departure { origin: slot.origin, stranded })
    }

    /// A loaned-out home worker is back; true if it rejoined the idle queue
    pub fn welcome_home(&mut self, worker: Rank) -> bool {
        match self.slots.get_mut(&worker) {
            Some(slot) if matches!(slot.origin, Origin::Home { .. }) && slot.status == SlotStatus::LoanedOut => {
                slot.status = SlotStatus::Idle;
                self.idle.push_back(worker);
                true
            }
            _ => false
        }
    }

    /// Unassigned orders to report when starved, de-duplicated against the last report
    pub fn shortage(&mut self, threshold: u32) -> Option<u32> {
        let pending = self.pending();
        if pending > threshold && self.idle.is_empty() {
            if self.last_shortage == Some(pending) {
                return None;
            }
            self.last_shortage = Some(pending);
            return Some(pending);
        }

        self.last_shortage = None;
        None
    }

    /// Split the roster for shutdown and empty the idle queue
    pub fn release_all(&mut self) -> Release {
        let mut release = Release::default();
        for (worker, slot) in &self.slots {
            match (slot.origin, slot.status) {
                (Origin::Home { .. }, SlotStatus::LoanedOut) => release.still_on_loan.push(*worker),
                (Origin::Home { local_rank }, _) => release.stop_home.push((*worker, local_rank)),
                (Origin::LoanedIn, _) => release.return_loaned.push(*worker)
            }
        }
        self.idle.clear();
        release
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backlog(total: u32, workers: &[Rank]) -> ProvinceBacklog {
        ProvinceBacklog::new(total, workers.iter().enumerate().map(|(pos, w)| (*w, pos + 1)))
    }

    #[test]
    fn test_single_worker_processes_orders_in_sequence() {
        let mut backlog = backlog(3, &[2]);

        for expected in 1..=3 {
            let dispatch = backlog.next_dispatch().expect("worker should be idle");
            assert_eq!(dispatch, Dispatch { worker: 2, origin: Origin::Home { local_rank: 1 }, order: expected });
            assert!(backlog.next_dispatch().is_none());

            let completion = backlog.complete(2, expected);
            assert!(completion.accepted);
            assert_eq!(completion.released, Some(Origin::Home { local_rank: 1 }));
        }

        assert!(backlog.is_complete());
        assert_eq!(backlog.completed_orders().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_orders_is_complete_without_dispatch() {
        let mut backlog = backlog(0, &[2, 3]);

        assert!(backlog.is_complete());
        assert!(backlog.next_dispatch().is_none());
        assert_eq!(backlog.shortage(0), None);

        let release = backlog.release_all();
        assert_eq!(release.stop_home, vec![(2, 1), (3, 2)]);
        assert!(release.return_loaned.is_empty());
    }

    #[test]
    fn test_duplicate_completion_is_not_counted_twice() {
        let mut backlog = backlog(2, &[2]);
        let dispatch = backlog.next_dispatch().unwrap();

        assert!(backlog.complete(2, dispatch.order).accepted);
        let again = backlog.complete(2, dispatch.order);
        assert!(!again.accepted);
        assert_eq!(again.released, None);
        assert_eq!(backlog.finished(), 1);
        assert!(!backlog.complete(2, 99).accepted);
    }

    #[test]
    fn test_loaned_worker_is_dispatched_and_returned() {
        let mut backlog = backlog(4, &[2]);
        backlog.next_dispatch().unwrap();

        assert!(backlog.admit_loaned(7));
        assert!(!backlog.admit_loaned(7));
        let dispatch = backlog.next_dispatch().unwrap();
        assert_eq!(dispatch, Dispatch { worker: 7, origin: Origin::LoanedIn, order: 2 });

        let completion = backlog.complete(7, 2);
        assert_eq!(completion.released, Some(Origin::LoanedIn));
        assert_eq!(backlog.loans_taken(), 1);

        let release = backlog.release_all();
        assert_eq!(release.return_loaned, vec![7]);
        assert_eq!(release.stop_home, vec![(2, 1)]);
    }

    #[test]
    fn test_departure_requeues_stranded_order() {
        let mut backlog = backlog(3, &[2, 3]);
        let first = backlog.next_dispatch().unwrap();
        let second = backlog.next_dispatch().unwrap();
        assert_eq!((first.worker, second.worker), (2, 3));

        let departure = backlog.depart(3).unwrap();
        assert_eq!(departure.stranded, Some(second.order));
        assert_eq!(backlog.status_of(3), Some(SlotStatus::LoanedOut));
        assert_eq!(backlog.pending(), 2);

        // The stranded order goes out again before fresh ones.
        backlog.complete(2, first.order);
        let retry = backlog.next_dispatch().unwrap();
        assert_eq!(retry, Dispatch { worker: 2, origin: Origin::Home { local_rank: 1 }, order: second.order });

        let release = backlog.release_all();
        assert_eq!(release.still_on_loan, vec![3]);
        assert_eq!(release.stop_home, vec![(2, 1)]);
    }

    #[test]
    fn test_idle_departure_and_return() {
        let mut backlog = backlog(1, &[2, 3]);

        let departure = backlog.depart(3).unwrap();
        assert_eq!(departure.stranded, None);
        assert!(!backlog.is_idle(3));

        assert!(backlog.welcome_home(3));
        assert!(!backlog.welcome_home(3));
        assert!(backlog.is_idle(3));
    }

    #[test]
    fn test_declined_task_is_requeued_once() {
        let mut backlog = backlog(2, &[2]);
        let dispatch = backlog.next_dispatch().unwrap();

        assert!(backlog.decline(2, dispatch.order));
        assert!(!backlog.decline(2, dispatch.order));
        assert_eq!(backlog.pending(), 2);

        // Late completion of a declined order still counts, once.
        assert!(backlog.complete(2, dispatch.order).accepted);
        assert_eq!(backlog.pending(), 1);
    }

    #[test]
    fn test_shortage_is_deduplicated() {
        let mut backlog = backlog(10, &[2]);
        backlog.next_dispatch().unwrap();

        assert_eq!(backlog.shortage(2), Some(9));
        assert_eq!(backlog.shortage(2), None);

        backlog.complete(2, 1);
        backlog.next_dispatch().unwrap();
        assert_eq!(backlog.shortage(2), Some(8));
        assert_eq!(backlog.shortage(8), None);
    }

    #[test]
    fn test_undo_dispatch_restores_worker_and_order() {
        let mut backlog = backlog(2, &[2]);
        let dispatch = backlog.next_dispatch().unwrap();

        backlog.undo_dispatch(dispatch);
        assert!(backlog.is_idle(2));
        assert_eq!(backlog.pending(), 2);
        assert_eq!(backlog.next_dispatch().unwrap().order, dispatch.order);
    }

    #[test]
    fn test_idle_worker_without_slot_never_consumes_an_order() {
        let mut backlog = backlog(3, &[2, 3]);
        backlog.slots.remove(&2);

        assert_eq!(backlog.next_dispatch(), None);
        assert_eq!(backlog.pending(), 3);
        assert!(backlog.outstanding.is_empty());

        // The next consistent worker still gets the first order.
        let dispatch = backlog.next_dispatch().unwrap();
        assert_eq!(dispatch, Dispatch { worker: 3, origin: Origin::Home { local_rank: 2 }, order: 1 });
    }
}
