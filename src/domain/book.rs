//! Coordinator bookkeeping
//!
//! The coordinator's eventually-consistent view of every province: the
//! advisory pool of idle home workers, completion state, and the loans it has
//! handed out. Owned by the coordinator actor alone; mutated only from its
//! poll loop.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::domain::{
    error::DispatchError,
    protocol::{ProvinceReport, ReallocationCommand, ReportKind},
    topology::{Rank, Topology}
};

/// How a province came to be marked complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionPath {
    /// The leader reported all orders completed
    Reported,
    /// Last status update showed nothing left unfinished
    StatusSweep,
    /// Idle pool covered every home worker
    Heuristic,
    /// Iteration cap reached
    Forced
}

/// One custody transfer decided by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reallocation {
    pub worker:          Rank,
    pub source_province: usize,
    pub target_province: usize,
    pub target_leader:   Rank
}

impl Reallocation {
    pub fn command(&self) -> ReallocationCommand {
        ReallocationCommand {
            target_province: self.target_province,
            target_leader:   self.target_leader,
            source_province: self.source_province
        }
    }
}

/// What applying a report did to the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportEffect {
    Available { province: usize, worker: Rank, pooled: bool },
    Reallocate(Reallocation),
    NoDonor { province: usize },
    Completed { province: usize, newly: bool },
    Status { province: usize }
}

#[derive(Debug, Clone)]
struct ProvinceView {
    index:       usize,
    leader:      Rank,
    home:        Vec<Rank>,
    idle:        VecDeque<Rank>,
    completion:  Option<CompletionPath>,
    last_status: Option<(u32, u32)>
}

/// Per-province line of a status snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvinceSnapshot {
    pub index:      usize,
    pub idle:       usize,
    pub complete:   bool,
    pub unfinished: Option<u32>
}

#[derive(Debug)]
pub struct CoordinatorBook {
    provinces:           Vec<ProvinceView>,
    completed:           usize,
    loans:               HashMap<Rank, usize>,
    implicit_completion: bool
}

impl CoordinatorBook {
    /// Every home worker starts out in its province's advisory pool
    pub fn new(topology: &Topology, implicit_completion: bool) -> Self {
        let provinces = topology
            .provinces()
            .iter()
            .map(|layout| ProvinceView {
                index:       layout.index,
                leader:      layout.leader,
                home:        layout.workers.clone(),
                idle:        layout.workers.iter().copied().collect(),
                completion:  None,
                last_status: None
            })
            .collect();

        Self { provinces, completed: 0, loans: HashMap::new(), implicit_completion }
    }

    pub fn province_count(&self) -> usize {
        self.provinces.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed
    }

    pub fn all_complete(&self) -> bool {
        self.completed == self.provinces.len()
    }

    pub fn is_complete(&self, province: usize) -> bool {
        self.provinces.get(province).is_some_and(|view| view.completion.is_some())
    }

    pub fn completion_path(&self, province: usize) -> Option<CompletionPath> {
        self.provinces.get(province).and_then(|view| view.completion)
    }

    pub fn idle_pool(&self, province: usize) -> Vec<Rank> {
        self.provinces.get(province).map(|view| view.idle.iter().copied().collect()).unwrap_or_default()
    }

    pub fn loan_of(&self, worker: Rank) -> Option<usize> {
        self.loans.get(&worker).copied()
    }

    pub fn snapshot(&self) -> Vec<ProvinceSnapshot> {
        self.provinces
            .iter()
            .map(|view| ProvinceSnapshot {
                index:      view.index,
                idle:       view.idle.len(),
                complete:   view.completion.is_some(),
                unfinished: view.last_status.map(|(unfinished, _)| unfinished)
            })
            .collect()
    }

    fn province_of_leader(&self, leader: Rank) -> Option<usize> {
        self.provinces.iter().position(|view| view.leader == leader)
    }

    /// Fold one province report into the book
    pub fn apply(&mut self, report: &ProvinceReport) -> Result<ReportEffect, DispatchError> {
        let province = self
            .province_of_leader(report.leader)
            .ok_or_else(|| DispatchError::Protocol(format!("report from unknown leader {}", report.leader)))?;

        match report.kind {
            ReportKind::WorkerAvailable => {
                let worker = report.worker.ok_or_else(|| {
                    DispatchError::Protocol(format!("availability report from leader {} names no worker", report.leader))
                })?;
                let pooled = self.mark_available(province, worker)?;
                Ok(ReportEffect::Available { province, worker, pooled })
            }
            ReportKind::NeedMoreDistributors => match self.find_donor(province) {
                Some(reallocation) => Ok(ReportEffect::Reallocate(reallocation)),
                None => Ok(ReportEffect::NoDonor { province })
            },
            ReportKind::AllOrdersCompleted => {
                let newly = self.mark_complete(province, CompletionPath::Reported);
                Ok(ReportEffect::Completed { province, newly })
            }
            ReportKind::StatusUpdate => {
                let view = &mut self.provinces[province];
                view.last_status = Some((report.remaining.unwrap_or(u32::MAX), report.active.unwrap_or(0)));
                Ok(ReportEffect::Status { province })
            }
        }
    }

    /// Put a home worker back in its advisory pool; loaned workers stay out until their loan ends
    fn mark_available(&mut self, province: usize, worker: Rank) -> Result<bool, DispatchError> {
        let view = &mut self.provinces[province];
        if !view.home.contains(&worker) {
            return Err(DispatchError::Protocol(format!(
                "worker {} reported available by province {} it does not belong to",
                worker, province
            )));
        }

        if self.loans.contains_key(&worker) || view.idle.contains(&worker) {
            return Ok(false);
        }

        view.idle.push_back(worker);
        Ok(true)
    }

    /// First-fit donor search: lowest-index other province with a non-empty pool
    ///
    /// Complete provinces still donate their parked workers; only a complete
    /// target is refused. The chosen worker leaves the pool before anyone is
    /// notified, so a second shortage can never be handed the same worker.
    pub fn find_donor(&mut self, needy: usize) -> Option<Reallocation> {
        let target = self.provinces.get(needy)?;
        if target.completion.is_some() {
            return None;
        }
        let target_leader = target.leader;

        let donor = self
            .provinces
            .iter_mut()
            .filter(|view| view.index != needy)
            .find(|view| !view.idle.is_empty())?;
        let worker = donor.idle.pop_front()?;
        let source_province = donor.index;

        self.loans.insert(worker, needy);
        Some(Reallocation { worker, source_province, target_province: needy, target_leader })
    }

    /// Undo a reallocation whose command could not be delivered
    pub fn restore(&mut self, reallocation: &Reallocation) {
        self.loans.remove(&reallocation.worker);
        if let Some(view) = self.provinces.get_mut(reallocation.source_province)
            && !view.idle.contains(&reallocation.worker)
        {
            view.idle.push_front(reallocation.worker);
        }
    }

    /// Idempotent; ends every loan into the province since its leader returns them
    pub fn mark_complete(&mut self, province: usize, path: CompletionPath) -> bool {
        let Some(view) = self.provinces.get_mut(province) else {
            return false;
        };
        if view.completion.is_some() {
            return false;
        }

        view.completion = Some(path);
        self.completed += 1;
        self.loans.retain(|_, target| *target != province);
        true
    }

    /// Mark provinces complete without an explicit report
    ///
    /// A province whose last status update had nothing unfinished is complete.
    /// With implicit completion enabled, so is one whose advisory pool holds
    /// at least as many workers as it owns, even if nothing was ever dispatched.
    pub fn sweep(&mut self) -> Vec<(usize, CompletionPath)> {
        let candidates: Vec<(usize, CompletionPath)> = self
            .provinces
            .iter()
            .filter(|view| view.completion.is_none())
            .filter_map(|view| {
                if matches!(view.last_status, Some((0, _))) {
                    Some((view.index, CompletionPath::StatusSweep))
                } else if self.implicit_completion && view.idle.len() >= view.home.len() {
                    Some((view.index, CompletionPath::Heuristic))
                } else {
                    None
                }
            })
            .collect();

        candidates.into_iter().filter(|(province, path)| self.mark_complete(*province, *path)).collect()
    }

    /// Force every incomplete province to complete
    pub fn force_remaining(&mut self) -> Vec<usize> {
        let pending: Vec<usize> =
            self.provinces.iter().filter(|view| view.completion.is_none()).map(|view| view.index).collect();
        pending.into_iter().filter(|province| self.mark_complete(*province, CompletionPath::Forced)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn book(workers: &[usize], implicit: bool) -> (Topology, CoordinatorBook) {
        let topology = Topology::from_counts(workers);
        let book = CoordinatorBook::new(&topology, implicit);
        (topology, book)
    }

    #[test]
    fn test_duplicate_completion_is_counted_once() {
        let (_, mut book) = book(&[1, 1], false);

        let first = book.apply(&ProvinceReport::completed(1)).unwrap();
        let second = book.apply(&ProvinceReport::completed(1)).unwrap();

        assert_eq!(first, ReportEffect::Completed { province: 0, newly: true });
        assert_eq!(second, ReportEffect::Completed { province: 0, newly: false });
        assert_eq!(book.completed_count(), 1);
        assert!(!book.all_complete());
    }

    #[test]
    fn test_unknown_leader_is_a_protocol_violation() {
        let (_, mut book) = book(&[1], false);

        let err = book.apply(&ProvinceReport::completed(42)).unwrap_err();
        assert!(matches!(err, DispatchError::Protocol(_)));
        assert_eq!(book.completed_count(), 0);

        let foreign = book.apply(&ProvinceReport::worker_available(1, 99)).unwrap_err();
        assert!(matches!(foreign, DispatchError::Protocol(_)));
    }

    #[test]
    fn test_first_fit_donor_search() {
        // Province 0: leader 1, workers 2; province 1: leader 3, workers 4, 5; province 2: leader 6, workers 7
        let (_, mut book) = book(&[1, 2, 1], false);

        let effect = book.apply(&ProvinceReport::need_more(6, 5, 1)).unwrap();
        assert_eq!(
            effect,
            ReportEffect::Reallocate(Reallocation {
                worker:          2,
                source_province: 0,
                target_province: 2,
                target_leader:   6
            })
        );

        // Province 0 is drained, so the next donor is province 1 in FIFO order.
        let effect = book.apply(&ProvinceReport::need_more(6, 4, 2)).unwrap();
        assert!(matches!(effect, ReportEffect::Reallocate(Reallocation { worker: 4, source_province: 1, .. })));
        assert_eq!(book.idle_pool(1), vec![5]);
        assert_eq!(book.loan_of(4), Some(2));
    }

    #[test]
    fn test_complete_provinces_donate_but_never_receive() {
        let (_, mut book) = book(&[1, 2], false);
        book.apply(&ProvinceReport::completed(3)).unwrap();

        // Both parked workers of the finished province are offered in turn.
        let first = book.apply(&ProvinceReport::need_more(1, 4, 1)).unwrap();
        assert!(matches!(first, ReportEffect::Reallocate(Reallocation { worker: 4, source_province: 1, .. })));
        let second = book.apply(&ProvinceReport::need_more(1, 3, 2)).unwrap();
        assert!(matches!(second, ReportEffect::Reallocate(Reallocation { worker: 5, source_province: 1, .. })));
        assert_eq!(book.apply(&ProvinceReport::need_more(1, 2, 3)).unwrap(), ReportEffect::NoDonor { province: 0 });

        assert_eq!(book.apply(&ProvinceReport::need_more(3, 9, 0)).unwrap(), ReportEffect::NoDonor { province: 1 });
        book.apply(&ProvinceReport::completed(1)).unwrap();
        assert_eq!(book.find_donor(0), None);
    }

    #[test]
    fn test_loaned_worker_is_not_pooled_until_loan_ends() {
        let (_, mut book) = book(&[1, 1], false);

        let Some(reallocation) = book.find_donor(0) else { panic!("province 1 should donate") };
        assert_eq!(reallocation.worker, 4);

        let stale = book.apply(&ProvinceReport::worker_available(3, 4)).unwrap();
        assert_eq!(stale, ReportEffect::Available { province: 1, worker: 4, pooled: false });
        assert!(book.idle_pool(1).is_empty());

        book.apply(&ProvinceReport::completed(1)).unwrap();
        assert_eq!(book.loan_of(4), None);
        let back = book.apply(&ProvinceReport::worker_available(3, 4)).unwrap();
        assert_eq!(back, ReportEffect::Available { province: 1, worker: 4, pooled: true });
    }

    #[test]
    fn test_restore_returns_worker_to_front_of_pool() {
        let (_, mut book) = book(&[1, 2], false);
        let reallocation = book.find_donor(0).unwrap();

        book.restore(&reallocation);
        assert_eq!(book.idle_pool(1), vec![4, 5]);
        assert_eq!(book.loan_of(4), None);
    }

    #[test]
    fn test_sweep_uses_status_updates() {
        let (_, mut book) = book(&[1, 1], false);

        assert!(book.sweep().is_empty());
        book.apply(&ProvinceReport::status(1, 0, 0)).unwrap();
        book.apply(&ProvinceReport::status(3, 2, 1)).unwrap();

        assert_eq!(book.sweep(), vec![(0, CompletionPath::StatusSweep)]);
        assert!(book.sweep().is_empty());
        assert_eq!(book.completed_count(), 1);
    }

    #[test]
    fn test_implicit_completion_fires_before_any_work() {
        let (_, mut book) = book(&[2, 1], true);

        let swept = book.sweep();
        assert_eq!(swept, vec![(0, CompletionPath::Heuristic), (1, CompletionPath::Heuristic)]);
        assert!(book.all_complete());
    }

    #[test]
    fn test_force_remaining_marks_only_incomplete() {
        let (_, mut book) = book(&[1, 1, 1], false);
        book.apply(&ProvinceReport::completed(3)).unwrap();

        assert_eq!(book.force_remaining(), vec![0, 2]);
        assert_eq!(book.completion_path(1), Some(CompletionPath::Reported));
        assert_eq!(book.completion_path(2), Some(CompletionPath::Forced));
        assert!(book.all_complete());
    }

    /// Interleaves shortages, stale availability reports and completions, and
    /// checks that no worker is ever lent twice while a loan is open.
    #[test]
    fn test_randomized_reports_never_double_dispatch() {
        for seed in 0..64u64 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let counts: Vec<usize> = (0..rng.gen_range(2..6)).map(|_| rng.gen_range(0..4)).collect();
            let (topology, mut book) = book(&counts, false);

            let mut open_loans: HashMap<Rank, usize> = HashMap::new();

            for _ in 0..200 {
                let province = rng.gen_range(0..topology.province_count());
                let layout = topology.province(province).unwrap();

                let report = match rng.gen_range(0..10) {
                    0..=4 => ProvinceReport::need_more(layout.leader, rng.gen_range(1..20), 0),
                    5..=8 if !layout.workers.is_empty() => {
                        let worker = layout.workers[rng.gen_range(0..layout.workers.len())];
                        ProvinceReport::worker_available(layout.leader, worker)
                    }
                    _ => ProvinceReport::completed(layout.leader)
                };

                match book.apply(&report).unwrap() {
                    ReportEffect::Reallocate(reallocation) => {
                        assert!(
                            !open_loans.contains_key(&reallocation.worker),
                            "seed {}: worker {} lent twice",
                            seed,
                            reallocation.worker
                        );
                        assert_ne!(reallocation.source_province, reallocation.target_province);
                        assert!(!book.is_complete(reallocation.target_province));
                        open_loans.insert(reallocation.worker, reallocation.target_province);
                    }
                    ReportEffect::Completed { province, newly: true } => {
                        open_loans.retain(|_, target| *target != province);
                    }
                    _ => {}
                }

                let mut seen = HashSet::new();
                for index in 0..topology.province_count() {
                    for worker in book.idle_pool(index) {
                        assert!(seen.insert(worker), "seed {}: worker {} pooled twice", seed, worker);
                        assert!(!open_loans.contains_key(&worker), "seed {}: lent worker {} pooled", seed, worker);
                    }
                }
            }
        }
    }
}
