//! Rank partitioning
//!
//! Maps the flat participant identity space onto provinces. Rank 0 is the
//! coordinator; every province then occupies a consecutive block of ranks made
//! of its leader followed by its workers. The mapping is pure, so every
//! participant derives the same layout from the same worker counts.

use serde::{Deserialize, Serialize};

use crate::domain::error::DispatchError;

/// Global participant identity
pub type Rank = usize;

/// Rank of the global coordinator
pub const COORDINATOR_RANK: Rank = 0;

/// Local rank of a leader inside its province communicator
pub const LEADER_LOCAL_RANK: usize = 0;

/// Ranks belonging to one province
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvinceLayout {
    pub index:   usize,
    pub leader:  Rank,
    /// Home workers in ascending rank order; local rank is position + 1
    pub workers: Vec<Rank>
}

impl ProvinceLayout {
    /// All members in local-rank order (leader first)
    pub fn members(&self) -> Vec<Rank> {
        std::iter::once(self.leader).chain(self.workers.iter().copied()).collect()
    }

    /// Local rank of a home worker inside the province communicator
    pub fn local_rank_of(&self, worker: Rank) -> Option<usize> {
        self.workers.iter().position(|w| *w == worker).map(|pos| pos + 1)
    }

    pub fn contains_worker(&self, worker: Rank) -> bool {
        self.workers.contains(&worker)
    }
}

/// Role a rank plays in the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Leader { province: usize },
    Worker { province: usize, local_rank: usize },
    Unassigned
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    provinces: Vec<ProvinceLayout>
}

impl Topology {
    /// Build the layout from the number of workers in each province
    pub fn from_counts(workers_per_province: &[usize]) -> Self {
        let mut next = COORDINATOR_RANK + 1;
        let provinces = workers_per_province
            .iter()
            .enumerate()
            .map(|(index, &count)| {
                let leader = next;
                let workers = (leader + 1..=leader + count).collect();
                next += count + 1;
                ProvinceLayout { index, leader, workers }
            })
            .collect();

        Self { provinces }
    }

    pub fn provinces(&self) -> &[ProvinceLayout] {
        &self.provinces
    }

    pub fn province(&self, index: usize) -> Option<&ProvinceLayout> {
        self.provinces.get(index)
    }

    pub fn province_count(&self) -> usize {
        self.provinces.len()
    }

    /// Number of ranks the run needs, coordinator included
    pub fn world_size(&self) -> usize {
        1 + self.provinces.iter().map(|p| 1 + p.workers.len()).sum::<usize>()
    }

    pub fn leader_of(&self, province: usize) -> Option<Rank> {
        self.provinces.get(province).map(|p| p.leader)
    }

    pub fn province_of_leader(&self, leader: Rank) -> Option<usize> {
        self.provinces.iter().find(|p| p.leader == leader).map(|p| p.index)
    }

    pub fn role_of(&self, rank: Rank) -> Role {
        if rank == COORDINATOR_RANK {
            return Role::Coordinator;
        }

        for province in &self.provinces {
            if rank == province.leader {
                return Role::Leader { province: province.index };
            }
            if let Some(local_rank) = province.local_rank_of(rank) {
                return Role::Worker { province: province.index, local_rank };
            }
        }

        Role::Unassigned
    }

    /// Every leader and worker rank, i.e. everyone but the coordinator
    pub fn participants(&self) -> Vec<Rank> {
        self.provinces.iter().flat_map(|p| p.members()).collect()
    }

    /// Reject a world that cannot host every role
    pub fn check_world_size(&self, available: usize) -> Result<(), DispatchError> {
        let required = self.world_size();
        if available < required {
            return Err(DispatchError::Configuration(format!(
                "world of {} ranks is too small, layout needs {}",
                available, required
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_assigns_consecutive_blocks() {
        let topology = Topology::from_counts(&[2, 1, 3]);

        assert_eq!(topology.world_size(), 1 + 3 + 2 + 4);
        assert_eq!(topology.province(0).unwrap().members(), vec![1, 2, 3]);
        assert_eq!(topology.province(1).unwrap().members(), vec![4, 5]);
        assert_eq!(topology.province(2).unwrap().members(), vec![6, 7, 8, 9]);
        assert_eq!(topology.leader_of(2), Some(6));
        assert_eq!(topology.province_of_leader(4), Some(1));
        assert_eq!(topology.province_of_leader(5), None);
    }

    #[test]
    fn test_role_of_every_rank() {
        let topology = Topology::from_counts(&[1, 2]);

        assert_eq!(topology.role_of(0), Role::Coordinator);
        assert_eq!(topology.role_of(1), Role::Leader { province: 0 });
        assert_eq!(topology.role_of(2), Role::Worker { province: 0, local_rank: 1 });
        assert_eq!(topology.role_of(3), Role::Leader { province: 1 });
        assert_eq!(topology.role_of(5), Role::Worker { province: 1, local_rank: 2 });
        assert_eq!(topology.role_of(6), Role::Unassigned);
    }

    #[test]
    fn test_world_size_check() {
        let topology = Topology::from_counts(&[1, 1]);

        assert!(topology.check_world_size(5).is_ok());
        assert!(topology.check_world_size(8).is_ok());
        assert!(matches!(topology.check_world_size(4), Err(DispatchError::Configuration(_))));
    }

    #[test]
    fn test_participants_exclude_coordinator() {
        let topology = Topology::from_counts(&[1, 2]);
        assert_eq!(topology.participants(), vec![1, 2, 3, 4, 5]);
    }
}
