//! Display utilities for formatted output

use tabled::{Table, Tabled};

use crate::{
    config::DispatchPlan,
    domain::{
        state::RunReport,
        topology::{Rank, Role, Topology}
    }
};

/// One rank of the topology table
#[derive(Debug, Clone, Tabled)]
pub struct RankRow {
    #[tabled(rename = "Rank")]
    pub rank:       Rank,
    #[tabled(rename = "Role")]
    pub role:       String,
    #[tabled(rename = "Province")]
    pub province:   String,
    #[tabled(rename = "Local Rank")]
    pub local_rank: String
}

pub fn rank_rows(topology: &Topology) -> Vec<RankRow> {
    (0..topology.world_size())
        .map(|rank| {
            let (role, province, local_rank) = match topology.role_of(rank) {
                Role::Coordinator => ("coordinator", "-".to_string(), "-".to_string()),
                Role::Leader { province } => ("leader", province.to_string(), "0".to_string()),
                Role::Worker { province, local_rank } => ("worker", province.to_string(), local_rank.to_string()),
                Role::Unassigned => ("unassigned", "-".to_string(), "-".to_string())
            };
            RankRow { rank, role: role.to_string(), province, local_rank }
        })
        .collect()
}

/// Display the rank assignment for a plan
pub fn show_topology(plan: &DispatchPlan) {
    let topology = plan.topology();
    println!("World size: {} ({} provinces)", topology.world_size(), topology.province_count());
    println!("{}", Table::new(rank_rows(&topology)));
    println!("Orders per province: {:?}", plan.orders());
}

/// Display the summary of a finished run
pub fn show_run_report(report: &RunReport) {
    println!("Run {} finished in {} ms", report.run_id, (report.finished_at - report.started_at).num_milliseconds());
    println!();
    println!("{}", Table::new(&report.provinces));
    println!();
    println!("{}", Table::new(&report.workers));

    if !report.reallocations.is_empty() {
        println!();
        println!("Reallocations:");
        for reallocation in &report.reallocations {
            println!(
                "  worker {} : province {} -> province {}",
                reallocation.worker, reallocation.source_province, reallocation.target_province
            );
        }
    }

    if report.forced {
        println!();
        println!("Warning: iteration cap reached after {} iterations; completion was forced", report.iterations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_rows_follow_topology() {
        let rows = rank_rows(&Topology::from_counts(&[2, 1]));

        let roles: Vec<_> = rows.iter().map(|row| row.role.as_str()).collect();
        assert_eq!(roles, vec!["coordinator", "leader", "worker", "worker", "leader", "worker"]);
        assert_eq!(rows[3].local_rank, "2");
        assert_eq!(rows[5].province, "1");
    }
}
