//! Guardian - root of a dispatch run
//!
//! Lays out the world from a plan, spawns one actor per rank (workers and
//! leaders first, the coordinator last), waits for every actor to stop and
//! folds their outcomes into a [`RunReport`].

use std::sync::Arc;

use chrono::Utc;
use ractor::{Actor, ActorCell};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{Level, event};
use uuid::Uuid;

use crate::{
    actor::{
        coordinator::{Coordinator, CoordinatorArguments, CoordinatorResult},
        leader::{LeaderArguments, ProvinceLeader},
        message::{CoordinatorMessage, LeaderMessage, WorkerMessage},
        worker::{Worker, WorkerArguments}
    },
    adapter::transport::InMemoryTransport,
    config::DispatchPlan,
    domain::{
        constant::guardian,
        error::DispatchError,
        state::{LeaderOutcome, ProvinceSummary, RunReport, WorkerOutcome, WorkerSummary},
        topology::{COORDINATOR_RANK, Topology}
    },
    port::transport::{Communicator, Transport}
};

/// Everything spawned so far, so a failed startup can be unwound
#[derive(Default)]
struct Spawned {
    cells:    Vec<ActorCell>,
    handles:  Vec<JoinHandle<()>>,
    workers:  Vec<oneshot::Receiver<WorkerOutcome>>,
    leaders:  Vec<oneshot::Receiver<LeaderOutcome>>
}

impl Spawned {
    fn stop_all(&self) {
        for cell in &self.cells {
            cell.stop(None);
        }
    }
}

pub struct Guardian;

impl Guardian {
    /// Run a plan to completion over a fresh in-memory transport
    pub async fn run(plan: &DispatchPlan) -> Result<RunReport, DispatchError> {
        plan.validate()?;
        let transport = Arc::new(InMemoryTransport::new(plan.topology().world_size()));
        Self::run_on(plan, transport).await
    }

    /// Run a plan over a caller-supplied transport
    pub async fn run_on(plan: &DispatchPlan, transport: Arc<dyn Transport>) -> Result<RunReport, DispatchError> {
        plan.validate()?;
        let topology = plan.topology();
        topology.check_world_size(transport.world_size())?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        event!(
            Level::INFO,
            event = guardian::RUN_STARTED,
            run_id = %run_id,
            provinces = topology.province_count(),
            world_size = topology.world_size(),
            orders = ?plan.orders()
        );

        let mut spawned = Spawned::default();
        let coordinator = match Self::spawn_all(plan, &topology, transport, &mut spawned).await {
            Ok(coordinator) => coordinator,
            Err(e) => {
                event!(Level::ERROR, event = guardian::ACTOR_SPAWN_FAILED, run_id = %run_id, error = %e);
                spawned.stop_all();
                return Err(e);
            }
        };

        let result = match coordinator.await {
            Ok(result) => result,
            Err(_) => {
                spawned.stop_all();
                Err(DispatchError::Generic("coordinator exited without an outcome".to_string()))
            }
        };

        for handle in spawned.handles {
            if let Err(e) = handle.await {
                event!(Level::WARN, event = guardian::OUTCOME_MISSING, run_id = %run_id, error = %e);
            }
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                event!(Level::ERROR, event = guardian::RUN_FAILED, run_id = %run_id, error = %e);
                return Err(e);
            }
        };

        let mut provinces = Vec::new();
        for receiver in spawned.leaders {
            match receiver.await {
                Ok(leader) => {
                    let completion = outcome.completions.get(leader.province).copied().flatten();
                    provinces.push(ProvinceSummary::new(&leader, completion));
                }
                Err(_) => event!(Level::WARN, event = guardian::OUTCOME_MISSING, run_id = %run_id, actor = "leader")
            }
        }
        provinces.sort_by_key(|province| province.index);

        let mut workers = Vec::new();
        for receiver in spawned.workers {
            match receiver.await {
                Ok(worker) => {
                    let home_leader = topology.leader_of(worker.home_province).unwrap_or(COORDINATOR_RANK);
                    workers.push(WorkerSummary::new(&worker, home_leader));
                }
                Err(_) => event!(Level::WARN, event = guardian::OUTCOME_MISSING, run_id = %run_id, actor = "worker")
            }
        }
        workers.sort_by_key(|worker| worker.rank);

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            iterations: outcome.iterations,
            forced: outcome.forced,
            provinces,
            reallocations: outcome.reallocations,
            workers
        };

        event!(
            Level::INFO,
            event = guardian::RUN_COMPLETED,
            run_id = %run_id,
            completed = report.total_completed(),
            reallocations = report.reallocations.len(),
            forced = report.forced
        );
        Ok(report)
    }

    async fn spawn_all(
        plan: &DispatchPlan,
        topology: &Topology,
        transport: Arc<dyn Transport>,
        spawned: &mut Spawned
    ) -> Result<oneshot::Receiver<CoordinatorResult>, DispatchError> {
        event!(Level::DEBUG, event = guardian::ACTORS_SPAWNING, actors = topology.world_size());

        for layout in topology.provinces() {
            let members = layout.members();

            for worker in &layout.workers {
                let world = Communicator::world(transport.clone(), *worker);
                let province = world.split(layout.index, &members)?;
                let (outcome, receiver) = oneshot::channel();
                let args = WorkerArguments {
                    world,
                    province,
                    home_province: layout.index,
                    home_leader: layout.leader,
                    delivery_time: plan.delivery_time(),
                    backpressure: plan.tuning.worker_backpressure(),
                    outcome
                };

                let (actor, handle) = Actor::spawn(None, Worker, args).await?;
                spawned.cells.push(actor.get_cell());
                spawned.handles.push(handle);
                spawned.workers.push(receiver);
                actor.cast(WorkerMessage::Poll).map_err(|e| DispatchError::Spawn(e.to_string()))?;
            }

            let world = Communicator::world(transport.clone(), layout.leader);
            let province = world.split(layout.index, &members)?;
            let (outcome, receiver) = oneshot::channel();
            let args = LeaderArguments { world, province, layout: layout.clone(), tuning: plan.tuning.clone(), outcome };

            let (actor, handle) = Actor::spawn(None, ProvinceLeader, args).await?;
            spawned.cells.push(actor.get_cell());
            spawned.handles.push(handle);
            spawned.leaders.push(receiver);
            actor.cast(LeaderMessage::Poll).map_err(|e| DispatchError::Spawn(e.to_string()))?;
        }

        let (outcome, receiver) = oneshot::channel();
        let args = CoordinatorArguments {
            world: Communicator::world(transport, COORDINATOR_RANK),
            topology: topology.clone(),
            orders: plan.orders(),
            tuning: plan.tuning.clone(),
            outcome
        };
        let (actor, handle) = Actor::spawn(None, Coordinator, args).await?;
        spawned.cells.push(actor.get_cell());
        spawned.handles.push(handle);
        actor.cast(CoordinatorMessage::Start).map_err(|e| DispatchError::Spawn(e.to_string()))?;

        event!(Level::DEBUG, event = guardian::ACTORS_SPAWNED, actors = spawned.cells.len());
        Ok(receiver)
    }
}
