//! Coordinator Actor - global rank 0
//!
//! Pushes each province its order count, then monitors province reports:
//! pools idle workers, lends them to starved provinces and tracks
//! completion. When every province is complete (or the iteration cap is
//! hit) it broadcasts termination exactly once and publishes its outcome.

use std::{
    collections::BTreeSet,
    time::Instant
};

use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::oneshot;
use tracing::{Level, event};

use crate::{
    actor::message::{CoordinatorMessage, Step},
    config::Tuning,
    domain::{
        book::{CompletionPath, CoordinatorBook, Reallocation, ReportEffect},
        constant::coordinator,
        error::DispatchError,
        protocol::{Envelope, Payload, ProvinceReport, Source, Termination, Topic},
        state::CoordinatorOutcome,
        topology::Topology
    },
    port::transport::Communicator
};

pub type CoordinatorResult = Result<CoordinatorOutcome, DispatchError>;

pub struct CoordinatorArguments {
    pub world:    Communicator,
    pub topology: Topology,
    /// Order count per province, by province index
    pub orders:   Vec<u32>,
    pub tuning:   Tuning,
    pub outcome:  oneshot::Sender<CoordinatorResult>
}

#[derive(Debug)]
enum Phase {
    Created,
    Rendezvous { pending: BTreeSet<usize>, deadline: Instant },
    Monitoring,
    Done
}

pub struct CoordinatorState {
    world:         Communicator,
    topology:      Topology,
    orders:        Vec<u32>,
    book:          CoordinatorBook,
    phase:         Phase,
    iterations:    u64,
    idle_streak:   u64,
    reports_seen:  u64,
    reallocations: Vec<Reallocation>,
    forced:        bool,
    tuning:        Tuning,
    outcome:       Option<oneshot::Sender<CoordinatorResult>>
}

pub struct Coordinator;

#[async_trait::async_trait]
impl Actor for Coordinator {
    type Arguments = CoordinatorArguments;
    type Msg = CoordinatorMessage;
    type State = CoordinatorState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments
    ) -> Result<Self::State, ActorProcessingErr> {
        event!(
            Level::DEBUG,
            event = coordinator::COORDINATOR_STARTED,
            provinces = args.topology.province_count(),
            world_size = args.topology.world_size()
        );

        let book = CoordinatorBook::new(&args.topology, args.tuning.implicit_completion);
        Ok(CoordinatorState {
            world: args.world,
            topology: args.topology,
            orders: args.orders,
            book,
            phase: Phase::Created,
            iterations: 0,
            idle_streak: 0,
            reports_seen: 0,
            reallocations: Vec::new(),
            forced: false,
            tuning: args.tuning,
            outcome: Some(args.outcome)
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State
    ) -> Result<(), ActorProcessingErr> {
        let step = match message {
            CoordinatorMessage::Start => self.start(state).await,
            CoordinatorMessage::Poll => match state.phase {
                Phase::Created => Step::Idle,
                Phase::Rendezvous { .. } => self.collect_acks(state).await,
                Phase::Monitoring => self.monitor_iteration(state).await,
                Phase::Done => Step::Stop
            }
        };

        match step {
            Step::Busy => myself.cast(CoordinatorMessage::Poll)?,
            Step::Idle => {
                myself.send_after(state.tuning.coordinator_backpressure(), || CoordinatorMessage::Poll);
            }
            Step::Stop => myself.stop(None)
        }
        Ok(())
    }

    async fn post_stop(&self, _myself: ActorRef<Self::Msg>, state: &mut Self::State) -> Result<(), ActorProcessingErr> {
        if let Some(outcome) = state.outcome.take() {
            let _ = outcome.send(Err(DispatchError::Generic("coordinator stopped before the run finished".to_string())));
        }
        Ok(())
    }
}

impl Coordinator {
    /// Send every leader its order count and open the rendezvous window
    async fn start(&self, state: &mut CoordinatorState) -> Step {
        if !matches!(state.phase, Phase::Created) {
            return Step::Idle;
        }

        let leaders: Vec<_> = state.topology.provinces().iter().map(|layout| (layout.index, layout.leader)).collect();
        for (province, leader) in leaders {
            let total = state.orders.get(province).copied().unwrap_or_default();
            if let Err(e) = state.world.send(leader, Payload::OrderCount(total)).await {
                let error = DispatchError::Rendezvous(format!("order count for province {} not delivered: {}", province, e));
                return self.abort(state, error).await;
            }
            event!(
                Level::DEBUG,
                event = coordinator::ORDER_COUNT_SENT,
                province = province,
                leader = leader,
                orders = total
            );
        }

        state.phase = Phase::Rendezvous {
            pending:  (0..state.topology.province_count()).collect(),
            deadline: Instant::now() + state.tuning.rendezvous_timeout()
        };
        Step::Busy
    }

    async fn collect_acks(&self, state: &mut CoordinatorState) -> Step {
        let acks = match state.world.drain(Source::Any, Topic::OrderCountAck).await {
            Ok(acks) => acks,
            Err(e) => {
                log_transport_error(state, "order-count-ack", &e);
                Vec::new()
            }
        };

        for envelope in acks {
            let Payload::OrderCountAck(total) = envelope.payload else {
                continue;
            };
            match state.topology.province_of_leader(envelope.source) {
                Some(province) if state.orders.get(province) == Some(&total) => {
                    if let Phase::Rendezvous { pending, .. } = &mut state.phase {
                        pending.remove(&province);
                    }
                    event!(Level::DEBUG, event = coordinator::ORDER_COUNT_ACKED, province = province, orders = total);
                }
                _ => {
                    event!(
                        Level::WARN,
                        event = coordinator::REPORT_DISCARDED,
                        source = envelope.source,
                        orders = total,
                        reason = "unexpected order count ack"
                    );
                }
            }
        }

        let Phase::Rendezvous { pending, deadline } = &state.phase else {
            return Step::Idle;
        };

        if pending.is_empty() {
            event!(Level::INFO, event = coordinator::RENDEZVOUS_COMPLETED, provinces = state.topology.province_count());
            state.phase = Phase::Monitoring;
            return Step::Busy;
        }

        if Instant::now() >= *deadline {
            let error = DispatchError::Rendezvous(format!("provinces {:?} never acknowledged their order count", pending));
            return self.abort(state, error).await;
        }
        Step::Idle
    }

    /// One monitoring iteration
    async fn monitor_iteration(&self, state: &mut CoordinatorState) -> Step {
        state.iterations += 1;

        let report = match state.world.try_receive(Source::Any, Topic::ProvinceReport).await {
            Ok(report) => report,
            Err(e) => {
                log_transport_error(state, "province-report", &e);
                None
            }
        };

        let active = match report {
            Some(Envelope { payload: Payload::Report(report), .. }) => {
                state.reports_seen += 1;
                self.apply_report(state, report).await;
                true
            }
            Some(_) => true,
            None => false
        };

        if active {
            state.idle_streak = 0;
        } else {
            state.idle_streak += 1;
            self.sweep(state);

            if state.idle_streak >= state.tuning.idle_sweep_streak {
                event!(
                    Level::DEBUG,
                    event = coordinator::IDLE_SWEEP,
                    streak = state.idle_streak,
                    completed = state.book.completed_count()
                );
                self.sweep(state);
                state.idle_streak = 0;
            }
        }

        if state.tuning.status_every > 0 && state.iterations % state.tuning.status_every == 0 {
            event!(
                Level::INFO,
                event = coordinator::STATUS_SNAPSHOT,
                iteration = state.iterations,
                completed = state.book.completed_count(),
                provinces = ?state.book.snapshot()
            );
        }

        if state.book.all_complete() {
            return self.finish(state).await;
        }

        if state.iterations >= state.tuning.max_iterations {
            let forced = state.book.force_remaining();
            event!(
                Level::WARN,
                event = coordinator::ITERATION_CAP_REACHED,
                iterations = state.iterations,
                forced = ?forced
            );
            state.forced = true;
            return self.finish(state).await;
        }

        if active { Step::Busy } else { Step::Idle }
    }

    async fn apply_report(&self, state: &mut CoordinatorState, report: ProvinceReport) {
        event!(
            Level::DEBUG,
            event = coordinator::REPORT_RECEIVED,
            leader = report.leader,
            kind = ?report.kind
        );

        let effect = match state.book.apply(&report) {
            Ok(effect) => effect,
            Err(e) => {
                event!(Level::WARN, event = coordinator::REPORT_DISCARDED, leader = report.leader, error = %e);
                return;
            }
        };

        match effect {
            ReportEffect::Available { province, worker, pooled } => {
                event!(
                    Level::DEBUG,
                    event = coordinator::WORKER_AVAILABLE,
                    province = province,
                    worker = worker,
                    pooled = pooled
                );
            }
            ReportEffect::Reallocate(reallocation) => self.reallocate(state, reallocation).await,
            ReportEffect::NoDonor { province } => {
                event!(Level::INFO, event = coordinator::NO_DONOR_FOUND, province = province);
            }
            ReportEffect::Completed { province, newly } => {
                if newly {
                    event!(
                        Level::INFO,
                        event = coordinator::PROVINCE_COMPLETED,
                        province = province,
                        completed = state.book.completed_count(),
                        total = state.book.province_count()
                    );
                }
            }
            ReportEffect::Status { .. } => {}
        }
    }

    async fn reallocate(&self, state: &mut CoordinatorState, reallocation: Reallocation) {
        let command = Payload::Reallocate(reallocation.command());
        if let Err(e) = state.world.send(reallocation.worker, command).await {
            state.book.restore(&reallocation);
            event!(
                Level::WARN,
                event = coordinator::REALLOCATION_FAILED,
                worker = reallocation.worker,
                error = %e
            );
            return;
        }

        let notice = Payload::IncomingWorker(reallocation.worker);
        if let Err(e) = state.world.send(reallocation.target_leader, notice).await {
            event!(
                Level::WARN,
                event = coordinator::REALLOCATION_FAILED,
                worker = reallocation.worker,
                leader = reallocation.target_leader,
                error = %e
            );
        }

        event!(
            Level::INFO,
            event = coordinator::WORKER_REALLOCATED,
            worker = reallocation.worker,
            from = reallocation.source_province,
            to = reallocation.target_province
        );
        state.reallocations.push(reallocation);
    }

    fn sweep(&self, state: &mut CoordinatorState) {
        for (province, path) in state.book.sweep() {
            let name = match path {
                CompletionPath::Heuristic => coordinator::IMPLICIT_COMPLETION,
                _ => coordinator::PROVINCE_COMPLETED
            };
            event!(
                Level::INFO,
                event = name,
                province = province,
                path = ?path,
                completed = state.book.completed_count(),
                total = state.book.province_count()
            );
        }
    }

    /// Broadcast termination once to every participant, then publish the outcome
    async fn broadcast_termination(&self, state: &CoordinatorState) -> usize {
        let mut delivered = 0;
        for rank in state.topology.participants() {
            match state.world.send(rank, Payload::Terminate(Termination::Shutdown)).await {
                Ok(()) => delivered += 1,
                Err(e) => log_transport_error(state, "terminate", &e)
            }
        }
        event!(Level::INFO, event = coordinator::TERMINATION_BROADCAST, delivered = delivered);
        delivered
    }

    async fn finish(&self, state: &mut CoordinatorState) -> Step {
        let terminations = self.broadcast_termination(state).await;
        state.phase = Phase::Done;

        let outcome = CoordinatorOutcome {
            iterations: state.iterations,
            forced: state.forced,
            completions: (0..state.book.province_count()).map(|p| state.book.completion_path(p)).collect(),
            reallocations: state.reallocations.clone(),
            reports_seen: state.reports_seen,
            terminations
        };
        if let Some(sender) = state.outcome.take() {
            let _ = sender.send(Ok(outcome));
        }
        Step::Stop
    }

    /// Startup failed: release everyone and surface the error
    async fn abort(&self, state: &mut CoordinatorState, error: DispatchError) -> Step {
        event!(Level::ERROR, event = coordinator::RENDEZVOUS_FAILED, error = %error);
        self.broadcast_termination(state).await;
        state.phase = Phase::Done;

        if let Some(sender) = state.outcome.take() {
            let _ = sender.send(Err(error));
        }
        Step::Stop
    }
}

fn log_transport_error(state: &CoordinatorState, topic: &str, error: &DispatchError) {
    event!(
        Level::WARN,
        event = coordinator::TRANSPORT_FAILED,
        iteration = state.iterations,
        topic = topic,
        error = %error
    );
}
