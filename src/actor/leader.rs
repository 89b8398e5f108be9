//! ProvinceLeader Actor - per-province dispatcher
//!
//! Receives the order count from the coordinator, hands orders to idle
//! workers and tracks their completions. Home workers are addressed on the
//! province channel by local rank; loaned-in workers on the world channel by
//! global rank. Shortages, availability and completion travel upward as
//! [`ProvinceReport`]s.
//!
//! A finished leader stays up until the coordinator's shutdown so that a
//! worker lent on a stale shortage report is sent straight back home.

use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::oneshot;
use tracing::{Level, event};

use crate::{
    actor::message::{LeaderMessage, Step},
    config::Tuning,
    domain::{
        backlog::{Dispatch, Origin, ProvinceBacklog},
        constant::leader,
        error::DispatchError,
        protocol::{Assignment, CustodyNotice, Envelope, Payload, ProvinceReport, Source, Termination, Topic},
        state::LeaderOutcome,
        topology::{COORDINATOR_RANK, ProvinceLayout, Rank}
    },
    port::transport::Communicator
};

pub struct LeaderArguments {
    pub world:    Communicator,
    pub province: Communicator,
    pub layout:   ProvinceLayout,
    pub tuning:   Tuning,
    pub outcome:  oneshot::Sender<LeaderOutcome>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingOrderCount,
    Dispatching,
    Finished
}

pub struct LeaderState {
    world:      Communicator,
    province:   Communicator,
    layout:     ProvinceLayout,
    /// Global ranks in local-rank order
    members:    Vec<Rank>,
    phase:      Phase,
    backlog:    Option<ProvinceBacklog>,
    iterations: u64,
    tuning:     Tuning,
    outcome:    Option<oneshot::Sender<LeaderOutcome>>
}

impl LeaderState {
    fn rank(&self) -> Rank {
        self.layout.leader
    }

    fn global_of(&self, local: usize) -> Option<Rank> {
        self.members.get(local).copied()
    }
}

pub struct ProvinceLeader;

#[async_trait::async_trait]
impl Actor for ProvinceLeader {
    type Arguments = LeaderArguments;
    type Msg = LeaderMessage;
    type State = LeaderState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments
    ) -> Result<Self::State, ActorProcessingErr> {
        event!(
            Level::DEBUG,
            event = leader::LEADER_STARTED,
            province = args.layout.index,
            rank = args.layout.leader,
            workers = args.layout.workers.len(),
            province_size = args.province.size()
        );

        Ok(LeaderState {
            world: args.world,
            province: args.province,
            members: args.layout.members(),
            layout: args.layout,
            phase: Phase::AwaitingOrderCount,
            backlog: None,
            iterations: 0,
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
        match message {
            LeaderMessage::Poll => {
                let step = match state.phase {
                    Phase::AwaitingOrderCount => self.await_order_count(state).await,
                    Phase::Dispatching => self.dispatch_iteration(state).await,
                    Phase::Finished => self.await_shutdown(state).await
                };

                match step {
                    Step::Busy => myself.cast(LeaderMessage::Poll)?,
                    Step::Idle => {
                        myself.send_after(state.tuning.leader_backpressure(), || LeaderMessage::Poll);
                    }
                    Step::Stop => myself.stop(None)
                }
            }
        }
        Ok(())
    }

    async fn post_stop(&self, _myself: ActorRef<Self::Msg>, state: &mut Self::State) -> Result<(), ActorProcessingErr> {
        let finished = state.phase == Phase::Finished;
        event!(
            Level::DEBUG,
            event = leader::TERMINATED,
            province = state.layout.index,
            finished = finished,
            iterations = state.iterations
        );

        if let Some(outcome) = state.outcome.take() {
            let summary = match &state.backlog {
                Some(backlog) => LeaderOutcome {
                    province: state.layout.index,
                    leader: state.layout.leader,
                    total_orders: backlog.total(),
                    completed_orders: backlog.completed_orders().collect(),
                    loans_taken: backlog.loans_taken(),
                    finished
                },
                None => LeaderOutcome {
                    province: state.layout.index,
                    leader: state.layout.leader,
                    total_orders: 0,
                    completed_orders: Vec::new(),
                    loans_taken: 0,
                    finished
                }
            };
            let _ = outcome.send(summary);
        }
        Ok(())
    }
}

impl ProvinceLeader {
    async fn await_order_count(&self, state: &mut LeaderState) -> Step {
        if self.coordinator_terminated(state).await {
            return Step::Stop;
        }

        let total = match state.world.try_receive(Source::Rank(COORDINATOR_RANK), Topic::OrderCount).await {
            Ok(Some(Envelope { payload: Payload::OrderCount(total), .. })) => total,
            Ok(_) => return Step::Idle,
            Err(e) => {
                log_transport_error(state, "order-count", &e);
                return Step::Idle;
            }
        };

        event!(Level::INFO, event = leader::ORDER_COUNT_RECEIVED, province = state.layout.index, orders = total);

        let home_workers = state.layout.workers.iter().filter_map(|w| state.layout.local_rank_of(*w).map(|l| (*w, l)));
        state.backlog = Some(ProvinceBacklog::new(total, home_workers.collect::<Vec<_>>()));
        state.phase = Phase::Dispatching;

        if let Err(e) = state.world.send(COORDINATOR_RANK, Payload::OrderCountAck(total)).await {
            log_transport_error(state, "order-count-ack", &e);
        }
        Step::Busy
    }

    /// One pass of the assignment loop
    async fn dispatch_iteration(&self, state: &mut LeaderState) -> Step {
        state.iterations += 1;

        if self.coordinator_terminated(state).await {
            return Step::Stop;
        }

        if let Err(e) = self.admit_incoming(state).await {
            log_transport_error(state, "incoming-worker", &e);
        }
        if let Err(e) = self.apply_custody_notices(state).await {
            log_transport_error(state, "custody", &e);
        }
        self.dispatch_orders(state).await;
        if let Err(e) = self.collect_completions(state).await {
            log_transport_error(state, "task-complete", &e);
        }

        let Some(backlog) = state.backlog.as_mut() else {
            return Step::Idle;
        };

        if let Some(remaining) = backlog.shortage(state.tuning.shortage_threshold) {
            let active = backlog.active();
            event!(
                Level::INFO,
                event = leader::SHORTAGE_REPORTED,
                province = state.layout.index,
                remaining = remaining,
                active = active
            );
            let report = ProvinceReport::need_more(state.layout.leader, remaining, active);
            self.report(state, report).await;
        }

        if let Some(backlog) = state.backlog.as_ref()
            && state.tuning.leader_status_every > 0
            && state.iterations % state.tuning.leader_status_every == 0
        {
            let report = ProvinceReport::status(state.layout.leader, backlog.unfinished(), backlog.active());
            event!(
                Level::DEBUG,
                event = leader::STATUS_REPORTED,
                province = state.layout.index,
                unfinished = backlog.unfinished(),
                active = backlog.active()
            );
            self.report(state, report).await;
        }

        if state.backlog.as_ref().is_some_and(|backlog| backlog.is_complete()) {
            self.finish(state).await;
        }
        Step::Idle
    }

    /// Bounce workers lent after this province finished until shutdown arrives
    async fn await_shutdown(&self, state: &mut LeaderState) -> Step {
        if self.coordinator_terminated(state).await {
            return Step::Stop;
        }

        let incoming = match state.world.drain(Source::Rank(COORDINATOR_RANK), Topic::IncomingWorker).await {
            Ok(incoming) => incoming,
            Err(e) => {
                log_transport_error(state, "incoming-worker", &e);
                return Step::Idle;
            }
        };

        for envelope in incoming {
            let Payload::IncomingWorker(worker) = envelope.payload else {
                continue;
            };
            if let Err(e) = state.world.send(worker, Payload::Terminate(Termination::Return)).await {
                log_transport_error(state, "worker-return", &e);
                continue;
            }
            event!(Level::INFO, event = leader::LATE_WORKER_RETURNED, province = state.layout.index, worker = worker);
        }
        Step::Idle
    }

    async fn coordinator_terminated(&self, state: &LeaderState) -> bool {
        match state.world.try_receive(Source::Rank(COORDINATOR_RANK), Topic::Terminate).await {
            Ok(Some(Envelope { payload: Payload::Terminate(termination), .. })) => {
                event!(
                    Level::INFO,
                    event = leader::TERMINATED,
                    province = state.layout.index,
                    termination = ?termination
                );
                true
            }
            Ok(_) => false,
            Err(e) => {
                log_transport_error(state, "terminate", &e);
                false
            }
        }
    }

    async fn admit_incoming(&self, state: &mut LeaderState) -> Result<(), DispatchError> {
        for envelope in state.world.drain(Source::Rank(COORDINATOR_RANK), Topic::IncomingWorker).await? {
            if let (Payload::IncomingWorker(worker), Some(backlog)) = (envelope.payload, state.backlog.as_mut()) {
                let admitted = backlog.admit_loaned(worker);
                event!(
                    Level::INFO,
                    event = leader::WORKER_INCOMING,
                    province = state.layout.index,
                    worker = worker,
                    admitted = admitted
                );
            }
        }
        Ok(())
    }

    async fn apply_custody_notices(&self, state: &mut LeaderState) -> Result<(), DispatchError> {
        let mut notices = Vec::new();
        for envelope in state.province.drain(Source::Any, Topic::Custody).await? {
            if let (Payload::Custody(notice), Some(worker)) = (envelope.payload, state.global_of(envelope.source)) {
                notices.push((worker, notice));
            }
        }
        for envelope in state.world.drain(Source::Any, Topic::Custody).await? {
            if let Payload::Custody(notice) = envelope.payload {
                notices.push((envelope.source, notice));
            }
        }

        for (worker, notice) in notices {
            let Some(backlog) = state.backlog.as_mut() else {
                continue;
            };

            match notice {
                CustodyNotice::Departed => {
                    let departure = backlog.depart(worker);
                    event!(
                        Level::INFO,
                        event = leader::WORKER_DEPARTED,
                        province = state.layout.index,
                        worker = worker,
                        departure = ?departure
                    );
                }
                CustodyNotice::Returned => {
                    if backlog.welcome_home(worker) {
                        event!(Level::INFO, event = leader::WORKER_RETURNED, province = state.layout.index, worker = worker);
                        let report = ProvinceReport::worker_available(state.rank(), worker);
                        self.report(state, report).await;
                    }
                }
                CustodyNotice::Declined(order) => {
                    let requeued = backlog.decline(worker, order);
                    event!(
                        Level::DEBUG,
                        event = leader::ORDER_DECLINED,
                        province = state.layout.index,
                        worker = worker,
                        order = order,
                        requeued = requeued
                    );
                }
            }
        }
        Ok(())
    }

    async fn dispatch_orders(&self, state: &mut LeaderState) {
        loop {
            let Some(dispatch) = state.backlog.as_mut().and_then(|backlog| backlog.next_dispatch()) else {
                break;
            };

            let payload = Payload::Task(Assignment::Order(dispatch.order));
            let sent = match dispatch.origin {
                Origin::Home { local_rank } => state.province.send(local_rank, payload).await,
                Origin::LoanedIn => state.world.send(dispatch.worker, payload).await
            };

            if let Err(e) = sent {
                log_transport_error(state, "task-assign", &e);
                self.undo(state, dispatch);
                break;
            }

            event!(
                Level::DEBUG,
                event = leader::ORDER_DISPATCHED,
                province = state.layout.index,
                worker = dispatch.worker,
                order = dispatch.order
            );
        }
    }

    fn undo(&self, state: &mut LeaderState, dispatch: Dispatch) {
        if let Some(backlog) = state.backlog.as_mut() {
            backlog.undo_dispatch(dispatch);
        }
    }

    async fn collect_completions(&self, state: &mut LeaderState) -> Result<(), DispatchError> {
        let mut completions = Vec::new();
        for envelope in state.province.drain(Source::Any, Topic::TaskComplete).await? {
            if let (Payload::TaskComplete(order), Some(worker)) = (envelope.payload, state.global_of(envelope.source)) {
                completions.push((worker, order));
            }
        }
        for envelope in state.world.drain(Source::Any, Topic::TaskComplete).await? {
            if let Payload::TaskComplete(order) = envelope.payload {
                completions.push((envelope.source, order));
            }
        }

        for (worker, order) in completions {
            let Some(backlog) = state.backlog.as_mut() else {
                continue;
            };

            let completion = backlog.complete(worker, order);
            if !completion.accepted {
                event!(
                    Level::DEBUG,
                    event = leader::STALE_COMPLETION,
                    province = state.layout.index,
                    worker = worker,
                    order = order
                );
            } else {
                event!(
                    Level::DEBUG,
                    event = leader::ORDER_COMPLETED,
                    province = state.layout.index,
                    worker = worker,
                    order = order,
                    finished = backlog.finished(),
                    total = backlog.total()
                );
            }

            if let Some(Origin::Home { .. }) = completion.released {
                let report = ProvinceReport::worker_available(state.rank(), worker);
                self.report(state, report).await;
            }
        }
        Ok(())
    }

    /// Tell the coordinator, then release every worker still attached
    ///
    /// The completion report goes first so the coordinator has closed the
    /// province's loans before a returned worker is reported available again.
    async fn finish(&self, state: &mut LeaderState) {
        let Some(release) = state.backlog.as_mut().map(|backlog| backlog.release_all()) else {
            return;
        };

        let report = ProvinceReport::completed(state.rank());
        self.report(state, report).await;

        for (worker, local_rank) in &release.stop_home {
            if let Err(e) = state.province.send(*local_rank, Payload::Task(Assignment::Stop)).await {
                event!(
                    Level::WARN,
                    event = leader::TRANSPORT_FAILED,
                    province = state.layout.index,
                    worker = worker,
                    error = %e
                );
            }
        }
        for worker in &release.return_loaned {
            if let Err(e) = state.world.send(*worker, Payload::Terminate(Termination::Return)).await {
                event!(
                    Level::WARN,
                    event = leader::TRANSPORT_FAILED,
                    province = state.layout.index,
                    worker = worker,
                    error = %e
                );
            }
        }

        state.phase = Phase::Finished;

        event!(
            Level::INFO,
            event = leader::PROVINCE_FINISHED,
            province = state.layout.index,
            stopped = release.stop_home.len(),
            returned = release.return_loaned.len(),
            still_on_loan = ?release.still_on_loan
        );
    }

    async fn report(&self, state: &LeaderState, report: ProvinceReport) {
        if let Err(e) = state.world.send(COORDINATOR_RANK, Payload::Report(report)).await {
            log_transport_error(state, "province-report", &e);
        }
    }
}

fn log_transport_error(state: &LeaderState, topic: &str, error: &DispatchError) {
    event!(
        Level::WARN,
        event = leader::TRANSPORT_FAILED,
        province = state.layout.index,
        topic = topic,
        error = %error
    );
}
