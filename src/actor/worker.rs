//! Worker Actor - delivery distributor
//!
//! Executes orders one at a time for whichever leader currently holds its
//! custody. At home it listens to its province leader on the province
//! channel; while on loan it accepts tasks from any source on the world
//! channel and replies to whoever issued each task.
//!
//! The home leader's stop sentinel parks the worker rather than ending it:
//! it can still be lent to another province, and only the coordinator's
//! shutdown takes it out of the run.

use std::time::Duration;

use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::oneshot;
use tracing::{Level, event};

use crate::{
    actor::message::{Step, WorkerMessage},
    domain::{
        constant::worker,
        error::DispatchError,
        protocol::{
            Assignment, CustodyNotice, Envelope, OrderId, Payload, ReallocationCommand, Source, Termination,
            Topic
        },
        state::{ProcessedOrder, WorkerOutcome, WorkerPhase},
        topology::{COORDINATOR_RANK, LEADER_LOCAL_RANK, Rank}
    },
    port::transport::Communicator
};

pub struct WorkerArguments {
    pub world:         Communicator,
    pub province:      Communicator,
    pub home_province: usize,
    pub home_leader:   Rank,
    pub delivery_time: Duration,
    pub backpressure:  Duration,
    pub outcome:       oneshot::Sender<WorkerOutcome>
}

/// Who the worker is taking tasks from right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Custody {
    Home,
    Loaned { leader: Rank, province: usize }
}

pub struct WorkerState {
    world:         Communicator,
    province:      Communicator,
    rank:          Rank,
    home_province: usize,
    home_leader:   Rank,
    custody:       Custody,
    phase:         WorkerPhase,
    /// The home leader finished and sent its stop sentinel
    home_closed:   bool,
    processed:     Vec<ProcessedOrder>,
    loans:         u32,
    delivery_time: Duration,
    backpressure:  Duration,
    outcome:       Option<oneshot::Sender<WorkerOutcome>>
}

pub struct Worker;

#[async_trait::async_trait]
impl Actor for Worker {
    type Arguments = WorkerArguments;
    type Msg = WorkerMessage;
    type State = WorkerState;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments
    ) -> Result<Self::State, ActorProcessingErr> {
        let rank = args.world.global_rank();
        event!(
            Level::DEBUG,
            event = worker::WORKER_STARTED,
            rank = rank,
            province = args.home_province,
            local_rank = args.province.rank()
        );

        Ok(WorkerState {
            world: args.world,
            province: args.province,
            rank,
            home_province: args.home_province,
            home_leader: args.home_leader,
            custody: Custody::Home,
            phase: WorkerPhase::Idle,
            home_closed: false,
            processed: Vec::new(),
            loans: 0,
            delivery_time: args.delivery_time,
            backpressure: args.backpressure,
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
            WorkerMessage::Poll => match self.poll(state).await {
                Step::Busy => myself.cast(WorkerMessage::Poll)?,
                Step::Idle => {
                    myself.send_after(state.backpressure, || WorkerMessage::Poll);
                }
                Step::Stop => {
                    state.phase = WorkerPhase::Terminated;
                    myself.stop(None);
                }
            }
        }
        Ok(())
    }

    async fn post_stop(&self, _myself: ActorRef<Self::Msg>, state: &mut Self::State) -> Result<(), ActorProcessingErr> {
        event!(
            Level::DEBUG,
            event = worker::TERMINATED,
            rank = state.rank,
            processed = state.processed.len(),
            loans = state.loans
        );

        if let Some(outcome) = state.outcome.take() {
            let summary = WorkerOutcome {
                rank:            state.rank,
                home_province:   state.home_province,
                processed:       std::mem::take(&mut state.processed),
                loans:           state.loans,
                final_phase:     state.phase,
                on_loan_at_exit: matches!(state.custody, Custody::Loaned { .. })
            };
            let _ = outcome.send(summary);
        }
        Ok(())
    }
}

impl Worker {
    /// One pass of the run loop: termination, then reallocation, then work
    async fn poll(&self, state: &mut WorkerState) -> Step {
        match self.check_termination(state).await {
            Ok(Some(step)) => return step,
            Ok(None) => {}
            Err(e) => log_transport_error(state, "terminate", &e)
        }

        match state.world.try_receive(Source::Rank(COORDINATOR_RANK), Topic::Reallocate).await {
            Ok(Some(Envelope { payload: Payload::Reallocate(command), .. })) => {
                if let Err(e) = self.accept_reallocation(state, command).await {
                    log_transport_error(state, "reallocate", &e);
                }
            }
            Ok(_) => {}
            Err(e) => log_transport_error(state, "reallocate", &e)
        }

        match self.next_task(state).await {
            Ok(Some((envelope, on_world))) => self.execute(state, envelope, on_world).await,
            Ok(None) => Step::Idle,
            Err(e) => {
                log_transport_error(state, "task", &e);
                Step::Idle
            }
        }
    }

    async fn check_termination(&self, state: &mut WorkerState) -> Result<Option<Step>, DispatchError> {
        let Some(envelope) = state.world.try_receive(Source::Any, Topic::Terminate).await? else {
            return Ok(None);
        };

        match (envelope.payload, state.custody) {
            (Payload::Terminate(Termination::Shutdown), _) => Ok(Some(Step::Stop)),
            (Payload::Terminate(Termination::Return), Custody::Loaned { leader, .. }) if envelope.source == leader => {
                self.return_home(state).await.map(Some)
            }
            (Payload::Terminate(Termination::Return), _) => {
                self.return_before_loan(state, envelope.source).await.map(Some)
            }
            (payload, _) => {
                event!(
                    Level::DEBUG,
                    event = worker::TASK_DECLINED,
                    rank = state.rank,
                    source = envelope.source,
                    payload = ?payload,
                    reason = "stale termination"
                );
                Ok(Some(Step::Busy))
            }
        }
    }

    /// Hand custody to the target leader
    async fn accept_reallocation(
        &self,
        state: &mut WorkerState,
        command: ReallocationCommand
    ) -> Result<(), DispatchError> {
        match state.custody {
            Custody::Home => {
                for envelope in state.province.drain(Source::Rank(LEADER_LOCAL_RANK), Topic::TaskAssign).await? {
                    match envelope.payload {
                        Payload::Task(Assignment::Order(order)) => {
                            decline(state, &state.province, LEADER_LOCAL_RANK, order).await?
                        }
                        Payload::Task(Assignment::Stop) => state.home_closed = true,
                        _ => {}
                    }
                }
                state.province.send(LEADER_LOCAL_RANK, Payload::Custody(CustodyNotice::Departed)).await?;
            }
            Custody::Loaned { leader, .. } => {
                for envelope in state.world.drain(Source::Rank(leader), Topic::TaskAssign).await? {
                    if let Payload::Task(Assignment::Order(order)) = envelope.payload {
                        decline(state, &state.world, leader, order).await?;
                    }
                }
                state.world.send(leader, Payload::Custody(CustodyNotice::Departed)).await?;
            }
        }

        state.custody = Custody::Loaned { leader: command.target_leader, province: command.target_province };
        state.loans += 1;
        event!(
            Level::INFO,
            event = worker::REALLOCATED,
            rank = state.rank,
            from = command.source_province,
            to = command.target_province
        );
        Ok(())
    }

    /// Back under the home leader after a borrower finished
    async fn return_home(&self, state: &mut WorkerState) -> Result<Step, DispatchError> {
        let borrower = match state.custody {
            Custody::Loaned { province, .. } => Some(province),
            Custody::Home => None
        };
        if let Custody::Loaned { leader, .. } = state.custody {
            for envelope in state.world.drain(Source::Rank(leader), Topic::TaskAssign).await? {
                if let Payload::Task(Assignment::Order(order)) = envelope.payload {
                    decline(state, &state.world, leader, order).await?;
                }
            }
        }
        state.custody = Custody::Home;

        for envelope in state.province.drain(Source::Rank(LEADER_LOCAL_RANK), Topic::TaskAssign).await? {
            match envelope.payload {
                Payload::Task(Assignment::Order(order)) => {
                    decline(state, &state.province, LEADER_LOCAL_RANK, order).await?
                }
                Payload::Task(Assignment::Stop) => state.home_closed = true,
                _ => {}
            }
        }

        event!(
            Level::INFO,
            event = worker::RETURNED_HOME,
            rank = state.rank,
            province = state.home_province,
            borrower = ?borrower,
            home_closed = state.home_closed
        );

        if state.home_closed {
            return Ok(Step::Busy);
        }
        state.province.send(LEADER_LOCAL_RANK, Payload::Custody(CustodyNotice::Returned)).await?;
        Ok(Step::Busy)
    }

    /// A borrower can finish and send this worker back before the loan itself is read
    async fn return_before_loan(&self, state: &mut WorkerState, borrower: Rank) -> Result<Step, DispatchError> {
        if let Some(Envelope { payload: Payload::Reallocate(command), .. }) =
            state.world.try_receive(Source::Rank(COORDINATOR_RANK), Topic::Reallocate).await?
        {
            self.accept_reallocation(state, command).await?;
        }

        match state.custody {
            Custody::Loaned { leader, .. } if leader == borrower => self.return_home(state).await,
            custody => {
                event!(
                    Level::DEBUG,
                    event = worker::TASK_DECLINED,
                    rank = state.rank,
                    source = borrower,
                    custody = ?custody,
                    reason = "stale return"
                );
                Ok(Step::Busy)
            }
        }
    }

    /// Next task from the current custodian; the flag is true for world-channel tasks
    async fn next_task(&self, state: &WorkerState) -> Result<Option<(Envelope, bool)>, DispatchError> {
        match state.custody {
            Custody::Home => {
                let task = state.province.try_receive(Source::Rank(LEADER_LOCAL_RANK), Topic::TaskAssign).await?;
                Ok(task.map(|envelope| (envelope, false)))
            }
            Custody::Loaned { .. } => {
                let task = state.world.try_receive(Source::Any, Topic::TaskAssign).await?;
                Ok(task.map(|envelope| (envelope, true)))
            }
        }
    }

    async fn execute(&self, state: &mut WorkerState, envelope: Envelope, on_world: bool) -> Step {
        let order = match envelope.payload {
            Payload::Task(Assignment::Order(order)) => order,
            Payload::Task(Assignment::Stop) => {
                state.home_closed = true;
                event!(Level::DEBUG, event = worker::HOME_CLOSED, rank = state.rank, province = state.home_province);
                return Step::Busy;
            }
            _ => return Step::Busy
        };

        let issuer = if on_world { envelope.source } else { state.home_leader };
        event!(Level::DEBUG, event = worker::TASK_RECEIVED, rank = state.rank, leader = issuer, order = order);

        state.phase = WorkerPhase::Busy;
        tokio::time::sleep(state.delivery_time).await;
        state.phase = WorkerPhase::Idle;
        state.processed.push(ProcessedOrder { leader: issuer, order });

        let communicator = if on_world { &state.world } else { &state.province };
        if let Err(e) = communicator.send(envelope.source, Payload::TaskComplete(order)).await {
            log_transport_error(state, "task-complete", &e);
        } else {
            event!(Level::DEBUG, event = worker::TASK_COMPLETED, rank = state.rank, leader = issuer, order = order);
        }
        Step::Busy
    }
}

async fn decline(state: &WorkerState, communicator: &Communicator, to: usize, order: OrderId) -> Result<(), DispatchError> {
    event!(Level::DEBUG, event = worker::TASK_DECLINED, rank = state.rank, order = order, channel = ?communicator.channel());
    communicator.send(to, Payload::Custody(CustodyNotice::Declined(order))).await
}

fn log_transport_error(state: &WorkerState, topic: &str, error: &DispatchError) {
    event!(Level::WARN, event = worker::TRANSPORT_FAILED, rank = state.rank, topic = topic, error = %error);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{adapter::transport::InMemoryTransport, port::transport::Transport};

    // Ranks: coordinator 0, leader 1, worker 2, leader 3.
    const WORKER: Rank = 2;

    async fn spawn_worker(transport: &Arc<dyn Transport>) -> (tokio::task::JoinHandle<()>, oneshot::Receiver<WorkerOutcome>) {
        let world = Communicator::world(transport.clone(), WORKER);
        let province = world.split(0, &[1, WORKER]).unwrap();
        let (outcome, receiver) = oneshot::channel();
        let args = WorkerArguments {
            world,
            province,
            home_province: 0,
            home_leader: 1,
            delivery_time: Duration::from_millis(1),
            backpressure: Duration::from_millis(1),
            outcome
        };

        let (actor, handle) = Actor::spawn(None, Worker, args).await.unwrap();
        actor.cast(WorkerMessage::Poll).unwrap();
        (handle, receiver)
    }

    async fn next_message(communicator: &Communicator, topic: Topic) -> Payload {
        let wait = async {
            loop {
                if let Some(envelope) = communicator.try_receive(Source::Any, topic).await.unwrap() {
                    return envelope.payload;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait).await.expect("message should arrive")
    }

    #[tokio::test]
    async fn test_return_read_before_the_loan_still_sends_worker_home() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new(4));
        let coordinator = Communicator::world(transport.clone(), COORDINATOR_RANK);
        let borrower = Communicator::world(transport.clone(), 3);
        let home = Communicator::world(transport.clone(), 1).split(0, &[1, WORKER]).unwrap();

        let command = ReallocationCommand { target_province: 1, target_leader: 3, source_province: 0 };
        coordinator.send(WORKER, Payload::Reallocate(command)).await.unwrap();
        borrower.send(WORKER, Payload::Terminate(Termination::Return)).await.unwrap();

        let (handle, receiver) = spawn_worker(&transport).await;

        assert_eq!(next_message(&home, Topic::Custody).await, Payload::Custody(CustodyNotice::Departed));
        assert_eq!(next_message(&home, Topic::Custody).await, Payload::Custody(CustodyNotice::Returned));

        // Back at home it serves its own leader again.
        home.send(1, Payload::Task(Assignment::Order(5))).await.unwrap();
        assert_eq!(next_message(&home, Topic::TaskComplete).await, Payload::TaskComplete(5));

        coordinator.send(WORKER, Payload::Terminate(Termination::Shutdown)).await.unwrap();
        handle.await.unwrap();
        let outcome = receiver.await.unwrap();
        assert_eq!(outcome.loans, 1);
        assert!(!outcome.on_loan_at_exit);
        assert_eq!(outcome.final_phase, WorkerPhase::Terminated);
        assert!(outcome.processed.iter().all(|p| p.leader == 1));
    }

    #[tokio::test]
    async fn test_return_from_a_stranger_is_ignored() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new(4));
        let coordinator = Communicator::world(transport.clone(), COORDINATOR_RANK);
        let stranger = Communicator::world(transport.clone(), 3);
        let home = Communicator::world(transport.clone(), 1).split(0, &[1, WORKER]).unwrap();

        stranger.send(WORKER, Payload::Terminate(Termination::Return)).await.unwrap();
        let (handle, receiver) = spawn_worker(&transport).await;

        home.send(1, Payload::Task(Assignment::Order(8))).await.unwrap();
        assert_eq!(next_message(&home, Topic::TaskComplete).await, Payload::TaskComplete(8));
        assert!(home.try_receive(Source::Any, Topic::Custody).await.unwrap().is_none());

        coordinator.send(WORKER, Payload::Terminate(Termination::Shutdown)).await.unwrap();
        handle.await.unwrap();
        let outcome = receiver.await.unwrap();
        assert_eq!(outcome.loans, 0);
        assert_eq!(outcome.processed.len(), 1);
    }
}
