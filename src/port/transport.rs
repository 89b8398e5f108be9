use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    error::DispatchError,
    protocol::{Channel, Envelope, Payload, Source, Topic},
    topology::Rank
};

/// Point-to-point asynchronous message substrate
///
/// Ranks are global here. Delivery between any `(source, destination,
/// channel)` triple preserves send order; nothing is promised across
/// different triples.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue a message for `to`; never waits for the receiver
    async fn send(&self, from: Rank, to: Rank, channel: Channel, payload: Payload) -> Result<(), DispatchError>;

    /// Non-blocking probe-then-receive of the oldest message matching `source` and `topic`
    async fn try_receive(
        &self,
        me: Rank,
        channel: Channel,
        source: Source,
        topic: Topic
    ) -> Result<Option<Envelope>, DispatchError>;

    /// Number of addressable ranks
    fn world_size(&self) -> usize;
}

/// One participant's handle on one channel
///
/// The world communicator addresses global ranks. A communicator produced by
/// [`Communicator::split`] addresses its members by local rank, position in
/// the member list, and reports sources in that same local space.
#[derive(Clone)]
pub struct Communicator {
    transport: Arc<dyn Transport>,
    channel:   Channel,
    rank:      Rank,
    members:   Option<Arc<[Rank]>>
}

impl Communicator {
    pub fn world(transport: Arc<dyn Transport>, rank: Rank) -> Self {
        Self { transport, channel: Channel::World, rank, members: None }
    }

    /// Derive the group communicator for `color`; `members` are global ranks in local-rank order
    pub fn split(&self, color: usize, members: &[Rank]) -> Result<Self, DispatchError> {
        if !members.contains(&self.rank) {
            return Err(DispatchError::Transport(format!("rank {} is not a member of group {}", self.rank, color)));
        }
        if let Some(outside) = members.iter().find(|member| **member >= self.transport.world_size()) {
            return Err(DispatchError::Transport(format!("group {} names rank {} outside the world", color, outside)));
        }

        Ok(Self {
            transport: self.transport.clone(),
            channel:   Channel::Province(color),
            rank:      self.rank,
            members:   Some(members.into())
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Global rank of the owner
    pub fn global_rank(&self) -> Rank {
        self.rank
    }

    /// Rank of the owner in this communicator's address space
    pub fn rank(&self) -> usize {
        self.to_local(self.rank).unwrap_or(self.rank)
    }

    pub fn size(&self) -> usize {
        match &self.members {
            Some(members) => members.len(),
            None => self.transport.world_size()
        }
    }

    fn to_global(&self, rank: usize) -> Result<Rank, DispatchError> {
        match &self.members {
            Some(members) => members
                .get(rank)
                .copied()
                .ok_or_else(|| DispatchError::Transport(format!("local rank {} is not in {:?}", rank, self.channel))),
            None => Ok(rank)
        }
    }

    fn to_local(&self, rank: Rank) -> Option<usize> {
        match &self.members {
            Some(members) => members.iter().position(|member| *member == rank),
            None => Some(rank)
        }
    }

    pub async fn send(&self, to: usize, payload: Payload) -> Result<(), DispatchError> {
        let to = self.to_global(to)?;
        self.transport.send(self.rank, to, self.channel, payload).await
    }

    pub async fn try_receive(&self, source: Source, topic: Topic) -> Result<Option<Envelope>, DispatchError> {
        let source = match source {
            Source::Any => Source::Any,
            Source::Rank(local) => Source::Rank(self.to_global(local)?)
        };

        let envelope = self.transport.try_receive(self.rank, self.channel, source, topic).await?;
        Ok(envelope.map(|mut envelope| {
            if let Some(local) = self.to_local(envelope.source) {
                envelope.source = local;
            }
            envelope
        }))
    }

    /// Drain every pending message on `topic` from `source`
    pub async fn drain(&self, source: Source, topic: Topic) -> Result<Vec<Envelope>, DispatchError> {
        let mut drained = Vec::new();
        while let Some(envelope) = self.try_receive(source, topic).await? {
            drained.push(envelope);
        }
        Ok(drained)
    }
}
