//! In-process transport
//!
//! Every `(rank, channel)` pair owns a FIFO mailbox. A probe scans the mailbox
//! for the oldest message matching the requested source and topic, so
//! per-sender order is kept while unrelated topics never block each other.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    domain::{
        error::DispatchError,
        protocol::{Channel, Envelope, Payload, Source, Topic},
        topology::Rank
    },
    port::transport::Transport
};

/// A message accepted by the transport, kept when recording is enabled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub from:    Rank,
    pub to:      Rank,
    pub channel: Channel,
    pub payload: Payload
}

pub struct InMemoryTransport {
    world_size: usize,
    /// Mailboxes stored by (destination, channel) -> queued envelopes
    mailboxes:  Arc<Mutex<HashMap<(Rank, Channel), VecDeque<Envelope>>>>,
    log:        Option<Arc<Mutex<Vec<SentRecord>>>>
}

impl InMemoryTransport {
    pub fn new(world_size: usize) -> Self {
        Self { world_size, mailboxes: Arc::new(Mutex::new(HashMap::new())), log: None }
    }

    /// Transport that also keeps a log of every accepted send
    pub fn recording(world_size: usize) -> Self {
        Self { log: Some(Arc::new(Mutex::new(Vec::new()))), ..Self::new(world_size) }
    }

    /// Sends accepted so far; empty unless built with [`InMemoryTransport::recording`]
    pub async fn sent(&self) -> Vec<SentRecord> {
        match &self.log {
            Some(log) => log.lock().await.clone(),
            None => Vec::new()
        }
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, from: Rank, to: Rank, channel: Channel, payload: Payload) -> Result<(), DispatchError> {
        if to >= self.world_size {
            return Err(DispatchError::Transport(format!(
                "rank {} cannot send {} to rank {}: world has {} ranks",
                from,
                payload.topic(),
                to,
                self.world_size
            )));
        }

        if let Some(log) = &self.log {
            log.lock().await.push(SentRecord { from, to, channel, payload: payload.clone() });
        }

        let mut mailboxes = self.mailboxes.lock().await;
        mailboxes.entry((to, channel)).or_default().push_back(Envelope { source: from, channel, payload });

        Ok(())
    }

    async fn try_receive(
        &self,
        me: Rank,
        channel: Channel,
        source: Source,
        topic: Topic
    ) -> Result<Option<Envelope>, DispatchError> {
        let mut mailboxes = self.mailboxes.lock().await;

        let Some(mailbox) = mailboxes.get_mut(&(me, channel)) else {
            return Ok(None);
        };

        let position =
            mailbox.iter().position(|envelope| envelope.topic() == topic && source.matches(envelope.source));
        Ok(position.and_then(|index| mailbox.remove(index)))
    }

    fn world_size(&self) -> usize {
        self.world_size
    }
}
