use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use contracts::Envelope;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{BusError, MessageBus, Result, Subscription};

#[derive(Debug)]
struct Member {
    topics: HashSet<String>,
    sender: mpsc::UnboundedSender<Envelope>,
}

#[derive(Debug, Default)]
struct Group {
    members: Vec<Member>,
    next: usize,
}

impl Group {
    /// Hands the envelope to one live member subscribed to its topic, round-robin.
    fn deliver(&mut self, envelope: &Envelope) {
        self.members.retain(|m| !m.sender.is_closed());

        let eligible: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.topics.contains(&envelope.topic))
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            return;
        }

        let index = eligible[self.next % eligible.len()];
        self.next = self.next.wrapping_add(1);
        let _ = self.members[index].sender.send(envelope.clone());
    }
}

/// How many published envelopes [`InMemoryBus::new`] keeps for inspection.
pub const DEFAULT_CAPTURE_LIMIT: usize = 1024;

#[derive(Debug)]
struct InMemoryBusState {
    groups: HashMap<String, Group>,
    published: VecDeque<Envelope>,
    capture_limit: usize,
    fail_on_publish: bool,
}

impl Default for InMemoryBusState {
    fn default() -> Self {
        Self {
            groups: HashMap::new(),
            published: VecDeque::new(),
            capture_limit: DEFAULT_CAPTURE_LIMIT,
            fail_on_publish: false,
        }
    }
}

/// In-memory bus with consumer-group semantics.
///
/// Every group subscribed to a topic receives each message once; within a
/// group, messages are spread round-robin over its subscriptions. As with a
/// broker reading from the latest offset, a group only sees messages
/// published after it subscribed.
///
/// The most recent publishes are kept for inspection, up to a capture limit;
/// older ones are discarded.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<InMemoryBusState>>,
}

impl InMemoryBus {
    /// Creates a new empty bus keeping the last [`DEFAULT_CAPTURE_LIMIT`] publishes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus keeping at most `limit` published envelopes.
    ///
    /// A long-running process that never inspects the log should pass 0.
    pub fn with_capture_limit(limit: usize) -> Self {
        let bus = Self::default();
        bus.state().capture_limit = limit;
        bus
    }

    fn state(&self) -> MutexGuard<'_, InMemoryBusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configures the bus to fail every publish.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.state().fail_on_publish = fail;
    }

    /// Returns the captured published envelopes, in publish order.
    pub fn published(&self) -> Vec<Envelope> {
        self.state().published.iter().cloned().collect()
    }

    /// Returns the envelopes published to one topic.
    pub fn published_on(&self, topic: &str) -> Vec<Envelope> {
        self.state()
            .published
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Returns the number of captured published envelopes.
    pub fn published_count(&self) -> usize {
        self.state().published.len()
    }

    /// Forgets the publish log.
    pub fn clear_published(&self) {
        self.state().published.clear();
    }

    /// Drops every subscription's sender. Pending messages are still received,
    /// after which subscriptions report [`BusError::Closed`].
    pub fn close(&self) {
        self.state().groups.clear();
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(topic = %envelope.topic))]
    async fn publish_envelope(&self, envelope: Envelope) -> Result<()> {
        let mut state = self.state();

        if state.fail_on_publish {
            return Err(BusError::Publish {
                topic: envelope.topic,
                reason: "publish failure injected".to_string(),
            });
        }

        for group in state.groups.values_mut() {
            group.deliver(&envelope);
        }

        debug!(event_type = ?envelope.event_tag(), "published to in-memory bus");
        metrics::counter!("bus_messages_published_total").increment(1);
        if state.capture_limit > 0 {
            if state.published.len() == state.capture_limit {
                state.published.pop_front();
            }
            state.published.push_back(envelope);
        }

        Ok(())
    }

    async fn subscribe(&self, topics: &[String], group_id: &str) -> Result<Box<dyn Subscription>> {
        if topics.is_empty() {
            return Err(BusError::Subscribe("no topics given".to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.state()
            .groups
            .entry(group_id.to_string())
            .or_default()
            .members
            .push(Member {
                topics: topics.iter().cloned().collect(),
                sender,
            });

        debug!(?topics, group_id, "subscribed to in-memory bus");
        Ok(Box::new(InMemorySubscription { receiver }))
    }
}

/// Receive side of an [`InMemoryBus`] subscription.
#[derive(Debug)]
pub struct InMemorySubscription {
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn recv(&mut self, timeout: Duration) -> Result<Envelope> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Err(_) => Err(BusError::Timeout),
            Ok(None) => Err(BusError::Closed),
            Ok(Some(envelope)) => Ok(envelope),
        }
    }
}
