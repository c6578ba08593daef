/// Subscriber fan-out over per-subscriber bounded channels
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{SyncEvent, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// What a subscription listens to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Events about one file
    Path(String),
    /// Events addressed to one user: presence, their conflicts, commits
    User(UserId),
}

/// Receiving end of a delivery channel
///
/// A slow receiver only loses its own events; publishing never waits on it.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    rx: mpsc::Receiver<SyncEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Next event, or `None` once the subscription was removed
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        self.rx.try_recv().ok()
    }
}

struct Subscriber {
    id: SubscriptionId,
    owner: UserId,
    tx: mpsc::Sender<SyncEvent>,
}

/// Outcome of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Events dropped because a subscriber's buffer was full
    pub dropped: usize,
}

impl Delivery {
    fn merge(&mut self, other: Delivery) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
    }
}

/// Path and user subscriber sets, owned by the coordinator
pub struct SubscriberRegistry {
    buffer: usize,
    next_id: u64,
    paths: HashMap<String, Vec<Subscriber>>,
    users: HashMap<UserId, Subscriber>,
}

impl SubscriberRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            next_id: 0,
            paths: HashMap::new(),
            users: HashMap::new(),
        }
    }

    fn channel(&mut self, owner: &UserId) -> (Subscriber, SubscriptionId, mpsc::Receiver<SyncEvent>) {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let (tx, rx) = mpsc::channel(self.buffer);
        (
            Subscriber {
                id,
                owner: owner.clone(),
                tx,
            },
            id,
            rx,
        )
    }

    pub fn subscribe_path(&mut self, owner: &UserId, path: &str) -> Subscription {
        let (subscriber, id, rx) = self.channel(owner);
        self.paths
            .entry(path.to_string())
            .or_default()
            .push(subscriber);

        debug!("User {} subscribed to {} ({:?})", owner, path, id);
        Subscription {
            id,
            topic: Topic::Path(path.to_string()),
            rx,
        }
    }

    /// The user's personal channel; replaces any previous one
    pub fn register_user(&mut self, user_id: &UserId) -> Subscription {
        let (subscriber, id, rx) = self.channel(user_id);
        self.users.insert(user_id.clone(), subscriber);
        Subscription {
            id,
            topic: Topic::User(user_id.clone()),
            rx,
        }
    }

    pub fn unsubscribe(&mut self, path: &str, id: SubscriptionId) -> bool {
        let Some(subscribers) = self.paths.get_mut(path) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        let removed = subscribers.len() != before;

        if subscribers.is_empty() {
            self.paths.remove(path);
        }
        removed
    }

    /// Drop the user's personal channel and every path subscription they own
    pub fn remove_user(&mut self, user_id: &UserId) -> usize {
        let mut removed = usize::from(self.users.remove(user_id).is_some());

        for subscribers in self.paths.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|s| &s.owner != user_id);
            removed += before - subscribers.len();
        }
        self.paths.retain(|_, subscribers| !subscribers.is_empty());

        removed
    }

    pub fn path_subscriber_count(&self, path: &str) -> usize {
        self.paths.get(path).map(Vec::len).unwrap_or(0)
    }

    pub fn has_user(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn publish_path(&mut self, path: &str, event: &SyncEvent) -> Delivery {
        let mut delivery = Delivery::default();

        if let Some(subscribers) = self.paths.get_mut(path) {
            subscribers.retain(|s| offer(s, event, &mut delivery));
            if subscribers.is_empty() {
                self.paths.remove(path);
            }
        }

        delivery
    }

    pub fn publish_user(&mut self, user_id: &UserId, event: &SyncEvent) -> Delivery {
        let mut delivery = Delivery::default();

        let closed = match self.users.get(user_id) {
            Some(subscriber) => !offer(subscriber, event, &mut delivery),
            None => false,
        };
        if closed {
            self.users.remove(user_id);
        }

        delivery
    }

    /// Send to every personal channel except `exclude`
    pub fn publish_all_users(&mut self, event: &SyncEvent, exclude: Option<&UserId>) -> Delivery {
        let mut delivery = Delivery::default();
        let recipients: Vec<UserId> = self
            .users
            .keys()
            .filter(|u| Some(*u) != exclude)
            .cloned()
            .collect();

        for user_id in recipients {
            delivery.merge(self.publish_user(&user_id, event));
        }
        delivery
    }
}

/// Non-blocking send; returns false if the subscriber is gone
fn offer(subscriber: &Subscriber, event: &SyncEvent, delivery: &mut Delivery) -> bool {
    match subscriber.tx.try_send(event.clone()) {
        Ok(()) => {
            delivery.delivered += 1;
            true
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(
                "Subscriber {:?} of {} is lagging, dropping {} event",
                subscriber.id,
                subscriber.owner,
                event.event_type()
            );
            delivery.dropped += 1;
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Pruning closed subscriber {:?}", subscriber.id);
            false
        }
    }
}
