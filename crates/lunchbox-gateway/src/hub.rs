use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use lunchbox_types::events::{ChannelTarget, Notification};

use crate::publisher::{DeliveryError, Publisher};

pub type ConnectionId = Uuid;

/// Capacity of the global broadcast channel.
const GLOBAL_CHANNEL_CAPACITY: usize = 1024;

/// Tracks every live gateway connection and what it is subscribed to.
///
/// Global notifications go out on one broadcast channel every connection
/// listens to. Personal and round-scoped notifications are pushed into the
/// per-connection queue of each matching connection. A user may hold several
/// connections at once; each one receives their personal notifications.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    global_tx: broadcast::Sender<Notification>,
    state: RwLock<HubState>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    by_user: HashMap<String, HashSet<ConnectionId>>,
    by_round: HashMap<Uuid, HashSet<ConnectionId>>,
}

struct ConnectionEntry {
    user_id: String,
    tx: mpsc::UnboundedSender<Notification>,
    rounds: HashSet<Uuid>,
}

impl Hub {
    pub fn new() -> Self {
        let (global_tx, _) = broadcast::channel(GLOBAL_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                global_tx,
                state: RwLock::new(HubState::default()),
            }),
        }
    }

    /// Receiver for global notifications.
    pub fn subscribe_global(&self) -> broadcast::Receiver<Notification> {
        self.inner.global_tx.subscribe()
    }

    /// Register a connection for `user_id`. Returns its id and the queue of
    /// personal and round-scoped notifications addressed to it.
    pub fn register(&self, user_id: &str) -> (ConnectionId, mpsc::UnboundedReceiver<Notification>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.inner.write();
        state.connections.insert(
            conn_id,
            ConnectionEntry {
                user_id: user_id.to_string(),
                tx,
                rounds: HashSet::new(),
            },
        );
        state.by_user.entry(user_id.to_string()).or_default().insert(conn_id);

        debug!("Registered connection {} for {}", conn_id, user_id);
        (conn_id, rx)
    }

    /// Forget a connection and all of its round subscriptions.
    pub fn unregister(&self, conn_id: ConnectionId) {
        let mut state = self.inner.write();
        let Some(entry) = state.connections.remove(&conn_id) else {
            return;
        };

        if let Some(conns) = state.by_user.get_mut(&entry.user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                state.by_user.remove(&entry.user_id);
            }
        }
        for round_id in &entry.rounds {
            remove_round_subscriber(&mut state.by_round, *round_id, conn_id);
        }

        debug!("Unregistered connection {} for {}", conn_id, entry.user_id);
    }

    /// Subscribe a connection to a round. Subscribing is independent of
    /// being a participant of the round. Returns `false` for unknown
    /// connections.
    pub fn subscribe_round(&self, conn_id: ConnectionId, round_id: Uuid) -> bool {
        let mut state = self.inner.write();
        let Some(entry) = state.connections.get_mut(&conn_id) else {
            return false;
        };
        entry.rounds.insert(round_id);
        state.by_round.entry(round_id).or_default().insert(conn_id);
        true
    }

    pub fn unsubscribe_round(&self, conn_id: ConnectionId, round_id: Uuid) {
        let mut state = self.inner.write();
        if let Some(entry) = state.connections.get_mut(&conn_id) {
            entry.rounds.remove(&round_id);
        }
        remove_round_subscriber(&mut state.by_round, round_id, conn_id);
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().connections.len()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.read().by_user.contains_key(user_id)
    }

    pub fn round_subscriber_count(&self, round_id: Uuid) -> usize {
        self.inner
            .read()
            .by_round
            .get(&round_id)
            .map_or(0, HashSet::len)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for Hub {
    fn publish(&self, target: &ChannelTarget, notification: &Notification) -> Result<usize, DeliveryError> {
        let delivered = match target {
            ChannelTarget::Global => self.inner.global_tx.send(notification.clone()).unwrap_or(0),
            ChannelTarget::Personal { user_id } => {
                let state = self.inner.read();
                send_to(state.by_user.get(user_id), &state.connections, notification)
            }
            ChannelTarget::Round { round_id } => {
                let state = self.inner.read();
                send_to(state.by_round.get(round_id), &state.connections, notification)
            }
        };

        if delivered == 0 {
            return Err(DeliveryError::NoSubscribers(target.address()));
        }
        Ok(delivered)
    }
}

impl HubInner {
    // Every critical section is a handful of map operations with no await
    // inside, so a poisoned lock still holds consistent maps.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HubState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HubState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn send_to(
    conn_ids: Option<&HashSet<ConnectionId>>,
    connections: &HashMap<ConnectionId, ConnectionEntry>,
    notification: &Notification,
) -> usize {
    let mut delivered = 0;
    for entry in conn_ids.into_iter().flatten().filter_map(|id| connections.get(id)) {
        // A closed queue means the connection is on its way out
        if entry.tx.send(notification.clone()).is_ok() {
            delivered += 1;
        }
    }
    delivered
}

fn remove_round_subscriber(
    by_round: &mut HashMap<Uuid, HashSet<ConnectionId>>,
    round_id: Uuid,
    conn_id: ConnectionId,
) {
    if let Some(conns) = by_round.get_mut(&round_id) {
        conns.remove(&conn_id);
        if conns.is_empty() {
            by_round.remove(&round_id);
            info!("Round {} has no subscribers left", round_id);
        }
    }
}
