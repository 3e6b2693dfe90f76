//! Test doubles shared by the orchestrator and handler tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use lunchbox_db::{Database, RoundRegistry};
use lunchbox_gateway::{DeliveryError, Dispatcher, Publisher};
use lunchbox_types::events::{ChannelTarget, Notification};

use crate::identity::{IdentityError, IdentityLookup, UserProfile};
use crate::orchestrator::RoundOrchestrator;

/// How a lookup for one particular user misbehaves.
#[derive(Clone, Copy)]
pub enum Fault {
    Down,
    Hang,
}

/// Fixed set of users, each with a display name and round-opening right.
/// Users registered with a fault break only their own lookups.
#[derive(Default)]
pub struct StaticIdentity {
    users: HashMap<String, (UserProfile, bool)>,
    faults: HashMap<String, Fault>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, id: &str, name: &str, may_open: bool) -> Self {
        let profile = UserProfile {
            id: id.to_string(),
            display_name: name.to_string(),
            email: None,
        };
        self.users.insert(id.to_string(), (profile, may_open));
        self
    }

    pub fn with_fault(mut self, id: &str, fault: Fault) -> Self {
        self.faults.insert(id.to_string(), fault);
        self
    }

    async fn check_fault(&self, user_id: &str) -> Result<(), IdentityError> {
        match self.faults.get(user_id) {
            Some(Fault::Down) => Err(IdentityError::Unavailable("connection refused".into())),
            Some(Fault::Hang) => std::future::pending().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl IdentityLookup for StaticIdentity {
    async fn may_open_round(&self, user_id: &str) -> Result<bool, IdentityError> {
        self.check_fault(user_id).await?;
        self.users
            .get(user_id)
            .map(|(_, may_open)| *may_open)
            .ok_or_else(|| IdentityError::NotFound(user_id.to_string()))
    }

    async fn get_user(&self, user_id: &str) -> Result<UserProfile, IdentityError> {
        self.check_fault(user_id).await?;
        self.users
            .get(user_id)
            .map(|(profile, _)| profile.clone())
            .ok_or_else(|| IdentityError::NotFound(user_id.to_string()))
    }
}

/// Never answers.
pub struct SlowIdentity;

#[async_trait]
impl IdentityLookup for SlowIdentity {
    async fn may_open_round(&self, _user_id: &str) -> Result<bool, IdentityError> {
        std::future::pending().await
    }

    async fn get_user(&self, _user_id: &str) -> Result<UserProfile, IdentityError> {
        std::future::pending().await
    }
}

/// Answers every call with an error.
pub struct DownIdentity;

#[async_trait]
impl IdentityLookup for DownIdentity {
    async fn may_open_round(&self, _user_id: &str) -> Result<bool, IdentityError> {
        Err(IdentityError::Unavailable("connection refused".into()))
    }

    async fn get_user(&self, _user_id: &str) -> Result<UserProfile, IdentityError> {
        Err(IdentityError::Unavailable("connection refused".into()))
    }
}

/// Records every publish and reports one receiver.
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(ChannelTarget, Notification)>>,
}

impl RecordingPublisher {
    /// Drain what has been published so far.
    pub fn take(&self) -> Vec<(ChannelTarget, Notification)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, target: &ChannelTarget, notification: &Notification) -> Result<usize, DeliveryError> {
        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), notification.clone()));
        Ok(1)
    }
}

/// Fails every publish.
pub struct FailingPublisher;

impl Publisher for FailingPublisher {
    fn publish(&self, target: &ChannelTarget, _notification: &Notification) -> Result<usize, DeliveryError> {
        Err(DeliveryError::Unavailable(format!("{} is down", target)))
    }
}

pub fn registry() -> RoundRegistry {
    RoundRegistry::new(Arc::new(Database::open_in_memory().unwrap()))
}

/// Orchestrator over an in-memory database with a recording publisher and a
/// fixed seed.
pub fn harness(identity: impl IdentityLookup + 'static) -> (RoundOrchestrator, Arc<RecordingPublisher>) {
    let sent = Arc::new(RecordingPublisher::default());
    let orchestrator =
        RoundOrchestrator::new(registry(), Arc::new(identity), Dispatcher::new(sent.clone())).with_seed(7);
    (orchestrator, sent)
}
