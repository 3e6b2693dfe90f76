use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};
use uuid::Uuid;

use lunchbox_db::RoundRegistry;
use lunchbox_gateway::Dispatcher;
use lunchbox_types::error::{Result, RoundError};
use lunchbox_types::events::{ChannelTarget, Notification, new_event_id};
use lunchbox_types::models::{NewProposal, Proposal, Round};

use crate::identity::{IdentityError, IdentityLookup};

pub const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_secs(2);

pub const MAX_LABEL_LEN: usize = 200;
pub const MAX_LOCATION_LEN: usize = 500;
pub const MAX_NOTE_LEN: usize = 1000;

/// Runs the round lifecycle: checks with the identity service, commits the
/// transition through the registry, then fans out notifications.
///
/// Notifications are only built from committed state. A failed operation
/// emits nothing, and a failed delivery never fails the operation.
pub struct RoundOrchestrator {
    registry: RoundRegistry,
    identity: Arc<dyn IdentityLookup>,
    dispatcher: Dispatcher,
    rng: Mutex<StdRng>,
    identity_timeout: Duration,
}

impl RoundOrchestrator {
    pub fn new(registry: RoundRegistry, identity: Arc<dyn IdentityLookup>, dispatcher: Dispatcher) -> Self {
        Self {
            registry,
            identity,
            dispatcher,
            rng: Mutex::new(StdRng::from_os_rng()),
            identity_timeout: DEFAULT_IDENTITY_TIMEOUT,
        }
    }

    /// Make winner selection reproducible.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn with_identity_timeout(self, identity_timeout: Duration) -> Self {
        Self {
            identity_timeout,
            ..self
        }
    }

    pub fn registry(&self) -> &RoundRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Open a round for `opener_id` and invite `invitee_ids`.
    ///
    /// Every invitee gets a personal invitation and a round-opened
    /// announcement goes out globally; all of them share one event id.
    pub async fn open_round(&self, opener_id: &str, invitee_ids: &[String]) -> Result<Round> {
        require_user_id(opener_id)?;
        if invitee_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(RoundError::Validation("Invitee ids must not be blank".into()));
        }

        if !self.ask_identity(self.identity.may_open_round(opener_id)).await? {
            return Err(RoundError::Unauthorized(
                "User is not authorized to open a round".into(),
            ));
        }
        let opener_name = self.ask_identity(self.identity.get_user(opener_id)).await?.display_name;
        let invitees = distinct_invitees(opener_id, invitee_ids);

        let dispatcher = self.dispatcher.clone();
        let round = self
            .registry
            .insert_then(Round::open(opener_id.to_string(), Utc::now()), move |round: &Round| {
                info!("Round {} opened by {}", round.id, round.opener_id);
                let event_id = new_event_id();
                for invitee in &invitees {
                    dispatcher.dispatch_one(
                        &Notification::invitation(&event_id, round.id, invitee, &opener_name),
                        ChannelTarget::personal(invitee.as_str()),
                    );
                }
                dispatcher.dispatch_one(
                    &Notification::round_opened(&event_id, round.id, &opener_name),
                    ChannelTarget::Global,
                );
            })
            .await?;

        Ok(Round::clone(&round))
    }

    /// Add `user_id` to the round. Joining twice is a no-op that emits
    /// nothing.
    pub async fn join_round(&self, round_id: Uuid, user_id: &str) -> Result<Round> {
        require_user_id(user_id)?;
        let current = self
            .registry
            .get(round_id)
            .ok_or_else(|| RoundError::round_not_found(round_id))?;

        // Only worth asking for a name when this call can actually add them
        let name = if current.is_open() && !current.is_participant(user_id) {
            self.display_name(user_id).await
        } else {
            user_id.to_string()
        };

        let dispatcher = self.dispatcher.clone();
        let joiner = user_id.to_string();
        let (round, _) = self
            .registry
            .mutate_then(
                round_id,
                |round| round.add_participant(user_id),
                move |round: &Round, joined: &bool| {
                    if !*joined {
                        return;
                    }
                    let count = round.participants.len();
                    info!("{} joined round {} ({} participants)", joiner, round.id, count);
                    dispatcher.dispatch_one(
                        &Notification::user_joined(&new_event_id(), round.id, &name, count),
                        ChannelTarget::round(round.id),
                    );
                },
            )
            .await?;

        Ok(Round::clone(&round))
    }

    /// Submit a proposal. Text fields are sanitized before validation and
    /// storage.
    pub async fn propose(&self, round_id: Uuid, proposal: NewProposal) -> Result<Proposal> {
        require_user_id(&proposal.submitted_by)?;
        let clean = sanitize_proposal(round_id, proposal)?;

        let current = self
            .registry
            .get(round_id)
            .ok_or_else(|| RoundError::round_not_found(round_id))?;
        current.ensure_can_propose(&clean.submitted_by)?;

        let submitter_name = self
            .ask_identity(self.identity.get_user(&clean.submitted_by))
            .await?
            .display_name;

        let dispatcher = self.dispatcher.clone();
        let (_, stored) = self
            .registry
            .mutate_then(
                round_id,
                move |round| round.add_proposal(clean).cloned(),
                move |round: &Round, stored: &Proposal| {
                    let total = round.proposals.len();
                    info!(
                        "{} proposed '{}' in round {} ({} total)",
                        stored.submitted_by, stored.label, round.id, total
                    );
                    dispatcher.dispatch_one(
                        &Notification::proposal_added(&new_event_id(), round.id, &submitter_name, &stored.label, total),
                        ChannelTarget::round(round.id),
                    );
                },
            )
            .await?;

        Ok(stored)
    }

    /// Close the round and pick a winner uniformly at random among its
    /// proposals. Only the opener may close.
    ///
    /// The outcome goes to the round's subscribers and to every participant
    /// personally, all under one event id.
    pub async fn close_round(&self, round_id: Uuid, user_id: &str) -> Result<Round> {
        let dispatcher = self.dispatcher.clone();
        let (round, _) = self
            .registry
            .mutate_then(
                round_id,
                |round| {
                    let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                    round
                        .close(user_id, Utc::now(), |n| rng.random_range(0..n))
                        .cloned()
                },
                move |round: &Round, selected: &Proposal| {
                    info!(
                        "Round {} closed by {}. Selected: {} ({})",
                        round.id, round.opener_id, selected.label, selected.id
                    );
                    let event_id = new_event_id();
                    let location = selected.location.as_deref();
                    dispatcher.dispatch_one(
                        &Notification::round_closed(&event_id, round.id, &selected.label, location),
                        ChannelTarget::round(round.id),
                    );
                    for participant in &round.participants {
                        dispatcher.dispatch_one(
                            &Notification::round_decided(&event_id, round.id, participant, &selected.label, location),
                            ChannelTarget::personal(participant.as_str()),
                        );
                    }
                },
            )
            .await?;

        Ok(Round::clone(&round))
    }

    /// Drop a round together with its proposals. Only the opener may
    /// delete; nothing is announced.
    pub async fn delete_round(&self, round_id: Uuid, user_id: &str) -> Result<()> {
        let round = self.get_round(round_id)?;
        if round.opener_id != user_id {
            return Err(RoundError::Unauthorized(
                "Only the round opener can delete the round".into(),
            ));
        }
        if !self.registry.remove(round_id).await? {
            return Err(RoundError::round_not_found(round_id));
        }
        info!("Round {} deleted by {}", round_id, user_id);
        Ok(())
    }

    pub fn get_round(&self, round_id: Uuid) -> Result<Arc<Round>> {
        self.registry
            .get(round_id)
            .ok_or_else(|| RoundError::round_not_found(round_id))
    }

    pub fn list_open_rounds(&self) -> Vec<Arc<Round>> {
        self.registry.list_open()
    }

    pub fn list_proposals(&self, round_id: Uuid) -> Result<Vec<Proposal>> {
        Ok(self.get_round(round_id)?.proposals.clone())
    }

    /// Call the identity service with the configured deadline. A slow or
    /// broken service fails the operation instead of stalling it.
    async fn ask_identity<T>(&self, call: impl Future<Output = std::result::Result<T, IdentityError>>) -> Result<T> {
        match tokio::time::timeout(self.identity_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(IdentityError::NotFound(user_id))) => {
                Err(RoundError::NotFound(format!("User not found: {}", user_id)))
            }
            Ok(Err(IdentityError::Unavailable(reason))) => {
                warn!("Identity service unavailable: {}", reason);
                Err(RoundError::UpstreamUnavailable(
                    "Unable to verify user right now".into(),
                ))
            }
            Err(_) => {
                warn!("Identity service timed out after {:?}", self.identity_timeout);
                Err(RoundError::UpstreamUnavailable(format!(
                    "Identity service did not answer within {}ms",
                    self.identity_timeout.as_millis()
                )))
            }
        }
    }

    /// Best-effort display name; falls back to the raw id.
    async fn display_name(&self, user_id: &str) -> String {
        match self.ask_identity(self.identity.get_user(user_id)).await {
            Ok(profile) => profile.display_name,
            Err(e) => {
                warn!("Using raw id for {}: {}", user_id, e);
                user_id.to_string()
            }
        }
    }
}

/// Invitees in request order, without repeats or the opener.
fn distinct_invitees(opener_id: &str, invitee_ids: &[String]) -> Vec<String> {
    let mut invitees: Vec<String> = Vec::with_capacity(invitee_ids.len());
    for invitee in invitee_ids {
        if invitee != opener_id && !invitees.contains(invitee) {
            invitees.push(invitee.clone());
        }
    }
    invitees
}

fn require_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(RoundError::Validation("User id is required".into()));
    }
    Ok(())
}

/// Strip markup-significant characters and surrounding whitespace.
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\''))
        .collect::<String>()
        .trim()
        .to_string()
}

fn sanitize_optional(input: Option<String>, field: &str, max: usize) -> Result<Option<String>> {
    let Some(raw) = input else {
        return Ok(None);
    };
    let clean = sanitize(&raw);
    if clean.is_empty() {
        return Ok(None);
    }
    check_len(&clean, field, max)?;
    Ok(Some(clean))
}

fn check_len(value: &str, field: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(RoundError::Validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(())
}

fn sanitize_proposal(round_id: Uuid, input: NewProposal) -> Result<Proposal> {
    let label = sanitize(&input.label);
    if label.is_empty() {
        return Err(RoundError::Validation("Label is required".into()));
    }
    check_len(&label, "Label", MAX_LABEL_LEN)?;

    Ok(Proposal {
        id: Uuid::new_v4(),
        round_id,
        label,
        location: sanitize_optional(input.location, "Location", MAX_LOCATION_LEN)?,
        note: sanitize_optional(input.note, "Note", MAX_NOTE_LEN)?,
        submitted_by: input.submitted_by,
    })
}
