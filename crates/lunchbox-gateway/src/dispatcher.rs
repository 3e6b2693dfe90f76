use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, info, warn};

use lunchbox_types::events::{ChannelTarget, Notification};

use crate::publisher::{DeliveryError, Publisher};

/// What happened to one target of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub target: ChannelTarget,
    /// Number of subscribers that took the notification.
    pub result: Result<usize, DeliveryError>,
}

impl DeliveryOutcome {
    pub fn delivered(&self) -> usize {
        self.result.as_ref().copied().unwrap_or(0)
    }

    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Routes notifications to channel targets, fire-and-forget.
///
/// Every target of a dispatch is attempted on its own: a failure on one
/// target (nobody connected, a broken transport, even a panicking one) is
/// recorded in that target's outcome and the remaining targets are still
/// attempted. Nothing is retried and nothing is kept for later.
#[derive(Clone)]
pub struct Dispatcher {
    publisher: Arc<dyn Publisher>,
}

impl Dispatcher {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    /// Deliver `notification` to each target in order and report one
    /// outcome per target.
    pub fn dispatch(&self, notification: &Notification, targets: &[ChannelTarget]) -> Vec<DeliveryOutcome> {
        if targets.is_empty() {
            debug!("Dispatch of {} ({:?}) had no targets", notification.id, notification.kind);
        }
        targets
            .iter()
            .map(|target| self.deliver(notification, target))
            .collect()
    }

    pub fn dispatch_one(&self, notification: &Notification, target: ChannelTarget) -> DeliveryOutcome {
        self.deliver(notification, &target)
    }

    fn deliver(&self, notification: &Notification, target: &ChannelTarget) -> DeliveryOutcome {
        let addressed = address(notification, target);

        let result = catch_unwind(AssertUnwindSafe(|| self.publisher.publish(target, &addressed)))
            .unwrap_or_else(|_| Err(DeliveryError::Unavailable("publisher panicked".into())));

        match &result {
            Ok(receivers) => info!(
                "[{}] Sending {:?} - {} ({} receivers)",
                target, addressed.kind, addressed.message, receivers
            ),
            Err(e) => warn!("[{}] Dropped {:?} {}: {}", target, addressed.kind, addressed.id, e),
        }

        DeliveryOutcome {
            target: target.clone(),
            result,
        }
    }
}

/// Copy of `notification` stamped with the routable address of `target`.
fn address(notification: &Notification, target: &ChannelTarget) -> Notification {
    let mut addressed = notification.clone();
    addressed.channel = target.address();
    match target {
        ChannelTarget::Personal { user_id } => addressed.user_id = Some(user_id.clone()),
        ChannelTarget::Round { round_id } => addressed.round_id = Some(*round_id),
        ChannelTarget::Global => {}
    }
    addressed
}
