use thiserror::Error;

use lunchbox_types::events::{ChannelTarget, Notification};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Nobody is connected on the target right now. Nothing is kept for
    /// subscribers that connect later.
    #[error("no subscriber connected on {0}")]
    NoSubscribers(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Publish-to-topic capability of the live transport.
///
/// Implementations hand the notification to whoever is subscribed to the
/// target at this instant and return how many subscribers took it. They must
/// not wait on subscribers; no acknowledgement is expected.
pub trait Publisher: Send + Sync {
    fn publish(&self, target: &ChannelTarget, notification: &Notification) -> Result<usize, DeliveryError>;
}
