use async_trait::async_trait;

use crate::error::ReverieError;

/// Destination for a message delivered out-of-band: scheduled nudges, task
/// results, proactive check-ins, morning digests. Concrete adapters (chat
/// platforms, push services) live outside this crate and implement this
/// trait; the scheduler and proactive evaluator only ever see the trait
/// object.
#[async_trait]
pub trait ChannelTriggerSource: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`).
    fn name(&self) -> &str;

    /// Deliver a single message to a user. `&self` deliberately — a
    /// connected adapter sends concurrently without a mutable borrow.
    async fn deliver(&self, user_id: &str, message: &str) -> Result<(), ReverieError>;
}
