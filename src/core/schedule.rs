//! One-shot timers that post a message back to an actor.

use std::time::Duration;

use kameo::prelude::{Actor, ActorRef, Message as KameoMessage};
use tokio::task::JoinHandle;

/// Handle to a pending timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Deliver `msg` to `actor_ref` after `delay`.
///
/// The timer only holds a weak reference, so a pending timer never keeps its actor alive. A
/// timer that already fired may still have its message queued after cancellation; receivers tag
/// timer messages with a generation to discard such stragglers.
pub fn schedule_tell<A, M>(actor_ref: &ActorRef<A>, delay: Duration, msg: M) -> ScheduledTask
where
    A: Actor + KameoMessage<M>,
    M: Send + 'static,
{
    let weak = actor_ref.downgrade();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(actor_ref) = weak.upgrade() {
            let _ = actor_ref.tell(msg).send().await;
        }
    });
    ScheduledTask { handle }
}
