//! In-flight sends keyed by client token.
//!
//! A send leaves `Pending` exactly once: confirmed by whichever of the live
//! ack, the durable write or an echo of the stored row answers first, or
//! failed when the durable retry loop gives up. Settling a token removes it,
//! so late answers are no-ops.

use std::collections::HashMap;

use shared::domain::ClientToken;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPath {
    /// Ack on the live channel.
    Live,
    /// Response to the durable write.
    Durable,
    /// The stored row showed up through a push or a fetch.
    Echo,
}

#[derive(Default)]
pub struct PendingSends {
    inflight: HashMap<ClientToken, Option<JoinHandle<()>>>,
}

impl PendingSends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a send. Returns false if the token is already in flight.
    pub fn begin(&mut self, token: ClientToken) -> bool {
        if self.inflight.contains_key(&token) {
            return false;
        }
        self.inflight.insert(token, None);
        true
    }

    /// Hands over the durable retry task so a live confirmation can cancel it.
    /// A task for a token that already settled is aborted right away.
    pub fn attach_retry(&mut self, token: &ClientToken, task: JoinHandle<()>) {
        match self.inflight.get_mut(token) {
            Some(slot) => *slot = Some(task),
            None => task.abort(),
        }
    }

    /// Settles the send as confirmed. Returns true for the first confirmation
    /// only. Any confirmation not coming from the durable write itself cancels
    /// the durable retry loop.
    pub fn confirm(&mut self, token: &ClientToken, path: SendPath) -> bool {
        let Some(task) = self.inflight.remove(token) else {
            return false;
        };
        if path != SendPath::Durable {
            if let Some(task) = task {
                task.abort();
            }
        }
        true
    }

    /// Settles the send as failed. Returns false if it already settled.
    pub fn fail(&mut self, token: &ClientToken) -> bool {
        self.inflight.remove(token).is_some()
    }

    #[cfg(test)]
    pub fn contains(&self, token: &ClientToken) -> bool {
        self.inflight.contains_key(token)
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inflight.len()
    }
}

#[cfg(test)]
#[path = "tests/pending_tests.rs"]
mod tests;
