//! Admission predicates.

use parking_lot::Mutex;
use shard_event_system::Message;
use std::sync::Arc;

/// Decides whether a not-yet-bound client belongs to a context, based on the
/// first message it sent.
///
/// Any `Fn(&dyn Message) -> bool` closure is a verifier.
pub trait ClientVerifier: Send + Sync {
    fn verify(&self, message: &dyn Message) -> bool;
}

impl<F> ClientVerifier for F
where
    F: Fn(&dyn Message) -> bool + Send + Sync,
{
    fn verify(&self, message: &dyn Message) -> bool {
        self(message)
    }
}

/// The two verifier lists of one context. One-shot verifiers are polled
/// first and retired after their single acceptance.
#[derive(Default)]
pub(crate) struct VerifierSet {
    lists: Mutex<Lists>,
}

#[derive(Default)]
struct Lists {
    one_shot: Vec<Arc<dyn ClientVerifier>>,
    persistent: Vec<Arc<dyn ClientVerifier>>,
}

impl VerifierSet {
    pub(crate) fn add(&self, verifier: Arc<dyn ClientVerifier>, persistent: bool) {
        let mut lists = self.lists.lock();
        if persistent {
            lists.persistent.push(verifier);
        } else {
            lists.one_shot.push(verifier);
        }
    }

    /// Clears the persistent list, and the one-shot list too unless
    /// `persistent_only` is set.
    pub(crate) fn clear(&self, persistent_only: bool) {
        let mut lists = self.lists.lock();
        lists.persistent.clear();
        if !persistent_only {
            lists.one_shot.clear();
        }
    }

    pub(crate) fn counts(&self) -> (usize, usize) {
        let lists = self.lists.lock();
        (lists.one_shot.len(), lists.persistent.len())
    }

    /// Polls one-shot verifiers in insertion order, then persistent ones.
    ///
    /// Predicates run on a snapshot so that a verifier may itself add
    /// verifiers. A winning one-shot verifier only counts if it is still
    /// listed when it gets retired.
    pub(crate) fn vote(&self, message: &dyn Message) -> bool {
        let (one_shot, persistent) = {
            let lists = self.lists.lock();
            (lists.one_shot.clone(), lists.persistent.clone())
        };

        for candidate in &one_shot {
            if !candidate.verify(message) {
                continue;
            }
            let mut lists = self.lists.lock();
            if let Some(index) = lists.one_shot.iter().position(|v| Arc::ptr_eq(v, candidate)) {
                lists.one_shot.remove(index);
                return true;
            }
        }

        persistent.iter().any(|verifier| verifier.verify(message))
    }
}
