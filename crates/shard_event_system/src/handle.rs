//! Identity registry: unique identifiers and invalidation-aware handles.
//!
//! A [`HandleRegistry`] exclusively owns the mapping from [`Uid`] to the managed
//! object. Everybody else holds [`Handle`] values, which are cheap to clone and
//! never keep the object alive on their own. Once a handle is invalidated,
//! every copy of it reports [`HandleError::InvalidHandle`] instead of handing
//! out a stale reference.

use dashmap::{mapref::entry::Entry, DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Opaque, globally unique identifier backed by a random (v4) UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub Uuid);

impl Uid {
    /// Mints a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Uid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised when dereferencing a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("Invalid handle: {0}")]
    InvalidHandle(Uid),
}

type Slots<T> = DashMap<Uid, Arc<T>>;

/// Concurrent mapping from [`Uid`] to a live object.
///
/// Registration and invalidation are atomic with respect to concurrent
/// lookups: a lookup either sees the whole mapping or none of it. Cloning the
/// registry shares the same underlying map.
pub struct HandleRegistry<T: ?Sized> {
    slots: Arc<Slots<T>>,
    /// Identifiers handed to a `register_cyclic` builder that is still running.
    reserved: Arc<DashSet<Uid>>,
}

impl<T: ?Sized + Send + Sync> HandleRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            reserved: Arc::new(DashSet::new()),
        }
    }

    /// Stores `object` under a freshly minted identifier and returns its handle.
    ///
    /// The vacant-entry check makes a duplicate v4 identifier impossible to
    /// store; in that (practically unreachable) case a new one is minted. An
    /// identifier reserved by a running [`register_cyclic`](Self::register_cyclic)
    /// counts as taken.
    pub fn register(&self, object: Arc<T>) -> Handle<T> {
        loop {
            let uid = Uid::new();
            match self.slots.entry(uid) {
                Entry::Vacant(slot) if !self.reserved.contains(&uid) => {
                    slot.insert(object);
                    return self.handle_for_uid(uid);
                }
                _ => continue,
            }
        }
    }

    /// Looks up the object behind `handle`.
    pub fn get(&self, handle: &Handle<T>) -> Result<Arc<T>, HandleError> {
        self.get_by_uid(handle.uid)
    }

    /// Looks up an object by its raw identifier.
    pub fn get_by_uid(&self, uid: Uid) -> Result<Arc<T>, HandleError> {
        self.slots
            .get(&uid)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(HandleError::InvalidHandle(uid))
    }

    /// Returns a handle for `uid` if it is currently registered.
    pub fn handle(&self, uid: Uid) -> Option<Handle<T>> {
        self.slots
            .contains_key(&uid)
            .then(|| self.handle_for_uid(uid))
    }

    /// Removes the mapping behind `handle`. Returns `true` if this call removed it;
    /// invalidating an already-invalid handle is a no-op.
    pub fn invalidate(&self, handle: &Handle<T>) -> bool {
        self.slots.remove(&handle.uid).is_some()
    }

    /// Whether `handle` still refers to a live object in this registry.
    pub fn contains(&self, handle: &Handle<T>) -> bool {
        self.slots.contains_key(&handle.uid)
    }

    /// Handles for every live object, in no particular order.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.slots
            .iter()
            .map(|entry| self.handle_for_uid(*entry.key()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn handle_for_uid(&self, uid: Uid) -> Handle<T> {
        Handle {
            uid,
            slots: Arc::downgrade(&self.slots),
        }
    }
}

impl<T: Send + Sync> HandleRegistry<T> {
    /// Registers an object that needs to know its own handle at construction.
    ///
    /// The identifier is reserved before `build` runs, so neither [`register`](Self::register)
    /// nor another cyclic registration can claim it in the meantime. `build`
    /// runs without any registry lock held and may freely use other
    /// registries. Until it returns, the handle it receives does not resolve.
    pub fn register_cyclic<F>(&self, build: F) -> (Handle<T>, Arc<T>)
    where
        F: FnOnce(Handle<T>) -> T,
    {
        let uid = self.reserve();
        let handle = self.handle_for_uid(uid);
        let object = Arc::new(build(handle.clone()));
        self.slots.insert(uid, Arc::clone(&object));
        self.reserved.remove(&uid);
        (handle, object)
    }

    /// Claims an identifier that is neither live nor reserved.
    ///
    /// The reservation is published before the live map is checked, while
    /// `register` checks the reservations under the live entry's lock, so the
    /// two can never settle on the same identifier.
    fn reserve(&self) -> Uid {
        loop {
            let uid = Uid::new();
            if !self.reserved.insert(uid) {
                continue;
            }
            if self.slots.contains_key(&uid) {
                self.reserved.remove(&uid);
                continue;
            }
            return uid;
        }
    }

    #[cfg(test)]
    fn is_reserved(&self, uid: Uid) -> bool {
        self.reserved.contains(&uid)
    }
}

impl<T: ?Sized + Send + Sync> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for HandleRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            reserved: Arc::clone(&self.reserved),
        }
    }
}

impl<T: ?Sized> fmt::Debug for HandleRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("live", &self.slots.len())
            .finish()
    }
}

/// Indirect, invalidation-aware reference to a registry-managed object.
///
/// A handle only holds the identifier and a weak pointer to the registry map,
/// so holding one never extends the lifetime of the object or the registry.
pub struct Handle<T: ?Sized> {
    uid: Uid,
    slots: Weak<Slots<T>>,
}

impl<T: ?Sized + Send + Sync> Handle<T> {
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Resolves the handle, failing with [`HandleError::InvalidHandle`] once it
    /// has been invalidated or its registry is gone.
    pub fn get(&self) -> Result<Arc<T>, HandleError> {
        self.slots
            .upgrade()
            .and_then(|slots| slots.get(&self.uid).map(|entry| Arc::clone(entry.value())))
            .ok_or(HandleError::InvalidHandle(self.uid))
    }

    /// Invalidates the handle and every copy of it. Idempotent.
    pub fn invalidate(&self) -> bool {
        self.slots
            .upgrade()
            .map(|slots| slots.remove(&self.uid).is_some())
            .unwrap_or(false)
    }

    pub fn is_valid(&self) -> bool {
        self.slots
            .upgrade()
            .map(|slots| slots.contains_key(&self.uid))
            .unwrap_or(false)
    }
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            uid: self.uid,
            slots: Weak::clone(&self.slots),
        }
    }
}

impl<T: ?Sized> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl<T: ?Sized> Eq for Handle<T> {}

impl<T: ?Sized> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.uid)
    }
}
