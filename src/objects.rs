// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-proxy table of user-attached objects.
//!
//! Keys are opaque word-sized identities supplied by callers and compared
//! only for equality. The table never owns the attached values; it
//! guarantees each entry's cleanup callback runs exactly once, at table
//! teardown. Weak slots back the lookup-or-create pattern used by interface
//! caches.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use log::{debug, info, warn};

/// Opaque identity of an attached object. Callers typically derive it from
/// the address of a static.
pub type ObjectId = usize;

/// Shared, type-erased attached value.
pub type AttachedValue = Arc<dyn Any + Send + Sync>;

/// Callback invoked exactly once when an entry is torn down with the proxy,
/// receiving the id, the value, and the cookie supplied at attach time.
pub type CleanupFn = Box<dyn FnOnce(ObjectId, AttachedValue, usize) + Send>;

enum Slot {
    Value(AttachedValue),
    WeakRef(Weak<dyn Any + Send + Sync>),
}

struct Entry {
    slot: Slot,
    cookie: usize,
    cleanup: Option<CleanupFn>,
}

impl Entry {
    fn value(&self) -> Option<AttachedValue> {
        match &self.slot {
            Slot::Value(value) => Some(value.clone()),
            Slot::WeakRef(weak) => weak.upgrade(),
        }
    }
}

#[derive(Default)]
pub(crate) struct ObjectTable {
    entries: HashMap<ObjectId, Entry>,
}

impl ObjectTable {
    /// First-writer-wins insert. An occupied id keeps its incumbent, which
    /// is returned instead of installing `value`.
    pub(crate) fn attach(
        &mut self,
        id: ObjectId,
        value: AttachedValue,
        cookie: usize,
        cleanup: Option<CleanupFn>,
    ) -> Option<AttachedValue> {
        if let Some(existing) = self.entries.get(&id) {
            info!("object id {id:#x} already attached, keeping the incumbent");
            return existing.value();
        }
        self.entries.insert(id, Entry { slot: Slot::Value(value), cookie, cleanup });
        None
    }

    pub(crate) fn find(&self, id: ObjectId) -> Option<AttachedValue> {
        self.entries.get(&id).and_then(Entry::value)
    }

    /// Removes the entry without running its cleanup.
    pub(crate) fn detach(&mut self, id: ObjectId) -> Option<AttachedValue> {
        let entry = self.entries.remove(&id)?;
        entry.value()
    }

    /// Promotes the weak slot at `id`, or fills it with a fresh object from
    /// `make`. The slot keeps only a weak reference; once every strong
    /// reference returned to callers is gone, a later call re-invokes `make`.
    pub(crate) fn lookup_or_create_weak<F>(&mut self, id: ObjectId, make: F) -> AttachedValue
    where
        F: FnOnce() -> AttachedValue,
    {
        match self.entries.get(&id) {
            Some(Entry { slot: Slot::WeakRef(weak), .. }) => {
                if let Some(live) = weak.upgrade() {
                    return live;
                }
            }
            Some(_) => {
                warn!("weak slot id {id:#x} collides with an attached object, result not retained");
                return make();
            }
            None => {}
        }
        let fresh = make();
        self.entries.insert(
            id,
            Entry { slot: Slot::WeakRef(Arc::downgrade(&fresh)), cookie: 0, cleanup: None },
        );
        fresh
    }

    fn kill(&mut self) {
        if !self.entries.is_empty() {
            debug!("tearing down {} attached objects", self.entries.len());
        }
        for (id, entry) in self.entries.drain() {
            let Entry { slot, cookie, cleanup } = entry;
            if let (Slot::Value(value), Some(cleanup)) = (slot, cleanup) {
                cleanup(id, value, cookie);
            }
        }
    }
}

impl Drop for ObjectTable {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn value_of(n: u32) -> AttachedValue {
        Arc::new(n)
    }

    fn as_u32(value: &AttachedValue) -> u32 {
        *value.downcast_ref::<u32>().unwrap()
    }

    #[test]
    fn attach_is_first_writer_wins() {
        let mut table = ObjectTable::default();
        assert!(table.attach(1, value_of(10), 0, None).is_none());
        let incumbent = table.attach(1, value_of(20), 0, None).unwrap();
        assert_eq!(as_u32(&incumbent), 10);
        assert_eq!(as_u32(&table.find(1).unwrap()), 10);
    }

    #[test]
    fn detach_skips_cleanup() {
        let ran = Arc::new(AtomicUsize::new(0));
        let observed = ran.clone();
        let mut table = ObjectTable::default();
        table.attach(
            7,
            value_of(1),
            0,
            Some(Box::new(move |_, _, _| {
                observed.fetch_add(1, Ordering::SeqCst);
            })),
        );
        assert!(table.detach(7).is_some());
        drop(table);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cleanup_runs_exactly_once_with_attach_arguments() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut table = ObjectTable::default();
        table.attach(
            3,
            value_of(42),
            99,
            Some(Box::new(move |id, value, cookie| {
                sink.lock().push((id, as_u32(&value), cookie));
            })),
        );
        drop(table);
        assert_eq!(seen.lock().as_slice(), &[(3, 42, 99)]);
    }

    #[test]
    fn weak_slot_promotes_then_remakes_after_release() {
        let makes = AtomicUsize::new(0);
        let mut table = ObjectTable::default();

        let first = table.lookup_or_create_weak(5, || {
            makes.fetch_add(1, Ordering::SeqCst);
            value_of(1)
        });
        let second = table.lookup_or_create_weak(5, || {
            makes.fetch_add(1, Ordering::SeqCst);
            value_of(2)
        });
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(makes.load(Ordering::SeqCst), 1);

        drop(first);
        drop(second);
        let third = table.lookup_or_create_weak(5, || {
            makes.fetch_add(1, Ordering::SeqCst);
            value_of(3)
        });
        assert_eq!(as_u32(&third), 3);
        assert_eq!(makes.load(Ordering::SeqCst), 2);
    }
}
