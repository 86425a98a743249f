// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Death notification types.
//!
//! Recipients are registered on a proxy and held weakly; a registration
//! whose recipient has already been dropped is skipped silently at delivery
//! time. Delivery order is registration order.

use std::sync::{Arc, Weak};

use crate::proxy::WeakProxy;

/// Observer of a remote object's death.
///
/// The callback runs with no proxy lock held and may call back into the
/// same proxy.
pub trait DeathRecipient: Send + Sync {
    /// Invoked once when the remote object backing `who` has died.
    fn remote_died(&self, who: &WeakProxy);
}

pub(crate) struct Obituary {
    pub(crate) recipient: Weak<dyn DeathRecipient>,
    pub(crate) cookie: usize,
    pub(crate) flags: u32,
}

impl Obituary {
    /// Unlink matching rule: flags must be equal, and either the recipients
    /// are the same registration, or no recipient was supplied and the
    /// cookies are equal.
    pub(crate) fn matches(
        &self,
        recipient: Option<&Arc<dyn DeathRecipient>>,
        cookie: usize,
        flags: u32,
    ) -> bool {
        if self.flags != flags {
            return false;
        }
        match recipient {
            Some(candidate) => {
                std::ptr::addr_eq(self.recipient.as_ptr(), Arc::as_ptr(candidate))
            }
            None => self.cookie == cookie,
        }
    }
}
