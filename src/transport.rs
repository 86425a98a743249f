// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transport contracts consumed by the proxy core.
//!
//! Two backends exist: the kernel IPC driver, addressed by integer handles
//! through a per-thread command executor, and user-space RPC sessions,
//! addressed by a 64-bit address within a shared session. The proxy never
//! implements either; it only dispatches through these traits.

use crate::parcel::Parcel;
use crate::proxy::WeakProxy;
use crate::status::Result;

/// Kernel IPC driver wrapper, the per-thread transaction executor.
///
/// Reference-count and death-subscription calls may be queued; [`Driver::flush`]
/// pushes queued commands to the driver. [`Driver::transact`] is a synchronous
/// round trip. Implementations receive weak proxy references for death
/// subscriptions and may hold clones of them, but must not call back into the
/// proxy synchronously from any of these methods.
pub trait Driver: Send + Sync {
    /// Performs a transaction round trip against `handle`.
    fn transact(
        &self,
        handle: u32,
        code: u32,
        data: &Parcel,
        reply: &mut Parcel,
        flags: u32,
    ) -> Result;

    /// Tells the driver the process holds a strong reference on `handle`.
    fn inc_strong(&self, handle: u32);

    /// Releases the process's strong reference on `handle`.
    fn dec_strong(&self, handle: u32);

    /// Tells the driver the process holds a weak reference on `handle`.
    fn inc_weak(&self, handle: u32);

    /// Releases the process's weak reference on `handle`.
    fn dec_weak(&self, handle: u32);

    /// Asks whether a strong reference on `handle` can still be acquired
    /// from a weak one.
    fn attempt_inc_strong(&self, handle: u32) -> Result;

    /// Subscribes `who` for a death notification on `handle`.
    fn request_death(&self, handle: u32, who: &WeakProxy);

    /// Cancels a death subscription made with [`Driver::request_death`].
    fn clear_death(&self, handle: u32, who: &WeakProxy);

    /// Pushes any queued driver commands.
    fn flush(&self);

    /// Originator identity of the caller on this thread, the unit of proxy
    /// budget accounting.
    fn calling_originator(&self) -> u32;
}

/// User-space RPC session shared by all proxies created on it.
pub trait Session: Send + Sync {
    /// Performs a transaction round trip against the object at `address`.
    fn transact(
        &self,
        address: u64,
        code: u32,
        data: &Parcel,
        reply: &mut Parcel,
        flags: u32,
    ) -> Result;

    /// Notifies the remote that the local strong count for `address` dropped
    /// to zero.
    fn send_dec_strong(&self, address: u64) -> Result;

    /// Number of threads servicing incoming frames on this session. Death
    /// notifications require at least one.
    fn max_incoming_threads(&self) -> usize;
}
