// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Client-side proxy for a remote object.
//!
//! A proxy multiplexes transactions to one remote object, caches its
//! interface descriptor, delivers death notifications in registration
//! order, and carries user-attached objects keyed by opaque identity.
//!
//! Lifetime model: the backing state survives until the last holder goes
//! away, strong [`Proxy`] or weak [`WeakProxy`]. The strong count is
//! explicit so the 1 -> 0 edge can release the remote reference and the
//! 0 -> 1 edge (weak promotion) can ask the transport whether the remote
//! still holds one. Death delivery stays valid after the last strong
//! holder releases, which is the reason the weak side keeps the state
//! alive.
//!
//! Lock discipline: the per-proxy lock is never held while a user callback
//! or a transaction round trip runs. [`Proxy::with_lock`] is the single
//! documented exception and its callers accept the re-entrancy hazard.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::codes::{
    self, DUMP_CODE, FLAG_PRIVATE_VENDOR, INTERFACE_CODE, PING_CODE, START_RECORDING_CODE,
    STOP_RECORDING_CODE,
};
use crate::death::{DeathRecipient, Obituary};
use crate::handle::{KernelHandle, ProxyHandle, RpcHandle};
use crate::objects::{AttachedValue, CleanupFn, ObjectId, ObjectTable};
use crate::parcel::{Parcel, String16};
use crate::stability::{self, Level};
use crate::status::{Result, Status};
use crate::tracker::ProxyTracker;
use crate::transport::{Driver, Session};

/// Outgoing payloads above this size are logged with the cached descriptor.
pub const LARGE_TRANSACTION_BYTES: usize = 300 * 1024;

struct TrackedOriginator {
    tracker: Arc<ProxyTracker>,
    originator: u32,
}

struct ProxyState {
    obits_sent: bool,
    obituaries: Option<Vec<Obituary>>,
    objects: ObjectTable,
}

struct ProxyBinder {
    handle: ProxyHandle,
    strong: AtomicUsize,
    alive: AtomicBool,
    stability: AtomicU16,
    descriptor: OnceLock<String16>,
    descriptor_fetch: Mutex<()>,
    state: Mutex<ProxyState>,
    tracked: Option<TrackedOriginator>,
}

/// Strong handle to a remote object.
///
/// Cloning shares the same underlying proxy; the remote strong reference is
/// released when the last clone drops.
pub struct Proxy {
    inner: Arc<ProxyBinder>,
}

/// Weak handle to a remote object.
///
/// Keeps the proxy state (death registrations, attached objects) alive
/// without holding the remote strong reference.
#[derive(Clone)]
pub struct WeakProxy {
    inner: Arc<ProxyBinder>,
}

impl Proxy {
    /// Creates a proxy for a kernel driver handle, accounted against the
    /// process-wide budget tracker.
    ///
    /// Returns `None` when the caller's originator is over budget and
    /// throttling is enabled. Fatal when the crate was built without the
    /// `kernel-ipc` feature.
    pub fn create(driver: Arc<dyn Driver>, handle: u32) -> Option<Proxy> {
        Self::create_with_tracker(driver, handle, ProxyTracker::global())
    }

    /// Same as [`Proxy::create`] against an explicit tracker instance.
    pub fn create_with_tracker(
        driver: Arc<dyn Driver>,
        handle: u32,
        tracker: &Arc<ProxyTracker>,
    ) -> Option<Proxy> {
        // Fatal before any budget accounting: a refused create must not mask
        // an attempt to use a transport this build does not carry.
        if !cfg!(feature = "kernel-ipc") {
            panic!("kernel IPC transport disabled at build time");
        }

        let tracked = if tracker.is_enabled() {
            let originator = driver.calling_originator();
            if !tracker.admit(originator) {
                return None;
            }
            Some(TrackedOriginator { tracker: tracker.clone(), originator })
        } else {
            None
        };
        Some(Self::construct(ProxyHandle::Kernel(KernelHandle::new(driver, handle)), tracked))
    }

    /// Creates a proxy for an object addressed within an RPC session. RPC
    /// proxies are not budget-accounted; the session tracks its own objects.
    pub fn create_rpc(session: Arc<dyn Session>, address: u64) -> Proxy {
        Self::construct(ProxyHandle::Rpc(RpcHandle::new(session, address)), None)
    }

    fn construct(handle: ProxyHandle, tracked: Option<TrackedOriginator>) -> Proxy {
        let inner = Arc::new(ProxyBinder {
            handle,
            strong: AtomicUsize::new(1),
            alive: AtomicBool::new(true),
            stability: AtomicU16::new(Level::Undeclared.bits()),
            descriptor: OnceLock::new(),
            descriptor_fetch: Mutex::new(()),
            state: Mutex::new(ProxyState {
                obits_sent: false,
                obituaries: None,
                objects: ObjectTable::default(),
            }),
            tracked,
        });
        if let ProxyHandle::Kernel(kernel) = &inner.handle {
            debug!("creating proxy for kernel handle {}", kernel.raw());
            kernel.driver().inc_weak(kernel.raw());
            kernel.driver().inc_strong(kernel.raw());
        }
        Proxy { inner }
    }

    /// Returns a weak handle to the same remote object.
    pub fn downgrade(&self) -> WeakProxy {
        WeakProxy { inner: self.inner.clone() }
    }

    /// Returns true while no death has been observed.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    /// The immutable identity of the remote object.
    pub fn handle(&self) -> &ProxyHandle {
        &self.inner.handle
    }

    /// Returns true for proxies addressed over an RPC session.
    pub fn is_rpc(&self) -> bool {
        self.inner.handle.is_rpc()
    }

    /// The raw driver handle, for diagnostics only. Absent for RPC proxies.
    pub fn debug_kernel_handle(&self) -> Option<u32> {
        self.inner.handle.debug_kernel_handle()
    }

    /// The address within the RPC session, when this is an RPC proxy.
    pub fn rpc_address(&self) -> Option<u64> {
        match &self.inner.handle {
            ProxyHandle::Rpc(rpc) => Some(rpc.address()),
            ProxyHandle::Kernel(_) => None,
        }
    }

    /// The session this proxy was created on, when this is an RPC proxy.
    pub fn rpc_session(&self) -> Option<&Arc<dyn Session>> {
        match &self.inner.handle {
            ProxyHandle::Rpc(rpc) => Some(rpc.session()),
            ProxyHandle::Kernel(_) => None,
        }
    }

    /// The 16-bit stability label used for local compatibility checks.
    pub fn stability(&self) -> u16 {
        self.inner.stability.load(Ordering::SeqCst)
    }

    /// Replaces the stability label.
    pub fn set_stability(&self, label: u16) {
        self.inner.stability.store(label, Ordering::SeqCst);
    }

    /// Returns true if two handles refer to the same proxy object.
    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Sends a transaction to the remote object.
    ///
    /// User-range codes are admitted only when the stability label satisfies
    /// the local requirement, VENDOR when [`FLAG_PRIVATE_VENDOR`] is set.
    /// That flag never reaches a transport; all other flags pass through
    /// verbatim. A dead proxy fails every transaction with
    /// [`Status::DeadPeer`], and a transport dead-peer report latches the
    /// proxy dead.
    pub fn transact(&self, code: u32, data: &Parcel, reply: &mut Parcel, flags: u32) -> Result {
        if !self.inner.alive.load(Ordering::SeqCst) {
            return Err(Status::DeadPeer);
        }

        let private_vendor = flags & FLAG_PRIVATE_VENDOR != 0;
        let flags = flags & !FLAG_PRIVATE_VENDOR;

        if codes::is_user_call(code) {
            let label = self.stability();
            let required = if private_vendor { Level::Vendor } else { Level::local() };
            if !stability::check(label, required) {
                error!(
                    "rejecting user transaction on a {} proxy in a {required} context",
                    stability::describe(label)
                );
                return Err(Status::BadType);
            }
        }

        let status = match &self.inner.handle {
            ProxyHandle::Kernel(kernel) => {
                kernel.driver().transact(kernel.raw(), code, data, reply, flags)
            }
            ProxyHandle::Rpc(rpc) => rpc.session().transact(rpc.address(), code, data, reply, flags),
        };

        if data.len() > LARGE_TRANSACTION_BYTES {
            let descriptor =
                self.inner.descriptor.get().map(ToString::to_string).unwrap_or_default();
            warn!(
                "large outgoing transaction of {} bytes, interface descriptor {descriptor}, \
                 code {code}",
                data.len()
            );
        }

        if matches!(status, Err(Status::DeadPeer)) {
            self.inner.alive.store(false, Ordering::SeqCst);
        }
        status
    }

    /// Returns the remote interface descriptor, querying it once.
    ///
    /// The first uncached call issues a reserved INTERFACE transaction with
    /// no per-proxy lock held; concurrent uncached callers share a single
    /// query and converge on the same stored value.
    pub fn interface_descriptor(&self) -> Result<&String16> {
        if let Some(cached) = self.inner.descriptor.get() {
            return Ok(cached);
        }

        let _fetch = self.inner.descriptor_fetch.lock();
        if let Some(cached) = self.inner.descriptor.get() {
            return Ok(cached);
        }

        let data = Parcel::new();
        let mut reply = Parcel::new();
        self.transact(INTERFACE_CODE, &data, &mut reply, 0)?;
        let descriptor = reply.read_string16().unwrap_or_default();
        Ok(self.inner.descriptor.get_or_init(|| descriptor))
    }

    /// Returns true once the interface descriptor has been cached.
    pub fn is_descriptor_cached(&self) -> bool {
        self.inner.descriptor.get().is_some()
    }

    /// Probes the remote object for liveness.
    pub fn ping(&self) -> Result {
        let data = Parcel::new();
        let mut reply = Parcel::new();
        self.transact(PING_CODE, &data, &mut reply, 0)
    }

    /// Asks the remote object to dump its state to `fd`.
    pub fn dump(&self, fd: i32, args: &[String16]) -> Result {
        let mut data = Parcel::new();
        let mut reply = Parcel::new();
        data.write_file_descriptor(fd);
        data.write_i32(args.len() as i32);
        for arg in args {
            data.write_string16(arg);
        }
        self.transact(DUMP_CODE, &data, &mut reply, 0)
    }

    /// Asks the remote object to record its transactions to `fd`.
    pub fn start_recording(&self, fd: i32) -> Result {
        let mut data = Parcel::new();
        let mut reply = Parcel::new();
        data.write_file_descriptor(fd);
        self.transact(START_RECORDING_CODE, &data, &mut reply, 0)
    }

    /// Stops a recording started with [`Proxy::start_recording`].
    pub fn stop_recording(&self) -> Result {
        let data = Parcel::new();
        let mut reply = Parcel::new();
        self.transact(STOP_RECORDING_CODE, &data, &mut reply, 0)
    }

    /// Registers `recipient` for a death notification.
    ///
    /// The recipient is held weakly; keep the strong reference alive for as
    /// long as the notification matters. Fails with [`Status::DeadPeer`]
    /// once death was delivered and [`Status::InvalidOperation`] on an RPC
    /// session with no incoming threads.
    pub fn link_to_death(
        &self,
        recipient: &Arc<dyn DeathRecipient>,
        cookie: usize,
        flags: u32,
    ) -> Result {
        if let ProxyHandle::Rpc(rpc) = &self.inner.handle {
            if rpc.session().max_incoming_threads() < 1 {
                error!(
                    "death recipients need an incoming thread on the session, configure one \
                     before linking"
                );
                return Err(Status::InvalidOperation);
            }
        }

        let obituary =
            Obituary { recipient: Arc::downgrade(recipient), cookie, flags };

        let mut state = self.inner.state.lock();
        if state.obits_sent {
            return Err(Status::DeadPeer);
        }
        if state.obituaries.is_none() {
            state.obituaries = Some(Vec::new());
            if let ProxyHandle::Kernel(kernel) = &self.inner.handle {
                debug!("requesting death notification for kernel handle {}", kernel.raw());
                let who = self.downgrade();
                kernel.driver().request_death(kernel.raw(), &who);
                kernel.driver().flush();
            }
        }
        if let Some(obituaries) = state.obituaries.as_mut() {
            obituaries.push(obituary);
        }
        Ok(())
    }

    /// Removes a registration made with [`Proxy::link_to_death`].
    ///
    /// With a recipient supplied, the match is by registration identity and
    /// flags; without one, by cookie and flags. The removed recipient is
    /// returned. Removing the last registration cancels the transport
    /// subscription.
    pub fn unlink_to_death(
        &self,
        recipient: Option<&Arc<dyn DeathRecipient>>,
        cookie: usize,
        flags: u32,
    ) -> Result<Weak<dyn DeathRecipient>> {
        let mut state = self.inner.state.lock();
        if state.obits_sent {
            return Err(Status::DeadPeer);
        }
        let Some(obituaries) = state.obituaries.as_mut() else {
            return Err(Status::NameNotFound);
        };
        let Some(index) =
            obituaries.iter().position(|ob| ob.matches(recipient, cookie, flags))
        else {
            return Err(Status::NameNotFound);
        };

        let removed = obituaries.remove(index);
        if obituaries.is_empty() {
            if let ProxyHandle::Kernel(kernel) = &self.inner.handle {
                debug!("clearing death notification for kernel handle {}", kernel.raw());
                let who = self.downgrade();
                kernel.driver().clear_death(kernel.raw(), &who);
                kernel.driver().flush();
            }
            state.obituaries = None;
        }
        Ok(removed.recipient)
    }

    /// Delivers death to every registered recipient, in registration order.
    ///
    /// Called by the transport when the remote object dies. Idempotent;
    /// recipients run with no lock held and may call back into this proxy.
    pub fn send_obituary(&self) {
        ProxyBinder::send_obituary(&self.inner);
    }

    /// Attaches `value` under `id`. First writer wins: an occupied id keeps
    /// its incumbent, which is returned instead. `cleanup` runs exactly once
    /// when the proxy is destroyed, unless the entry is detached first.
    pub fn attach_object(
        &self,
        id: ObjectId,
        value: AttachedValue,
        cookie: usize,
        cleanup: Option<CleanupFn>,
    ) -> Option<AttachedValue> {
        self.inner.state.lock().objects.attach(id, value, cookie, cleanup)
    }

    /// Returns the object attached under `id`.
    pub fn find_object(&self, id: ObjectId) -> Option<AttachedValue> {
        self.inner.state.lock().objects.find(id)
    }

    /// Removes the object attached under `id` without running its cleanup.
    pub fn detach_object(&self, id: ObjectId) -> Option<AttachedValue> {
        self.inner.state.lock().objects.detach(id)
    }

    /// Returns the live object in the weak slot `id`, or stores and returns
    /// a fresh one from `make`. `make` runs under the per-proxy lock and
    /// must not call back into this proxy.
    pub fn lookup_or_create_weak<F>(&self, id: ObjectId, make: F) -> AttachedValue
    where
        F: FnOnce() -> AttachedValue,
    {
        self.inner.state.lock().objects.lookup_or_create_weak(id, make)
    }

    /// Runs `f` under the per-proxy lock.
    ///
    /// The single sanctioned way to hold the lock from outside; `f` must not
    /// call back into this proxy or the thread deadlocks.
    pub fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.state.lock();
        f()
    }
}

impl Clone for Proxy {
    fn clone(&self) -> Self {
        self.inner.strong.fetch_add(1, Ordering::SeqCst);
        Proxy { inner: self.inner.clone() }
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        if self.inner.strong.fetch_sub(1, Ordering::SeqCst) == 1 {
            ProxyBinder::on_last_strong(&self.inner);
        }
    }
}

impl core::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Proxy")
            .field("handle", &self.inner.handle)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl WeakProxy {
    /// Attempts to promote to a strong handle.
    ///
    /// While strong handles exist this always succeeds. After the last one
    /// dropped, a kernel proxy asks the driver whether the remote strong
    /// reference is still acquirable; an RPC proxy never revives.
    pub fn upgrade(&self) -> Option<Proxy> {
        let strong = &self.inner.strong;
        let mut current = strong.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                if !self.inner.attempt_revive() {
                    return None;
                }
                match strong.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst) {
                    Ok(_) => return Some(Proxy { inner: self.inner.clone() }),
                    Err(seen) => current = seen,
                }
            } else {
                match strong.compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                {
                    Ok(_) => return Some(Proxy { inner: self.inner.clone() }),
                    Err(seen) => current = seen,
                }
            }
        }
    }

    /// Delivers death through a weak handle; see [`Proxy::send_obituary`].
    /// Transports hold only weak references, so delivery must not require a
    /// strong one.
    pub fn send_obituary(&self) {
        ProxyBinder::send_obituary(&self.inner);
    }

    /// Returns true if two weak handles refer to the same proxy object.
    pub fn ptr_eq(&self, other: &WeakProxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl core::fmt::Debug for WeakProxy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WeakProxy").field("handle", &self.inner.handle).finish_non_exhaustive()
    }
}

impl ProxyBinder {
    fn attempt_revive(&self) -> bool {
        match &self.handle {
            ProxyHandle::Kernel(kernel) => {
                kernel.driver().attempt_inc_strong(kernel.raw()).is_ok()
            }
            // RPC proxies do not support promotion from weak-only state.
            ProxyHandle::Rpc(_) => false,
        }
    }

    fn on_last_strong(this: &Arc<ProxyBinder>) {
        match &this.handle {
            ProxyHandle::Rpc(rpc) => {
                let _ = rpc.session().send_dec_strong(rpc.address());
            }
            ProxyHandle::Kernel(kernel) => {
                debug!("last strong reference for kernel handle {}", kernel.raw());
                kernel.driver().dec_strong(kernel.raw());

                let obituaries = {
                    let mut state = this.state.lock();
                    let obituaries = state.obituaries.take();
                    if obituaries.is_some() {
                        let who = WeakProxy { inner: this.clone() };
                        kernel.driver().clear_death(kernel.raw(), &who);
                    }
                    obituaries
                };
                if let Some(obituaries) = obituaries {
                    if !obituaries.is_empty() {
                        let descriptor =
                            this.descriptor.get().map(ToString::to_string).unwrap_or_default();
                        info!(
                            "unlinking {} death recipients on last strong reference: {descriptor}",
                            obituaries.len()
                        );
                    }
                    // Remaining recipients are not notified.
                }
            }
        }
    }

    fn send_obituary(this: &Arc<ProxyBinder>) {
        this.alive.store(false, Ordering::SeqCst);

        let obituaries = {
            let mut state = this.state.lock();
            if state.obits_sent {
                return;
            }
            let obituaries = state.obituaries.take();
            if obituaries.is_some() {
                if let ProxyHandle::Kernel(kernel) = &this.handle {
                    debug!("clearing sent death notification for kernel handle {}", kernel.raw());
                    let who = WeakProxy { inner: this.clone() };
                    kernel.driver().clear_death(kernel.raw(), &who);
                    kernel.driver().flush();
                }
            }
            state.obits_sent = true;
            obituaries
        };

        if let Some(obituaries) = obituaries {
            debug!("reporting proxy death to {} recipients", obituaries.len());
            let who = WeakProxy { inner: this.clone() };
            for obituary in obituaries {
                if let Some(recipient) = obituary.recipient.upgrade() {
                    recipient.remote_died(&who);
                }
            }
        }
    }
}

impl Drop for ProxyBinder {
    fn drop(&mut self) {
        if let ProxyHandle::Kernel(kernel) = &self.handle {
            debug!("destroying proxy for kernel handle {}", kernel.raw());
            if let Some(tracked) = &self.tracked {
                tracked.tracker.release(tracked.originator);
            }
            kernel.driver().dec_weak(kernel.raw());
        }
        // Attached-object cleanup runs when the state field drops, after the
        // bookkeeping above, and cannot be re-entered: no handle to this
        // proxy exists anymore.
    }
}
