// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tagged identity of a remote object.
//!
//! A handle is fixed at proxy construction and never mutated. The variant
//! decides where transactions, reference-count commands, and death
//! subscriptions are dispatched.

use core::fmt;
use std::sync::Arc;

use crate::transport::{Driver, Session};

/// Driver-side reference to a remote object, paired with the driver it is
/// valid on.
#[derive(Clone)]
pub struct KernelHandle {
    driver: Arc<dyn Driver>,
    handle: u32,
}

impl KernelHandle {
    /// Binds `handle` to `driver`.
    ///
    /// Fatal when the crate was built without the `kernel-ipc` feature.
    pub fn new(driver: Arc<dyn Driver>, handle: u32) -> Self {
        if !cfg!(feature = "kernel-ipc") {
            panic!("kernel IPC transport disabled at build time");
        }
        Self { driver, handle }
    }

    /// The driver this handle dispatches through.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// The raw 32-bit driver handle.
    pub fn raw(&self) -> u32 {
        self.handle
    }
}

/// Address of a remote object within a shared RPC session.
#[derive(Clone)]
pub struct RpcHandle {
    session: Arc<dyn Session>,
    address: u64,
}

impl RpcHandle {
    /// Binds `address` to `session`.
    pub fn new(session: Arc<dyn Session>, address: u64) -> Self {
        Self { session, address }
    }

    /// The session this handle dispatches through.
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// The 64-bit opaque address within the session.
    pub fn address(&self) -> u64 {
        self.address
    }
}

/// Identity of a remote object: a kernel driver handle or an RPC endpoint.
#[derive(Clone)]
pub enum ProxyHandle {
    /// Kernel driver variant.
    Kernel(KernelHandle),
    /// RPC session variant.
    Rpc(RpcHandle),
}

impl ProxyHandle {
    /// Returns true for the RPC variant.
    pub fn is_rpc(&self) -> bool {
        matches!(self, ProxyHandle::Rpc(_))
    }

    /// The raw driver handle, exposed for diagnostics. Absent for RPC.
    pub fn debug_kernel_handle(&self) -> Option<u32> {
        match self {
            ProxyHandle::Kernel(kernel) => Some(kernel.raw()),
            ProxyHandle::Rpc(_) => None,
        }
    }
}

impl PartialEq for ProxyHandle {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ProxyHandle::Kernel(a), ProxyHandle::Kernel(b)) => a.handle == b.handle,
            (ProxyHandle::Rpc(a), ProxyHandle::Rpc(b)) => {
                Arc::ptr_eq(&a.session, &b.session) && a.address == b.address
            }
            _ => false,
        }
    }
}

impl Eq for ProxyHandle {}

// Manual impl: the transport trait objects carry no Debug bound.
impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyHandle::Kernel(kernel) => f.debug_tuple("Kernel").field(&kernel.handle).finish(),
            ProxyHandle::Rpc(rpc) => f
                .debug_struct("Rpc")
                .field("address", &rpc.address)
                .finish_non_exhaustive(),
        }
    }
}
