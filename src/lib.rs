// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Client-side remote-object proxy runtime
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per module; integration scenarios in tests/
//!
//! PUBLIC API:
//!   - Proxy / WeakProxy: shared handles to one remote object
//!   - Driver / Session traits: consumed transport contracts
//!   - DeathRecipient: death notification observer
//!   - ProxyTracker: per-originator proxy budget with watermarks
//!   - Parcel / String16: minimal transaction payload collaborator
//!
//! DEPENDENCIES:
//!   - parking_lot: per-proxy and tracker locks
//!   - thiserror: status taxonomy
//!   - log: structured diagnostics
//!   - once_cell: process-global tracker instance
//!
//! A proxy stands in for an object living in another process, addressed
//! either by a kernel driver handle or by a 64-bit address within a shared
//! RPC session. It forwards transactions, tracks whether the remote is
//! still alive, delivers death notifications in registration order, and
//! lets callers hang arbitrary objects off the proxy keyed by opaque
//! identity. Kernel-handle proxies are additionally accounted against a
//! per-originator budget with high/low watermark hysteresis.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod codes;
mod death;
mod handle;
mod objects;
pub mod parcel;
mod proxy;
pub mod stability;
mod status;
mod tracker;
mod transport;

pub use death::DeathRecipient;
pub use handle::{KernelHandle, ProxyHandle, RpcHandle};
pub use objects::{AttachedValue, CleanupFn, ObjectId};
pub use parcel::{Parcel, String16};
pub use proxy::{Proxy, WeakProxy, LARGE_TRANSACTION_BYTES};
pub use status::{Result, Status};
pub use tracker::{LimitCallback, ProxyTracker};
pub use transport::{Driver, Session};
