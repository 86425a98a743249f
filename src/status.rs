// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Status taxonomy shared by every fallible proxy operation.
//!
//! Transport backends report their own failures through
//! [`Status::Transport`]; the proxy forwards those to callers unchanged.

use thiserror::Error;

/// Result alias for proxy operations. `Ok(())` is the OK status.
pub type Result<T = ()> = core::result::Result<T, Status>;

/// Non-OK outcomes of proxy operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The remote object died. A fresh proxy must be obtained to retry.
    #[error("remote peer is dead")]
    DeadPeer,
    /// The proxy's stability label is incompatible with this context.
    #[error("stability label incompatible with this context")]
    BadType,
    /// The operation is unavailable under the current configuration.
    #[error("operation not available in this configuration")]
    InvalidOperation,
    /// No registration matched the supplied identity.
    #[error("no matching registration")]
    NameNotFound,
    /// An allocation failed while recording a registration.
    #[error("allocation failed")]
    OutOfMemory,
    /// A transport-defined failure, forwarded verbatim.
    #[error("transport failure ({0})")]
    Transport(i32),
}
