// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Reserved transaction codes and caller-visible transaction flags.
//!
//! The reserved codes are packed four-character constants; peers on either
//! side of the wire recognize them by value, so they must never be
//! renumbered.

const fn pack_chars(c1: u8, c2: u8, c3: u8, c4: u8) -> u32 {
    ((c1 as u32) << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | (c4 as u32)
}

/// First code available to user-defined interface calls.
pub const FIRST_CALL_CODE: u32 = 0x0000_0001;
/// Last code available to user-defined interface calls.
pub const LAST_CALL_CODE: u32 = 0x00ff_ffff;

/// Liveness probe. Empty body; the returned status is the answer.
pub const PING_CODE: u32 = pack_chars(b'_', b'P', b'N', b'G');
/// State dump request: file descriptor, argument count, then UTF-16 arguments.
pub const DUMP_CODE: u32 = pack_chars(b'_', b'D', b'M', b'P');
/// Shell command execution, payload defined by the shell protocol.
pub const SHELL_CODE: u32 = pack_chars(b'_', b'C', b'M', b'D');
/// Interface descriptor query. Empty body; reply carries one UTF-16 string.
pub const INTERFACE_CODE: u32 = pack_chars(b'_', b'N', b'T', b'F');
/// System property change broadcast.
pub const SYSPROPS_CHANGED_CODE: u32 = pack_chars(b'_', b'S', b'P', b'R');
/// Begin recording transactions to the supplied file descriptor.
pub const START_RECORDING_CODE: u32 = pack_chars(b'_', b'S', b'R', b'D');
/// Stop a recording started with [`START_RECORDING_CODE`].
pub const STOP_RECORDING_CODE: u32 = pack_chars(b'_', b'E', b'R', b'D');

/// Fire-and-forget transaction; no reply is delivered.
pub const FLAG_ONEWAY: u32 = 0x0000_0001;
/// Ask the transport to scrub reply buffers after use.
pub const FLAG_CLEAR_BUF: u32 = 0x0000_0020;
/// Caller-side marker selecting the VENDOR stability requirement. Stripped
/// before the transaction reaches any transport.
pub const FLAG_PRIVATE_VENDOR: u32 = 0x1000_0000;

/// Returns true when `code` falls in the user call range.
pub const fn is_user_call(code: u32) -> bool {
    matches!(code, FIRST_CALL_CODE..=LAST_CALL_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_codes_keep_packed_values() {
        assert_eq!(PING_CODE, 0x5f50_4e47);
        assert_eq!(INTERFACE_CODE, 0x5f4e_5446);
        assert_eq!(DUMP_CODE, 0x5f44_4d50);
    }

    #[test]
    fn reserved_codes_sit_outside_user_range() {
        for code in [
            PING_CODE,
            DUMP_CODE,
            SHELL_CODE,
            INTERFACE_CODE,
            SYSPROPS_CHANGED_CODE,
            START_RECORDING_CODE,
            STOP_RECORDING_CODE,
        ] {
            assert!(!is_user_call(code));
        }
        assert!(is_user_call(FIRST_CALL_CODE));
        assert!(is_user_call(LAST_CALL_CODE));
    }
}
