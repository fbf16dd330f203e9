// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Typed error taxonomy for the link, session and discovery layers.
//!
//! Decode errors never cross into [`SessionError`]: they're consumed by
//! the link layer, which NACKs and retries. Everything else surfaces.

use std::io;

use crate::constants;

/// A single-byte control token, used to name which one was unexpected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlToken {
    Ack,
    Nack,
    AckWait,
    Stall,
    Reset,
    Init,
    AckReset,
    Debug,
}

impl ControlToken {
    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            constants::ACK => ControlToken::Ack,
            constants::NACK => ControlToken::Nack,
            constants::ACKWAIT => ControlToken::AckWait,
            constants::STALL => ControlToken::Stall,
            constants::RESET => ControlToken::Reset,
            constants::INIT => ControlToken::Init,
            constants::ACKRESET => ControlToken::AckReset,
            constants::DEBUG => ControlToken::Debug,
            _ => return None,
        })
    }
}

/// Frame decode failure (§4.1). Always recovered locally by the link
/// layer (NACK + retry); never surfaces past it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame length byte inconsistent with frame size")]
    BadLength,
    #[error("check byte sequence bits did not match group index")]
    BadSequenceBits,
    #[error("check byte parity mismatch")]
    BadParity,
}

/// Link-layer failure (§4.2/§4.3/§7).
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("transport I/O failed: {0}")]
    Transport(#[from] io::Error),
    #[error("protocol violation: received {0:?} unexpectedly")]
    Protocol(ControlToken),
    #[error("peer unexpectedly reset mid-session (received INIT)")]
    PeerReset,
    #[error("frame not acknowledged after {0} attempt(s)")]
    Unacked(u32),
}

/// Session-layer failure (§7), the error type returned by the command
/// facade.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("unexpected reply: expected {expected}, got {got:#04x}")]
    Unexpected { expected: &'static str, got: u8 },
    #[error("no async event arrived within the deadline")]
    Timeout,
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Link(LinkError::Transport(e))
    }
}

/// Discovery failure (§4.5/§7).
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no candidate serial port produced a valid INIT handshake")]
    NotFound,
    #[error("candidate port I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
