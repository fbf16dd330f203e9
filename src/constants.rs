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

//! Wire-level constants: single-byte control tokens, command codes,
//! reply codes and the checksum matrix. Values are bit-exact with the
//! firmware's wire contract and must not be changed.

/// Single-byte control tokens. These never appear as the first byte of a
/// framed payload (bit 7 is reserved there for the flip-flop), so the
/// set is disjoint from valid length bytes by construction.
pub const ACK: u8 = 0x80;
pub const NACK: u8 = 0xe1;
pub const ACKWAIT: u8 = 0xd2;
pub const STALL: u8 = 0xb3;
pub const RESET: u8 = 0xf4;
pub const INIT: u8 = 0x95;
pub const ACKRESET: u8 = 0xa6;
pub const DEBUG: u8 = 0xc7;

/// Command codes, sent host -> device as `payload[0]`.
pub const CMD_BEGIN: u8 = 0x00;
pub const CMD_GOTO: u8 = 0x01;
pub const CMD_GOTOCB: u8 = 0x02;
pub const CMD_RUN: u8 = 0x03;
pub const CMD_SLEEP: u8 = 0x04;
pub const CMD_SETTEMP: u8 = 0x05;
pub const CMD_WAITTEMP: u8 = 0x06;
pub const CMD_READTEMP: u8 = 0x07;
pub const CMD_SETPOS: u8 = 0x08;
pub const CMD_GETPOS: u8 = 0x09;
pub const CMD_LOAD: u8 = 0x0a;
pub const CMD_SAVE: u8 = 0x0b;
pub const CMD_READ: u8 = 0x0c;
pub const CMD_WRITE: u8 = 0x0d;
pub const CMD_PAUSE: u8 = 0x0e;
pub const CMD_PING: u8 = 0x0f;
pub const CMD_PLAY: u8 = 0x10;

/// Reply codes, sent device -> host as `payload[0]`.
pub const REPLY_START: u8 = 0x11;
pub const REPLY_TEMP: u8 = 0x12;
pub const REPLY_POS: u8 = 0x13;
pub const REPLY_DATA: u8 = 0x14;
pub const REPLY_PONG: u8 = 0x15;
pub const REPLY_MOVECB: u8 = 0x16;
pub const REPLY_TEMPCB: u8 = 0x17;
pub const REPLY_CONTINUE: u8 = 0x18;
pub const REPLY_LIMIT: u8 = 0x19;
pub const REPLY_MESSAGE: u8 = 0x1a;

/// Default retry cap for an unacknowledged outbound frame. See
/// `link::LinkLayer::with_retry_limit`.
pub const DEFAULT_RETRY_LIMIT: u32 = 10;

/// Checksum matrix `M`, row-major: rows are bit positions 0..4, columns
/// are byte offsets 0..3. Bit-exact, fixes the on-wire contract.
#[rustfmt::skip]
pub const MASK: [[u8; 4]; 5] = [
    [0xc0, 0xc3, 0xff, 0x09],
    [0x38, 0x3a, 0x7e, 0x13],
    [0x26, 0xb5, 0xb9, 0x23],
    [0x95, 0x6c, 0xd5, 0x43],
    [0x4b, 0xdc, 0xe2, 0x83],
];
