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

//! Frame codec: length byte, payload, interleaved checksum trailer.
//!
//! The length byte is self-inclusive (it counts itself plus the
//! payload, matching the firmware's own wire format). It must also keep
//! bit 7 clear, since that's how a receiver scanning the wire tells a
//! length byte apart from a control token (every token in
//! `constants` has bit 7 set) — so the largest payload this codec can
//! carry is 126 bytes, not the 254 a bare `u8` length would allow. See
//! `DESIGN.md` for why this differs from a literal reading of the
//! distilled spec's "1..255" domain.

use crate::constants::MASK;
use crate::error::DecodeError;

/// Largest payload `encode` will accept.
pub const MAX_PAYLOAD_LEN: usize = 126;

fn group_byte(stream: &[u8], idx: usize) -> u8 {
    stream.get(idx).copied().unwrap_or(0)
}

fn check_byte(stream: &[u8], t: usize, seed: u8) -> u8 {
    let mut check = seed;
    for b in 0..5 {
        let mut s = check & MASK[b][3];
        for k in 0..3 {
            s ^= group_byte(stream, 3 * t + k) & MASK[b][k];
        }
        s ^= s >> 4;
        s ^= s >> 2;
        s ^= s >> 1;
        if s & 1 == 1 {
            check |= 1 << (b + 3);
        }
    }
    check
}

fn trailer_len(l: usize) -> usize {
    (l + 2) / 3
}

/// Frame a payload (1..=126 bytes) for the wire: length byte, payload,
/// checksum trailer.
///
/// # Panics
///
/// Panics if `payload` is empty or longer than [`MAX_PAYLOAD_LEN`] —
/// callers (the link layer) never construct out-of-range payloads, so
/// this is a programming error rather than a recoverable condition.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    assert!(!payload.is_empty(), "payload must not be empty");
    assert!(
        payload.len() <= MAX_PAYLOAD_LEN,
        "payload too long: {} > {}",
        payload.len(),
        MAX_PAYLOAD_LEN
    );

    let l = (payload.len() + 1) as u8;
    let mut stream = Vec::with_capacity(1 + payload.len());
    stream.push(l);
    stream.extend_from_slice(payload);

    let groups = trailer_len(l as usize);
    let mut frame = stream.clone();
    frame.reserve(groups);
    for t in 0..groups {
        frame.push(check_byte(&stream, t, (t & 0x7) as u8));
    }
    frame
}

/// Validate and strip a framed packet, returning the payload.
pub fn decode(frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if frame.is_empty() {
        return Err(DecodeError::BadLength);
    }
    let l = frame[0] as usize;
    if l == 0 {
        return Err(DecodeError::BadLength);
    }
    let groups = trailer_len(l);
    if frame.len() != l + groups {
        return Err(DecodeError::BadLength);
    }

    let stream = &frame[..l];
    let checks = &frame[l..];
    for (t, &c) in checks.iter().enumerate() {
        if c & 0x7 != (t & 0x7) as u8 {
            return Err(DecodeError::BadSequenceBits);
        }
        for b in 0..5 {
            let mut s = c & MASK[b][3];
            for k in 0..3 {
                s ^= group_byte(stream, 3 * t + k) & MASK[b][k];
            }
            s ^= s >> 4;
            s ^= s >> 2;
            s ^= s >> 1;
            if s & 1 != 0 {
                return Err(DecodeError::BadParity);
            }
        }
    }

    Ok(stream[1..].to_vec())
}
