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

//! Reliable, flip-flop-sequenced delivery over a raw serial line (§4.2,
//! §4.3). Knows nothing about command/reply semantics; the session
//! layer classifies what comes back.

use std::io;
use std::time::{Duration, Instant};

use serial::SerialPort;

use crate::constants;
use crate::error::{ControlToken, LinkError};
use crate::frame;
use crate::sinks::{DebugSink, LoggingDebugSink};

/// Read timeout used for ordinary protocol traffic. The original
/// implementation left this at 5 seconds "for debugging" with a TODO
/// noting production should use 5 milliseconds; we take the intended
/// production value (see `DESIGN.md`).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5);

/// Result of successfully delivering one outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame was acknowledged normally.
    Acked,
    /// The frame was acknowledged, and the device is asserting flow
    /// control (caller must set `wait = true`).
    AckedWait,
}

/// Flip-flop-sequenced, checksummed, retransmitting link over a serial
/// port. Generic over `serial::SerialPort` so tests can substitute a
/// scripted in-memory port (see the teacher's own `DummySerialPort`
/// pattern in the upstream bootloader crate).
pub struct LinkLayer<P> {
    port: P,
    ff_out: bool,
    ff_in: bool,
    retry_limit: u32,
    debug_sink: Box<dyn DebugSink>,
}

impl<P> LinkLayer<P>
where
    P: SerialPort,
{
    pub fn new(port: P) -> Self {
        LinkLayer {
            port,
            ff_out: false,
            ff_in: false,
            retry_limit: constants::DEFAULT_RETRY_LIMIT,
            debug_sink: Box::new(LoggingDebugSink),
        }
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn with_debug_sink(mut self, sink: Box<dyn DebugSink>) -> Self {
        self.debug_sink = sink;
        self
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_port(self) -> P {
        self.port
    }

    /// Apply the default short read timeout. Discovery switches the
    /// port to its own (longer) timeouts and must call this again
    /// before handing control back to the session.
    pub fn use_default_timeout(&mut self) -> Result<(), LinkError> {
        self.port
            .set_timeout(DEFAULT_READ_TIMEOUT)
            .map_err(|e| LinkError::Transport(io::Error::from(e)))
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), LinkError> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| LinkError::Transport(io::Error::from(e)))
    }

    /// Toggle DTR to reset the device into its boot sequence (§4.5).
    pub fn reset_via_dtr(&mut self, settle: Duration) -> Result<(), LinkError> {
        self.port
            .set_dtr(false)
            .map_err(|e| LinkError::Transport(io::Error::from(e)))?;
        std::thread::sleep(settle);
        self.port
            .set_dtr(true)
            .map_err(|e| LinkError::Transport(io::Error::from(e)))?;
        std::thread::sleep(settle);
        Ok(())
    }

    /// Discard whatever is sitting in the input buffer (stale bytes
    /// from before a reset).
    pub fn drain_input(&mut self) -> Result<(), LinkError> {
        while self.try_read_byte()?.is_some() {}
        Ok(())
    }

    /// Wait for the device's boot-complete INIT token, discarding any
    /// DEBUG text and ignoring anything else that arrives first (no
    /// protocol has been established yet, so there's nothing to NACK).
    pub fn wait_for_boot(&mut self, deadline: Instant) -> Result<bool, LinkError> {
        loop {
            match self.try_read_byte()? {
                None => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                }
                Some(b) if b == constants::DEBUG => self.drain_debug()?,
                Some(b) if b == constants::INIT => return Ok(true),
                Some(_) => {}
            }
        }
    }

    fn try_read_byte(&mut self) -> Result<Option<u8>, LinkError> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(LinkError::Transport(e)),
        }
    }

    fn read_byte_blocking(&mut self, deadline: Option<Instant>) -> Result<Option<u8>, LinkError> {
        loop {
            if let Some(b) = self.try_read_byte()? {
                return Ok(Some(b));
            }
            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    return Ok(None);
                }
            }
        }
    }

    fn write_token(&mut self, token: u8) -> Result<(), LinkError> {
        self.port.write_all(&[token])?;
        self.port.flush()?;
        Ok(())
    }

    fn drain_debug(&mut self) -> Result<(), LinkError> {
        let mut text = Vec::new();
        loop {
            match self.try_read_byte()? {
                None | Some(0) => break,
                Some(b) => text.push(b),
            }
        }
        self.debug_sink.on_debug(&text);
        Ok(())
    }

    /// Deliver one outbound payload, applying and toggling `ff_out`
    /// exactly once regardless of how many wire retries it takes
    /// (§4.2 hard invariant). `payload[0]` is the command byte; its top
    /// bit is overwritten with the flip-flop.
    ///
    /// Frames the peer sends while we're waiting for our ACK are
    /// decoded and handed to `on_async` (the session layer classifies
    /// and applies them); we keep waiting for our own ACK afterward.
    pub fn send(
        &mut self,
        payload: &[u8],
        on_async: &mut dyn FnMut(Vec<u8>),
    ) -> Result<SendOutcome, LinkError> {
        let mut framed_payload = payload.to_vec();
        framed_payload[0] = (framed_payload[0] & 0x7f) | if self.ff_out { 0x80 } else { 0 };
        self.ff_out = !self.ff_out;

        let frame = frame::encode(&framed_payload);

        let mut attempts: u32 = 0;
        loop {
            self.port.write_all(&frame)?;
            self.port.flush()?;

            loop {
                match self.try_read_byte()? {
                    None => {
                        attempts += 1;
                        if attempts >= self.retry_limit {
                            return Err(LinkError::Unacked(attempts));
                        }
                        break; // retransmit the whole frame
                    }
                    Some(b) if b == constants::DEBUG => {
                        self.drain_debug()?;
                        continue;
                    }
                    Some(b) if b == constants::ACK => return Ok(SendOutcome::Acked),
                    Some(b) if b == constants::ACKWAIT => return Ok(SendOutcome::AckedWait),
                    Some(b) if b == constants::NACK => {
                        attempts += 1;
                        if attempts >= self.retry_limit {
                            return Err(LinkError::Unacked(attempts));
                        }
                        break; // retransmit the whole frame
                    }
                    Some(b) if b == constants::STALL => {
                        return Err(LinkError::Protocol(ControlToken::Stall))
                    }
                    Some(b) if b == constants::RESET => {
                        return Err(LinkError::Protocol(ControlToken::Reset))
                    }
                    Some(b) if b == constants::ACKRESET => {
                        return Err(LinkError::Protocol(ControlToken::AckReset))
                    }
                    Some(b) if b == constants::INIT => return Err(LinkError::PeerReset),
                    Some(b) if b & 0x80 != 0 => {
                        // Peer tried to start a frame on top of us; force it
                        // to resend from the start.
                        self.write_token(constants::NACK)?;
                        continue;
                    }
                    Some(b) => {
                        // Start of an incoming frame from the peer.
                        if let Some(payload) = self.receive_one_frame(b, None)? {
                            on_async(payload);
                        }
                        continue;
                    }
                }
            }
        }
    }

    /// Receive the next *new* frame (deduplicating retransmissions the
    /// peer sends because our ACK was lost), blocking indefinitely
    /// unless `deadline` is given.
    pub fn receive_frame(&mut self, deadline: Option<Instant>) -> Result<Option<Vec<u8>>, LinkError> {
        loop {
            let first = match self.scan_for_frame(deadline)? {
                Some(b) => b,
                None => return Ok(None),
            };
            match self.receive_one_frame(first, deadline)? {
                Some(payload) => return Ok(Some(payload)),
                None => continue, // duplicate, keep waiting
            }
        }
    }

    /// Receive one frame, having already consumed its first byte (the
    /// length byte candidate) from the wire. Returns `Ok(None)` when
    /// the received frame turned out to be a flip-flop duplicate (ACKed
    /// but dropped) so the caller should keep scanning.
    fn receive_one_frame(
        &mut self,
        first_byte: u8,
        deadline: Option<Instant>,
    ) -> Result<Option<Vec<u8>>, LinkError> {
        let mut buffer = vec![first_byte];
        loop {
            let l = buffer[0] as usize;
            let groups = (l + 2) / 3;
            let total = l + groups;

            let mut timed_out = false;
            while buffer.len() < total {
                match self.try_read_byte()? {
                    Some(b) => buffer.push(b),
                    None => {
                        if let Some(dl) = deadline {
                            if Instant::now() >= dl {
                                return Ok(None);
                            }
                        }
                        timed_out = true;
                        break;
                    }
                }
            }
            if timed_out {
                self.write_token(constants::NACK)?;
                buffer.clear();
                // Restart framing: the byte we already consumed is gone;
                // scan for a fresh length byte, draining any DEBUG text
                // and rejecting stray control tokens along the way.
                let next = match self.scan_for_frame(deadline)? {
                    Some(b) => b,
                    None => return Ok(None),
                };
                buffer.push(next);
                continue;
            }

            match frame::decode(&buffer) {
                Err(_) => {
                    self.write_token(constants::NACK)?;
                    buffer.clear();
                    let next = match self.scan_for_frame(deadline)? {
                        Some(b) => b,
                        None => return Ok(None),
                    };
                    buffer.push(next);
                    continue;
                }
                Ok(mut payload) => {
                    let incoming_ff = payload[0] & 0x80 != 0;
                    self.write_token(constants::ACK)?;
                    if incoming_ff == self.ff_in {
                        payload[0] &= 0x7f;
                        self.ff_in = !self.ff_in;
                        return Ok(Some(payload));
                    }
                    return Ok(None); // duplicate retransmission, already ACKed
                }
            }
        }
    }

    /// Scan for the next frame-length byte, dispatching DEBUG and
    /// rejecting stray control tokens with NACK (§4.3). Used as the
    /// entry point when no byte has been consumed yet.
    pub fn scan_for_frame(&mut self, deadline: Option<Instant>) -> Result<Option<u8>, LinkError> {
        loop {
            match self.read_byte_blocking(deadline)? {
                None => return Ok(None),
                Some(b) if b == constants::DEBUG => self.drain_debug()?,
                Some(b) if b == constants::INIT => return Err(LinkError::PeerReset),
                Some(b) if b & 0x80 != 0 => {
                    if let Some(token) = ControlToken::from_byte(b) {
                        log::debug!("stray {:?} before frame boundary, forcing resync", token);
                    }
                    self.write_token(constants::NACK)?;
                }
                Some(b) => return Ok(Some(b)),
            }
        }
    }
}


#[cfg(test)]
mod test {
    use super::test_support::ScriptedPort;
    use super::*;

    fn frame_for(payload: &[u8]) -> Vec<u8> {
        frame::encode(payload)
    }

    #[test]
    fn flip_flop_toggles_once_per_send_on_clean_ack() {
        let port = ScriptedPort::new(&[constants::ACK]);
        let mut link = LinkLayer::new(port);
        let mut noop = |_: Vec<u8>| {};
        let outcome = link.send(&[0x0f, 0x2a], &mut noop).unwrap();
        assert_eq!(outcome, SendOutcome::Acked);
        assert!(link.ff_out); // toggled exactly once, false -> true
    }

    #[test]
    fn retransmit_on_nack_toggles_ff_out_once() {
        let port = ScriptedPort::new(&[constants::NACK, constants::ACK]);
        let mut link = LinkLayer::new(port);
        let mut noop = |_: Vec<u8>| {};
        let payload = [0x0f, 0x2a];
        let outcome = link.send(&payload, &mut noop).unwrap();
        assert_eq!(outcome, SendOutcome::Acked);
        assert!(link.ff_out);

        // The frame must have been written to the wire exactly twice.
        let one_frame = frame_for(&payload);
        let expected_wire: Vec<u8> = one_frame
            .iter()
            .chain(one_frame.iter())
            .copied()
            .collect();
        assert_eq!(link.port().outbound, expected_wire);
    }

    #[test]
    fn unacked_after_retry_budget_exhausted() {
        let port = ScriptedPort::new(&[]); // never responds
        let mut link = LinkLayer::new(port).with_retry_limit(3);
        let mut noop = |_: Vec<u8>| {};
        let err = link.send(&[0x0f, 0x00], &mut noop).unwrap_err();
        assert!(matches!(err, LinkError::Unacked(3)));
    }

    #[test]
    fn ackwait_sets_outcome_without_toggling_ff_in() {
        let port = ScriptedPort::new(&[constants::ACKWAIT]);
        let mut link = LinkLayer::new(port);
        let mut noop = |_: Vec<u8>| {};
        let outcome = link.send(&[0x0f, 0x00], &mut noop).unwrap();
        assert_eq!(outcome, SendOutcome::AckedWait);
    }

    #[test]
    fn duplicate_inbound_frame_is_acked_but_not_delivered() {
        let reply = frame::encode(&[0x15, 0x2a]); // PONG, flip-flop bit clear
        let mut wire = reply.clone();
        wire.extend(reply.clone()); // peer retransmits the same frame
        let port = ScriptedPort::new(&wire);
        let mut link = LinkLayer::new(port);

        let first = link.receive_frame(None).unwrap().unwrap();
        assert_eq!(first, vec![0x15, 0x2a]);
        assert!(link.ff_in);

        // Feed the duplicate again behind a fresh reply so we can observe
        // that the first (duplicate) frame does not get delivered.
        let real_next = frame::encode(&[0x16, 0x01]);
        link.port_mut().push_inbound(&real_next);
        let second = link.receive_frame(None).unwrap().unwrap();
        assert_eq!(second, vec![0x16, 0x01]);
    }

    #[test]
    fn receive_frame_drains_debug_text_appearing_mid_session() {
        // A DEBUG-framed string arrives ahead of an ordinary reply frame,
        // not just during the boot handshake.
        let mut wire = vec![constants::DEBUG];
        wire.extend(b"hello\0");
        wire.extend(frame::encode(&[0x15, 0x2a]));
        let port = ScriptedPort::new(&wire);
        let mut link = LinkLayer::new(port);

        let payload = link.receive_frame(None).unwrap().unwrap();
        assert_eq!(payload, vec![0x15, 0x2a]);
    }

    #[test]
    fn receive_frame_nacks_a_stray_control_token_before_the_length_byte() {
        let mut wire = vec![constants::STALL]; // stray high-bit byte, not a real token exchange here
        wire.extend(frame::encode(&[0x15, 0x2a]));
        let port = ScriptedPort::new(&wire);
        let mut link = LinkLayer::new(port);

        let payload = link.receive_frame(None).unwrap().unwrap();
        assert_eq!(payload, vec![0x15, 0x2a]);
        assert!(link.port().outbound.contains(&constants::NACK));
    }
}
