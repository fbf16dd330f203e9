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

//! Device session: owns the negotiated configuration and the
//! asynchronous event state (§4.4), and multiplexes sync replies and
//! async events that share the same wire.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serial::SerialPort;

use crate::config::{Axis, Extruder, Temp};
use crate::constants;
use crate::error::SessionError;
use crate::link::{LinkLayer, SendOutcome};
use crate::sinks::{LoggingMessageSink, MessageSink};

/// Default wait passed to [`Session::block`] by [`Session::blocktemps`]
/// and [`Session::wait_while_flow_controlled`].
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(30);

enum ClassifyOutcome {
    /// A causally significant async event (MOVECB/TEMPCB/CONTINUE/LIMIT).
    Consumed,
    /// A MESSAGE frame: informational only, never worth waking up for.
    Logged,
    /// Not an async event; the caller's expected reply.
    Sync(Vec<u8>),
}

/// Async event bookkeeping, kept separate from [`Session`] so
/// [`Session::send_command`] can lend it to the link layer's
/// `on_async` callback without also borrowing the link itself.
struct AsyncState {
    wait: bool,
    movewait: u32,
    tempwait: HashSet<u8>,
    limits: HashMap<u8, i32>,
    messages: Vec<(i32, Vec<u8>)>,
    message_sink: Box<dyn MessageSink>,
    /// See `DESIGN.md`: the original firmware keys TEMPCB removal off
    /// the reply command byte instead of the channel it names, so a
    /// `waittemp` on most channels never actually clears. Default
    /// `true` reproduces that wire contract bit for bit; set `false`
    /// to key off the channel instead.
    tempcb_uses_reply_code: bool,
}

impl Default for AsyncState {
    fn default() -> Self {
        AsyncState {
            wait: false,
            movewait: 0,
            tempwait: HashSet::new(),
            limits: HashMap::new(),
            messages: Vec::new(),
            message_sink: Box::new(LoggingMessageSink),
            tempcb_uses_reply_code: true,
        }
    }
}

fn classify(state: &mut AsyncState, payload: Vec<u8>) -> ClassifyOutcome {
    match payload.first().copied() {
        Some(constants::REPLY_MOVECB) => {
            let count = payload.get(1).copied().unwrap_or(0);
            state.movewait = state.movewait.saturating_sub(count as u32);
            ClassifyOutcome::Consumed
        }
        Some(constants::REPLY_TEMPCB) => {
            let key = if state.tempcb_uses_reply_code {
                constants::REPLY_TEMPCB
            } else {
                payload.get(1).copied().unwrap_or(constants::REPLY_TEMPCB)
            };
            state.tempwait.remove(&key);
            ClassifyOutcome::Consumed
        }
        Some(constants::REPLY_CONTINUE) => {
            state.wait = false;
            ClassifyOutcome::Consumed
        }
        Some(constants::REPLY_LIMIT) if payload.len() >= 6 => {
            let channel = payload[1];
            let value = i32::from_le_bytes([payload[2], payload[3], payload[4], payload[5]]);
            state.limits.insert(channel, value);
            ClassifyOutcome::Consumed
        }
        Some(constants::REPLY_MESSAGE) if payload.len() >= 5 => {
            let tag = i32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
            let text = payload[5..].to_vec();
            state.message_sink.on_message(tag, &text);
            state.messages.push((tag, text));
            ClassifyOutcome::Logged
        }
        _ => ClassifyOutcome::Sync(payload),
    }
}

/// A live, handshaken connection to one device. Generic over
/// `serial::SerialPort`, mirroring the teacher's `Device<P>`.
pub struct Session<P> {
    link: LinkLayer<P>,
    state: AsyncState,

    pub namelen: u8,
    pub maxaxes: u8,
    pub maxextruders: u8,
    pub maxtemps: u8,

    pub name: Vec<u8>,
    pub num_axes: u8,
    pub num_extruders: u8,
    pub num_temps: u8,
    pub printer_type: u8,
    pub led_pin: u8,
    pub room_temp: f32,
    pub motor_limit: u32,
    pub temp_limit: u32,

    pub axes: Vec<Axis>,
    pub extruders: Vec<Extruder>,
    pub temps: Vec<Temp>,
}

impl<P> Session<P>
where
    P: SerialPort,
{
    /// Wrap an already-booted link. Capability fields start zeroed;
    /// `discovery::discover` fills them in via the LOAD sequence.
    pub fn from_link(link: LinkLayer<P>) -> Self {
        Session {
            link,
            state: AsyncState::default(),
            namelen: 0,
            maxaxes: 0,
            maxextruders: 0,
            maxtemps: 0,
            name: Vec::new(),
            num_axes: 0,
            num_extruders: 0,
            num_temps: 0,
            printer_type: 0,
            led_pin: 0,
            room_temp: 0.0,
            motor_limit: 0,
            temp_limit: 0,
            axes: Vec::new(),
            extruders: Vec::new(),
            temps: Vec::new(),
        }
    }

    pub fn link_mut(&mut self) -> &mut LinkLayer<P> {
        &mut self.link
    }

    pub fn with_message_sink(mut self, sink: Box<dyn MessageSink>) -> Self {
        self.state.message_sink = sink;
        self
    }

    /// See `AsyncState::tempcb_uses_reply_code`.
    pub fn set_tempcb_uses_reply_code(&mut self, value: bool) {
        self.state.tempcb_uses_reply_code = value;
    }

    pub fn wait(&self) -> bool {
        self.state.wait
    }

    pub fn movewait(&self) -> u32 {
        self.state.movewait
    }

    pub fn tempwait(&self) -> &HashSet<u8> {
        &self.state.tempwait
    }

    pub fn mark_tempwait(&mut self, channel: u8) {
        self.state.tempwait.insert(channel);
    }

    pub fn clear_tempwait(&mut self, channel: u8) {
        self.state.tempwait.remove(&channel);
    }

    pub fn limits(&self) -> &HashMap<u8, i32> {
        &self.state.limits
    }

    pub fn messages(&self) -> &[(i32, Vec<u8>)] {
        &self.state.messages
    }

    pub fn begin_movewait(&mut self) {
        self.state.movewait += 1;
    }

    /// Send one command frame, routing any async frames the device
    /// interleaves before its ACK straight into the async state.
    pub fn send_command(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let Session { link, state, .. } = self;
        let outcome = link.send(payload, &mut |p| {
            classify(state, p);
        })?;
        if outcome == SendOutcome::AckedWait {
            state.wait = true;
        }
        Ok(())
    }

    /// Block until the device's reply to the last command sent
    /// arrives, transparently applying and skipping any async frames
    /// that arrive first.
    pub fn recv_sync(&mut self) -> Result<Vec<u8>, SessionError> {
        loop {
            let payload = match self.link.receive_frame(None)? {
                Some(p) => p,
                None => unreachable!("receive_frame with no deadline blocks until a frame arrives"),
            };
            match classify(&mut self.state, payload) {
                ClassifyOutcome::Sync(p) => return Ok(p),
                ClassifyOutcome::Consumed | ClassifyOutcome::Logged => continue,
            }
        }
    }

    /// Wait up to `timeout` for device-originated traffic, applying
    /// whatever async event arrives. With `probe = false`, a timeout
    /// with nothing pending is an error; a sync-class reply arriving
    /// here (which the device should never send unprompted) is always
    /// an error.
    pub fn block(&mut self, timeout: Duration, probe: bool) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.link.receive_frame(Some(deadline))? {
                None => {
                    if probe {
                        return Ok(());
                    }
                    return Err(SessionError::Timeout);
                }
                Some(payload) => {
                    let first = payload.first().copied().unwrap_or(0);
                    match classify(&mut self.state, payload) {
                        ClassifyOutcome::Consumed => return Ok(()),
                        ClassifyOutcome::Logged => continue,
                        ClassifyOutcome::Sync(_) => {
                            return Err(SessionError::Unexpected {
                                expected: "an asynchronous event",
                                got: first,
                            })
                        }
                    }
                }
            }
        }
    }

    /// Block until every outstanding `waittemp` channel has cleared.
    pub fn blocktemps(&mut self) -> Result<(), SessionError> {
        while !self.state.tempwait.is_empty() {
            self.block(DEFAULT_BLOCK_TIMEOUT, true)?;
        }
        Ok(())
    }

    /// Block while the device is asserting flow control (ACKWAIT).
    pub fn wait_while_flow_controlled(&mut self) -> Result<(), SessionError> {
        while self.state.wait {
            self.block(DEFAULT_BLOCK_TIMEOUT, true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame;
    use crate::link::test_support::ScriptedPort;

    fn session_with(inbound: &[u8]) -> Session<ScriptedPort> {
        let port = ScriptedPort::new(inbound);
        Session::from_link(LinkLayer::new(port))
    }

    #[test]
    fn movecb_is_applied_and_not_delivered() {
        let movecb = frame::encode(&[constants::REPLY_MOVECB, 1]);
        let pong = frame::encode(&[constants::REPLY_PONG, 7]);
        let mut wire = movecb;
        wire.extend(pong);
        let mut session = session_with(&wire);
        session.begin_movewait();
        let reply = session.recv_sync().unwrap();
        assert_eq!(reply, vec![constants::REPLY_PONG, 7]);
        assert_eq!(session.movewait(), 0);
    }

    #[test]
    fn message_frame_is_logged_and_skipped() {
        let mut message_payload = vec![constants::REPLY_MESSAGE];
        message_payload.extend_from_slice(&7i32.to_le_bytes());
        message_payload.extend_from_slice(b"hello");
        let message = frame::encode(&message_payload);
        let pong = frame::encode(&[constants::REPLY_PONG, 0]);
        let mut wire = message;
        wire.extend(pong);
        let mut session = session_with(&wire);
        let reply = session.recv_sync().unwrap();
        assert_eq!(reply, vec![constants::REPLY_PONG, 0]);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.messages()[0].0, 7);
    }

    #[test]
    fn block_consumes_continue_and_clears_wait_flag() {
        let continue_frame = frame::encode(&[constants::REPLY_CONTINUE]);
        let mut wire = vec![constants::ACKWAIT];
        wire.extend(continue_frame);
        let mut session = session_with(&wire);

        session.send_command(&[constants::CMD_PING, 0]).unwrap();
        assert!(session.wait());

        session.block(Duration::from_millis(200), false).unwrap();
        assert!(!session.wait());
    }

    #[test]
    fn scenario_readtemp_observes_a_preceding_movecb() {
        let movecb = frame::encode(&[constants::REPLY_MOVECB, 1]);
        let mut temp_payload = vec![constants::REPLY_TEMP];
        temp_payload.extend_from_slice(&42.0f32.to_le_bytes());
        let temp = frame::encode(&temp_payload);

        let mut wire = vec![constants::ACK];
        wire.extend(movecb);
        wire.extend(temp);
        let mut session = session_with(&wire);
        session.begin_movewait();

        let t = session.readtemp(5).unwrap();
        assert!((t - 42.0).abs() < 1e-6);
        assert_eq!(session.movewait(), 0);
    }

    #[test]
    fn tempcb_compat_flag_selects_key() {
        let tempcb = frame::encode(&[constants::REPLY_TEMPCB, 3]);
        let pong = frame::encode(&[constants::REPLY_PONG, 0]);
        let mut wire = tempcb;
        wire.extend(pong);
        let mut session = session_with(&wire);
        session.set_tempcb_uses_reply_code(false);
        session.mark_tempwait(3);
        let _ = session.recv_sync().unwrap();
        assert!(session.tempwait().is_empty());
    }
}
