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

//! Command facade (§4.4): the methods a caller actually reaches for —
//! motion, temperature, configuration channels and housekeeping.

use std::collections::BTreeMap;

use serial::SerialPort;

use crate::config::{Axis, Extruder, Global, Motor, Temp};
use crate::constants;
use crate::error::SessionError;
use crate::session::Session;

fn expect(reply: &[u8], code: u8, what: &'static str) -> Result<(), SessionError> {
    match reply.first() {
        Some(&b) if b == code => Ok(()),
        Some(&b) => Err(SessionError::Unexpected { expected: what, got: b }),
        None => Err(SessionError::Unexpected { expected: what, got: 0 }),
    }
}

/// The channel numbering used by LOAD/SAVE/READ/WRITE: 1 is the global
/// record, then axes, then extruders, then temps (§4.6).
pub fn channel_kind(channel: u8, maxaxes: u8, maxextruders: u8) -> ChannelKind {
    if channel == 1 {
        ChannelKind::Global
    } else if channel < 2 + maxaxes {
        ChannelKind::Axis(channel - 2)
    } else if channel < 2 + maxaxes + maxextruders {
        ChannelKind::Extruder(channel - 2 - maxaxes)
    } else {
        ChannelKind::Temp(channel - 2 - maxaxes - maxextruders)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Global,
    Axis(u8),
    Extruder(u8),
    Temp(u8),
}

/// A borrowing view onto one axis, so `get_current_pos`/
/// `set_current_pos` don't need the unsafe-in-Rust back-reference the
/// original used (an `Axis` holding a pointer to its owning printer).
pub struct AxisHandle<'a, P> {
    session: &'a mut Session<P>,
    index: u8,
}

impl<'a, P> AxisHandle<'a, P>
where
    P: SerialPort,
{
    pub fn set_current_pos(&mut self, pos: i32) -> Result<(), SessionError> {
        self.session.set_pos(2 + self.index, pos)
    }

    pub fn get_current_pos(&mut self) -> Result<i32, SessionError> {
        self.session.get_pos(2 + self.index)
    }
}

impl<P> Session<P>
where
    P: SerialPort,
{
    pub fn axis(&mut self, index: u8) -> AxisHandle<'_, P> {
        AxisHandle { session: self, index }
    }

    // -- Internal commands (§4.5) -------------------------------------

    pub fn begin(&mut self) -> Result<(), SessionError> {
        let mut payload = vec![constants::CMD_BEGIN];
        payload.extend_from_slice(&0.0f32.to_le_bytes());
        self.send_command(&payload)?;
        let reply = self.recv_sync()?;
        expect(&reply, constants::REPLY_START, "START")?;
        Ok(())
    }

    pub fn read(&mut self, channel: u8) -> Result<Vec<u8>, SessionError> {
        self.send_command(&[constants::CMD_READ, channel])?;
        let reply = self.recv_sync()?;
        expect(&reply, constants::REPLY_DATA, "DATA")?;
        Ok(reply[1..].to_vec())
    }

    // -- Motion ---------------------------------------------------------

    /// Move the named axes/extruder channels. `axes` maps axis index to
    /// target position; `extruder` is an optional target for extruder
    /// `which`. `f0`/`f1` bound the move's start/end feedrate fraction
    /// (defaulting to unlimited, matching the firmware's `inf`).
    #[allow(clippy::too_many_arguments)]
    pub fn goto(
        &mut self,
        axes: &BTreeMap<u8, f32>,
        extruder: Option<(u8, f32)>,
        f0: Option<f32>,
        f1: Option<f32>,
        callback: bool,
    ) -> Result<(), SessionError> {
        self.wait_while_flow_controlled()?;

        let f0 = f0.unwrap_or(f32::INFINITY);
        let f1 = f1.unwrap_or(f0);

        let total_channels = 2 + self.num_axes as usize + self.num_extruders as usize;
        let mut targets = vec![0u8; ((total_channels + 7) / 8) + 1];
        targets[0] |= 1 << 0;
        targets[0] |= 1 << 1;

        let mut args = Vec::new();
        args.extend_from_slice(&f0.to_le_bytes());
        args.extend_from_slice(&f1.to_le_bytes());

        for (&axis, &pos) in axes {
            debug_assert!((axis as usize) < self.num_axes as usize);
            let bit = axis as usize + 2;
            targets[bit >> 3] |= 1 << (bit & 0x7);
            args.extend_from_slice(&pos.to_le_bytes());
        }
        if let Some((which, pos)) = extruder {
            let bit = 2 + self.num_axes as usize + which as usize;
            targets[bit >> 3] |= 1 << (bit & 0x7);
            args.extend_from_slice(&pos.to_le_bytes());
        }

        if callback {
            self.begin_movewait();
        }
        let mut payload = vec![if callback {
            constants::CMD_GOTOCB
        } else {
            constants::CMD_GOTO
        }];
        payload.extend_from_slice(&targets);
        payload.extend_from_slice(&args);
        self.send_command(&payload)
    }

    pub fn run_axis(&mut self, which: u8, speed: f32) -> Result<(), SessionError> {
        self.run(2 + which, speed)
    }

    pub fn run_extruder(&mut self, which: u8, speed: f32) -> Result<(), SessionError> {
        self.run(2 + self.maxaxes + which, speed)
    }

    /// `speed` is a signed rate fraction; `0.0` stops the channel.
    pub fn run(&mut self, channel: u8, speed: f32) -> Result<(), SessionError> {
        let mut payload = vec![constants::CMD_RUN, channel];
        payload.extend_from_slice(&speed.to_le_bytes());
        self.send_command(&payload)
    }

    pub fn sleep_axis(&mut self, which: u8, sleeping: bool) -> Result<(), SessionError> {
        self.sleep(2 + which, sleeping)
    }

    pub fn sleep_extruder(&mut self, which: u8, sleeping: bool) -> Result<(), SessionError> {
        self.sleep(2 + self.maxaxes + which, sleeping)
    }

    pub fn sleep(&mut self, channel: u8, sleeping: bool) -> Result<(), SessionError> {
        let flag = (channel & 0x7f) | if sleeping { 0x80 } else { 0 };
        self.send_command(&[constants::CMD_SLEEP, flag])
    }

    pub fn setpos(&mut self, channel: u8, pos: i32) -> Result<(), SessionError> {
        self.set_pos(channel, pos)
    }

    fn set_pos(&mut self, channel: u8, pos: i32) -> Result<(), SessionError> {
        let mut payload = vec![constants::CMD_SETPOS, channel];
        payload.extend_from_slice(&pos.to_le_bytes());
        self.send_command(&payload)
    }

    fn get_pos(&mut self, channel: u8) -> Result<i32, SessionError> {
        self.send_command(&[constants::CMD_GETPOS, channel])?;
        let reply = self.recv_sync()?;
        expect(&reply, constants::REPLY_POS, "POS")?;
        Ok(i32::from_le_bytes([reply[1], reply[2], reply[3], reply[4]]))
    }

    // -- Temperature ------------------------------------------------------

    pub fn settemp_extruder(&mut self, which: u8, temp: f32) -> Result<(), SessionError> {
        self.settemp(2 + self.maxaxes + which, temp)
    }

    pub fn settemp_temp(&mut self, which: u8, temp: f32) -> Result<(), SessionError> {
        self.settemp(2 + self.maxaxes + self.maxextruders + which, temp)
    }

    pub fn settemp(&mut self, channel: u8, temp: f32) -> Result<(), SessionError> {
        let mut payload = vec![constants::CMD_SETTEMP, channel];
        payload.extend_from_slice(&temp.to_le_bytes());
        self.send_command(&payload)
    }

    pub fn waittemp_extruder(&mut self, which: u8, min: Option<f32>, max: Option<f32>) -> Result<(), SessionError> {
        self.waittemp(2 + self.maxaxes + which, min, max)
    }

    pub fn waittemp_temp(&mut self, which: u8, min: Option<f32>, max: Option<f32>) -> Result<(), SessionError> {
        self.waittemp(2 + self.maxaxes + self.maxextruders + which, min, max)
    }

    /// `None` bounds disable that side of the window (sent as NaN, the
    /// firmware's own "don't care" sentinel); passing both as `None`
    /// cancels any outstanding wait on this channel.
    pub fn waittemp(&mut self, channel: u8, min: Option<f32>, max: Option<f32>) -> Result<(), SessionError> {
        let min = min.unwrap_or(f32::NAN);
        let max = max.unwrap_or(f32::NAN);
        let mut payload = vec![constants::CMD_WAITTEMP, channel];
        payload.extend_from_slice(&min.to_le_bytes());
        payload.extend_from_slice(&max.to_le_bytes());
        self.send_command(&payload)?;
        if min.is_nan() && max.is_nan() {
            self.clear_tempwait(channel);
        } else {
            self.mark_tempwait(channel);
        }
        Ok(())
    }

    pub fn readtemp(&mut self, channel: u8) -> Result<f32, SessionError> {
        self.send_command(&[constants::CMD_READTEMP, channel])?;
        let reply = self.recv_sync()?;
        expect(&reply, constants::REPLY_TEMP, "TEMP")?;
        Ok(f32::from_le_bytes([reply[1], reply[2], reply[3], reply[4]]))
    }

    // -- Configuration channels (§4.6) ------------------------------------

    pub fn load_variables(&mut self) -> Result<(), SessionError> {
        self.load(1)
    }

    pub fn load_axis(&mut self, which: u8) -> Result<(), SessionError> {
        self.load(2 + which)
    }

    pub fn load_extruder(&mut self, which: u8) -> Result<(), SessionError> {
        self.load(2 + self.maxaxes + which)
    }

    pub fn load_temp(&mut self, which: u8) -> Result<(), SessionError> {
        self.load(2 + self.maxaxes + self.maxextruders + which)
    }

    pub fn load(&mut self, channel: u8) -> Result<(), SessionError> {
        self.send_command(&[constants::CMD_LOAD, channel])?;
        match channel_kind(channel, self.maxaxes, self.maxextruders) {
            ChannelKind::Global => {
                let data = self.read(1)?;
                let global = Global::read(self.namelen as usize, &data)
                    .map_err(|_| SessionError::Unexpected { expected: "global record", got: data.first().copied().unwrap_or(0) })?;
                self.name = global.name;
                self.num_axes = global.num_axes;
                self.num_extruders = global.num_extruders;
                self.num_temps = global.num_temps;
                self.printer_type = global.printer_type;
                self.led_pin = global.led_pin;
                self.room_temp = global.room_temp;
                self.motor_limit = global.motor_limit;
                self.temp_limit = global.temp_limit;
            }
            ChannelKind::Axis(idx) => {
                let data = self.read(channel)?;
                let axis = Axis::read(&data)
                    .map_err(|_| SessionError::Unexpected { expected: "axis record", got: 0 })?;
                set_at(&mut self.axes, idx as usize, axis);
            }
            ChannelKind::Extruder(idx) => {
                let data = self.read(channel)?;
                let extruder = Extruder::read(&data)
                    .map_err(|_| SessionError::Unexpected { expected: "extruder record", got: 0 })?;
                set_at(&mut self.extruders, idx as usize, extruder);
            }
            ChannelKind::Temp(idx) => {
                let data = self.read(channel)?;
                let temp = Temp::read(&data)
                    .map_err(|_| SessionError::Unexpected { expected: "temp record", got: 0 })?;
                set_at(&mut self.temps, idx as usize, temp);
            }
        }
        Ok(())
    }

    /// Load every channel (global, then each axis/extruder/temp).
    pub fn load_all(&mut self) -> Result<(), SessionError> {
        let last = 2 + self.maxaxes + self.maxextruders + self.maxtemps;
        for channel in 1..last {
            self.load(channel)?;
        }
        Ok(())
    }

    pub fn save_variables(&mut self) -> Result<(), SessionError> {
        self.save(1)
    }

    pub fn save_axis(&mut self, which: u8) -> Result<(), SessionError> {
        self.save(2 + which)
    }

    pub fn save_extruder(&mut self, which: u8) -> Result<(), SessionError> {
        self.save(2 + self.maxaxes + which)
    }

    pub fn save_temp(&mut self, which: u8) -> Result<(), SessionError> {
        self.save(2 + self.maxaxes + self.maxextruders + which)
    }

    pub fn save(&mut self, channel: u8) -> Result<(), SessionError> {
        self.send_command(&[constants::CMD_SAVE, channel])
    }

    pub fn save_all(&mut self) -> Result<(), SessionError> {
        let last = 2 + self.maxaxes + self.maxextruders + self.maxtemps;
        for channel in 1..last {
            self.save(channel)?;
        }
        Ok(())
    }

    pub fn write_variables(&mut self) -> Result<(), SessionError> {
        let global = Global {
            name: self.name.clone(),
            num_axes: self.num_axes,
            num_extruders: self.num_extruders,
            num_temps: self.num_temps,
            printer_type: self.printer_type,
            led_pin: self.led_pin,
            room_temp: self.room_temp,
            motor_limit: self.motor_limit,
            temp_limit: self.temp_limit,
        };
        let data = global.write(self.namelen as usize);
        let mut payload = vec![constants::CMD_WRITE, 1];
        payload.extend_from_slice(&data);
        self.send_command(&payload)
    }

    pub fn write_axis(&mut self, which: u8) -> Result<(), SessionError> {
        let data = self.axes[which as usize].write();
        let mut payload = vec![constants::CMD_WRITE, 2 + which];
        payload.extend_from_slice(&data);
        self.send_command(&payload)
    }

    pub fn write_extruder(&mut self, which: u8) -> Result<(), SessionError> {
        let data = self.extruders[which as usize].write();
        let mut payload = vec![constants::CMD_WRITE, 2 + self.maxaxes + which];
        payload.extend_from_slice(&data);
        self.send_command(&payload)
    }

    pub fn write_temp(&mut self, which: u8) -> Result<(), SessionError> {
        let data = self.temps[which as usize].write();
        let mut payload = vec![constants::CMD_WRITE, 2 + self.maxaxes + self.maxextruders + which];
        payload.extend_from_slice(&data);
        self.send_command(&payload)
    }

    pub fn write(&mut self, channel: u8) -> Result<(), SessionError> {
        match channel_kind(channel, self.maxaxes, self.maxextruders) {
            ChannelKind::Global => self.write_variables(),
            ChannelKind::Axis(idx) => self.write_axis(idx),
            ChannelKind::Extruder(idx) => self.write_extruder(idx),
            ChannelKind::Temp(idx) => self.write_temp(idx),
        }
    }

    pub fn write_all(&mut self) -> Result<(), SessionError> {
        let last = 2 + self.maxaxes + self.maxextruders + self.maxtemps;
        for channel in 1..last {
            self.write(channel)?;
        }
        Ok(())
    }

    // -- Housekeeping -----------------------------------------------------

    pub fn pause(&mut self, pausing: bool) -> Result<(), SessionError> {
        self.send_command(&[constants::CMD_PAUSE, pausing as u8])
    }

    pub fn ping(&mut self, arg: u8) -> Result<(), SessionError> {
        self.send_command(&[constants::CMD_PING, arg])?;
        let reply = self.recv_sync()?;
        if reply.len() != 2 || reply[0] != constants::REPLY_PONG || reply[1] != arg {
            return Err(SessionError::Unexpected {
                expected: "PONG echoing the ping argument",
                got: reply.first().copied().unwrap_or(0),
            });
        }
        Ok(())
    }
}

/// `load`/`load_all` always visit channels in ascending order, so this
/// only ever grows `vec` by exactly one slot at a time.
fn set_at<T>(vec: &mut Vec<T>, idx: usize, value: T) {
    match idx.cmp(&vec.len()) {
        std::cmp::Ordering::Less => vec[idx] = value,
        std::cmp::Ordering::Equal => vec.push(value),
        std::cmp::Ordering::Greater => panic!("config channel loaded out of order"),
    }
}

#[cfg(test)]
mod test {
    use std::convert::TryInto;

    use super::*;
    use crate::frame;
    use crate::link::test_support::ScriptedPort;
    use crate::link::LinkLayer;

    fn session_with(inbound: &[u8]) -> Session<ScriptedPort> {
        let port = ScriptedPort::new(inbound);
        Session::from_link(LinkLayer::new(port))
    }

    #[test]
    fn channel_kind_partitions_the_numbering() {
        assert_eq!(channel_kind(1, 3, 1), ChannelKind::Global);
        assert_eq!(channel_kind(2, 3, 1), ChannelKind::Axis(0));
        assert_eq!(channel_kind(4, 3, 1), ChannelKind::Axis(2));
        assert_eq!(channel_kind(5, 3, 1), ChannelKind::Extruder(0));
        assert_eq!(channel_kind(6, 3, 1), ChannelKind::Temp(0));
    }

    fn ack_then(frame: Vec<u8>) -> Vec<u8> {
        let mut wire = vec![constants::ACK];
        wire.extend(frame);
        wire
    }

    #[test]
    fn ping_validates_echoed_argument() {
        let wire = ack_then(frame::encode(&[constants::REPLY_PONG, 0x2a]));
        let mut session = session_with(&wire);
        session.ping(0x2a).unwrap();
    }

    #[test]
    fn ping_rejects_mismatched_echo() {
        let wire = ack_then(frame::encode(&[constants::REPLY_PONG, 0x00]));
        let mut session = session_with(&wire);
        let err = session.ping(0x2a).unwrap_err();
        assert!(matches!(err, SessionError::Unexpected { .. }));
    }

    #[test]
    fn waittemp_nan_bounds_clear_tempwait() {
        // waittemp only sends a command (ACKed here); it never waits for
        // a reply, so the scripted port just needs the bare ACK.
        let mut session = session_with(&[constants::ACK]);
        session.mark_tempwait(5);
        session.waittemp(5, None, None).unwrap();
        assert!(session.tempwait().is_empty());
    }

    #[test]
    fn readtemp_decodes_f32_reply() {
        let mut payload = vec![constants::REPLY_TEMP];
        payload.extend_from_slice(&210.5f32.to_le_bytes());
        let wire = ack_then(frame::encode(&payload));
        let mut session = session_with(&wire);
        let t = session.readtemp(5).unwrap();
        assert!((t - 210.5).abs() < 1e-6);
    }

    #[test]
    fn scenario_ping_carries_the_command_and_argument_on_the_wire() {
        let wire = ack_then(frame::encode(&[constants::REPLY_PONG, 0x2a]));
        let mut session = session_with(&wire);
        session.ping(0x2a).unwrap();
        let outbound = &session.link_mut().port().outbound;
        assert_eq!(outbound[1], constants::CMD_PING);
        assert_eq!(outbound[2], 0x2a);
    }

    #[test]
    fn scenario_getpos_observes_a_preceding_limit_hit() {
        let mut limit_payload = vec![constants::REPLY_LIMIT, 2];
        limit_payload.extend_from_slice(&1_048_576i32.to_le_bytes());
        let limit = frame::encode(&limit_payload);

        let mut pos_payload = vec![constants::REPLY_POS];
        pos_payload.extend_from_slice(&0i32.to_le_bytes());
        let pos = frame::encode(&pos_payload);

        let mut wire = ack_then(limit);
        wire.extend(pos);
        let mut session = session_with(&wire);

        let mut handle = session.axis(0);
        let current = handle.get_current_pos().unwrap();
        assert_eq!(current, 0);
        assert_eq!(session.limits().get(&2), Some(&1_048_576));
    }

    #[test]
    fn scenario_goto_bitmap_sets_speed_and_axis_bits() {
        let mut session = session_with(&[constants::ACK]);
        session.num_axes = 3;
        session.num_extruders = 1;
        session.maxaxes = 3;

        let mut axes = BTreeMap::new();
        axes.insert(0, 10.0f32);
        axes.insert(2, -3.5f32);
        session.goto(&axes, None, None, None, false).unwrap();

        let outbound = &session.link_mut().port().outbound;
        // Skip the frame's length byte and command byte to reach the bitmap.
        let bitmap_start = 2;
        assert_eq!(outbound[bitmap_start], 0b0001_0111); // bits 0,1,2,4
        assert_eq!(outbound[bitmap_start + 1], 0);

        let args_start = bitmap_start + 2;
        let f0 = f32::from_le_bytes(outbound[args_start..args_start + 4].try_into().unwrap());
        let f1 = f32::from_le_bytes(outbound[args_start + 4..args_start + 8].try_into().unwrap());
        assert!(f0.is_infinite() && f0.is_sign_positive());
        assert_eq!(f1, f0);
        let axis0 = f32::from_le_bytes(outbound[args_start + 8..args_start + 12].try_into().unwrap());
        let axis2 = f32::from_le_bytes(outbound[args_start + 12..args_start + 16].try_into().unwrap());
        assert_eq!(axis0, 10.0);
        assert_eq!(axis2, -3.5);
    }
}
