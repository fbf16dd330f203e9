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

//! Fixed little-endian binary layouts for the LOAD/SAVE/READ/WRITE
//! configuration channels (§4.6). Each record type mirrors a firmware
//! struct byte for byte; the `SIZE` constants are asserted at build
//! time so a layout typo fails to compile rather than silently
//! desyncing the wire format.

use crate::error::DecodeError;

macro_rules! le_f32 {
    ($buf:expr, $off:expr) => {
        f32::from_le_bytes([$buf[$off], $buf[$off + 1], $buf[$off + 2], $buf[$off + 3]])
    };
}

macro_rules! le_u32 {
    ($buf:expr, $off:expr) => {
        u32::from_le_bytes([$buf[$off], $buf[$off + 1], $buf[$off + 2], $buf[$off + 3]])
    };
}

/// A single stepper motor's drive configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motor {
    pub step_pin: u8,
    pub dir_pin: u8,
    pub enable_pin: u8,
    pub steps_per_mm: f32,
    pub max_f_neg: f32,
    pub max_f_pos: f32,
}

impl Motor {
    pub const SIZE: usize = 15;

    pub fn read(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < Self::SIZE {
            return Err(DecodeError::BadLength);
        }
        Ok(Motor {
            step_pin: data[0],
            dir_pin: data[1],
            enable_pin: data[2],
            steps_per_mm: le_f32!(data, 3),
            max_f_neg: le_f32!(data, 7),
            max_f_pos: le_f32!(data, 11),
        })
    }

    pub fn write(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.step_pin;
        buf[1] = self.dir_pin;
        buf[2] = self.enable_pin;
        buf[3..7].copy_from_slice(&self.steps_per_mm.to_le_bytes());
        buf[7..11].copy_from_slice(&self.max_f_neg.to_le_bytes());
        buf[11..15].copy_from_slice(&self.max_f_pos.to_le_bytes());
        buf
    }
}

const _: () = assert!(Motor::SIZE == 3 + 4 * 3);

/// A thermistor/heater channel's thermal model and pin configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temp {
    pub alpha: f32,
    pub beta: f32,
    pub core_c: f32,
    pub shell_c: f32,
    pub transfer: f32,
    pub radiation: f32,
    pub power: f32,
    pub power_pin: u8,
    pub thermistor_pin: u8,
}

impl Temp {
    pub const SIZE: usize = 30;

    pub fn read(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < Self::SIZE {
            return Err(DecodeError::BadLength);
        }
        Ok(Temp {
            alpha: le_f32!(data, 0),
            beta: le_f32!(data, 4),
            core_c: le_f32!(data, 8),
            shell_c: le_f32!(data, 12),
            transfer: le_f32!(data, 16),
            radiation: le_f32!(data, 20),
            power: le_f32!(data, 24),
            power_pin: data[28],
            thermistor_pin: data[29],
        })
    }

    pub fn write(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.alpha.to_le_bytes());
        buf[4..8].copy_from_slice(&self.beta.to_le_bytes());
        buf[8..12].copy_from_slice(&self.core_c.to_le_bytes());
        buf[12..16].copy_from_slice(&self.shell_c.to_le_bytes());
        buf[16..20].copy_from_slice(&self.transfer.to_le_bytes());
        buf[20..24].copy_from_slice(&self.radiation.to_le_bytes());
        buf[24..28].copy_from_slice(&self.power.to_le_bytes());
        buf[28] = self.power_pin;
        buf[29] = self.thermistor_pin;
        buf
    }
}

const _: () = assert!(Temp::SIZE == 4 * 7 + 2);

/// One physical axis: its motor plus limit-switch pins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Axis {
    pub motor: Motor,
    pub limit_min_pin: u8,
    pub limit_max_pin: u8,
}

impl Axis {
    pub const SIZE: usize = Motor::SIZE + 2;

    pub fn read(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < Self::SIZE {
            return Err(DecodeError::BadLength);
        }
        let motor = Motor::read(&data[..Motor::SIZE])?;
        Ok(Axis {
            motor,
            limit_min_pin: data[Motor::SIZE],
            limit_max_pin: data[Motor::SIZE + 1],
        })
    }

    pub fn write(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..Motor::SIZE].copy_from_slice(&self.motor.write());
        buf[Motor::SIZE] = self.limit_min_pin;
        buf[Motor::SIZE + 1] = self.limit_max_pin;
        buf
    }
}

const _: () = assert!(Axis::SIZE == 17);

/// An extruder: its motor, heater channel and filament geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extruder {
    pub motor: Motor,
    pub temp: Temp,
    pub filament_heat: f32,
    pub nozzle_size: f32,
    pub filament_size: f32,
}

impl Extruder {
    pub const SIZE: usize = Motor::SIZE + Temp::SIZE + 12;

    pub fn read(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < Self::SIZE {
            return Err(DecodeError::BadLength);
        }
        let motor = Motor::read(&data[..Motor::SIZE])?;
        let temp = Temp::read(&data[Motor::SIZE..Motor::SIZE + Temp::SIZE])?;
        let tail = Motor::SIZE + Temp::SIZE;
        Ok(Extruder {
            motor,
            temp,
            filament_heat: le_f32!(data, tail),
            nozzle_size: le_f32!(data, tail + 4),
            filament_size: le_f32!(data, tail + 8),
        })
    }

    pub fn write(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..Motor::SIZE].copy_from_slice(&self.motor.write());
        buf[Motor::SIZE..Motor::SIZE + Temp::SIZE].copy_from_slice(&self.temp.write());
        let tail = Motor::SIZE + Temp::SIZE;
        buf[tail..tail + 4].copy_from_slice(&self.filament_heat.to_le_bytes());
        buf[tail + 4..tail + 8].copy_from_slice(&self.nozzle_size.to_le_bytes());
        buf[tail + 8..tail + 12].copy_from_slice(&self.filament_size.to_le_bytes());
        buf
    }
}

const _: () = assert!(Extruder::SIZE == 57);

/// The global configuration record (channel 1): printer name plus the
/// fixed tail of machine-wide settings. Variable-length because the
/// name occupies the first `namelen` bytes, a value the device reports
/// during capability negotiation (§4.5) and that this type takes as a
/// parameter rather than hardcoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: Vec<u8>,
    pub num_axes: u8,
    pub num_extruders: u8,
    pub num_temps: u8,
    pub printer_type: u8,
    pub led_pin: u8,
    pub room_temp: f32,
    pub motor_limit: u32,
    pub temp_limit: u32,
}

impl Global {
    /// Fixed tail following the name: 5 bytes + f32 + u32 + u32.
    pub const TAIL_SIZE: usize = 5 + 4 + 4 + 4;

    pub fn read(namelen: usize, data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < namelen + Self::TAIL_SIZE {
            return Err(DecodeError::BadLength);
        }
        let name = data[..namelen].to_vec();
        let tail = &data[namelen..];
        Ok(Global {
            name,
            num_axes: tail[0],
            num_extruders: tail[1],
            num_temps: tail[2],
            printer_type: tail[3],
            led_pin: tail[4],
            room_temp: le_f32!(tail, 5),
            motor_limit: le_u32!(tail, 9),
            temp_limit: le_u32!(tail, 13),
        })
    }

    /// Serialize with the name padded or truncated to exactly `namelen`
    /// bytes, matching the firmware's fixed-width name field.
    pub fn write(&self, namelen: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(namelen + Self::TAIL_SIZE);
        let mut name = self.name.clone();
        name.resize(namelen, 0);
        name.truncate(namelen);
        buf.extend_from_slice(&name);
        buf.push(self.num_axes);
        buf.push(self.num_extruders);
        buf.push(self.num_temps);
        buf.push(self.printer_type);
        buf.push(self.led_pin);
        buf.extend_from_slice(&self.room_temp.to_le_bytes());
        buf.extend_from_slice(&self.motor_limit.to_le_bytes());
        buf.extend_from_slice(&self.temp_limit.to_le_bytes());
        buf
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_motor() -> Motor {
        Motor {
            step_pin: 2,
            dir_pin: 3,
            enable_pin: 4,
            steps_per_mm: 80.0,
            max_f_neg: -200.0,
            max_f_pos: 200.0,
        }
    }

    fn sample_temp() -> Temp {
        Temp {
            alpha: 1.0,
            beta: 2.0,
            core_c: 3.0,
            shell_c: 4.0,
            transfer: 5.0,
            radiation: 6.0,
            power: 7.0,
            power_pin: 9,
            thermistor_pin: 10,
        }
    }

    #[test]
    fn motor_roundtrip() {
        let m = sample_motor();
        assert_eq!(Motor::read(&m.write()).unwrap(), m);
    }

    #[test]
    fn temp_roundtrip() {
        let t = sample_temp();
        assert_eq!(Temp::read(&t.write()).unwrap(), t);
    }

    #[test]
    fn axis_roundtrip() {
        let a = Axis {
            motor: sample_motor(),
            limit_min_pin: 11,
            limit_max_pin: 12,
        };
        assert_eq!(Axis::read(&a.write()).unwrap(), a);
    }

    #[test]
    fn extruder_roundtrip() {
        let e = Extruder {
            motor: sample_motor(),
            temp: sample_temp(),
            filament_heat: 20.0,
            nozzle_size: 0.4,
            filament_size: 1.75,
        };
        assert_eq!(Extruder::read(&e.write()).unwrap(), e);
    }

    #[test]
    fn global_roundtrip_with_name_padding() {
        let g = Global {
            name: b"franklin".to_vec(),
            num_axes: 3,
            num_extruders: 1,
            num_temps: 1,
            printer_type: 0,
            led_pin: 13,
            room_temp: 21.5,
            motor_limit: 1000,
            temp_limit: 500,
        };
        let wire = g.write(16);
        assert_eq!(wire.len(), 16 + Global::TAIL_SIZE);
        let back = Global::read(16, &wire).unwrap();
        assert_eq!(&back.name[..8], &g.name[..]);
        assert_eq!(back.num_axes, g.num_axes);
        assert_eq!(back.room_temp, g.room_temp);
        assert_eq!(back.motor_limit, g.motor_limit);
    }

    #[test]
    fn read_rejects_short_buffers() {
        assert!(matches!(Motor::read(&[0u8; 10]), Err(DecodeError::BadLength)));
        assert!(matches!(Temp::read(&[0u8; 29]), Err(DecodeError::BadLength)));
    }
}
