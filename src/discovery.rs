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

//! Device discovery and the boot handshake (§4.5): enumerate candidate
//! serial ports, reset each one, wait for the firmware's boot token,
//! then negotiate capabilities and load the full configuration.

use std::io;
use std::time::{Duration, Instant};

use serial::SerialPort;

use crate::error::DiscoveryError;
use crate::link::LinkLayer;
use crate::ports::PortInfo;
use crate::session::Session;

/// Settle time either side of a DTR toggle.
pub const RESET_SETTLE: Duration = Duration::from_millis(100);
/// How long to wait for the firmware's boot INIT token after reset.
pub const BOOT_TIMEOUT: Duration = Duration::from_secs(3);

/// Produces the serial ports discovery should try, in order. Lets
/// tests substitute scripted ports for the real `/sys/class/tty` scan.
pub trait PortProvider {
    type Port: SerialPort;

    fn candidates(&mut self) -> io::Result<Vec<Self::Port>>;
}

/// Name fragments excluded by default (§6 "Discovery sink"): the
/// system console and the generic motherboard UARTs that are never a
/// printer, matched case-insensitively as substrings of the port's
/// short name (`PortInfo::name`, e.g. `ttyS0`, not the full device
/// path).
pub const DEFAULT_BLACKLIST: &[&str] = &["console", "ttys"];

fn is_blacklisted(name: &std::ffi::OsStr, blacklist: &[String]) -> bool {
    let name = name.to_string_lossy().to_lowercase();
    blacklist.iter().any(|pattern| name.contains(pattern.as_str()))
}

/// Enumerates real serial ports on the host via [`PortInfo::list_all`]
/// and opens each with the printer's fixed line settings, skipping any
/// whose name matches the blacklist.
pub struct SystemPortProvider {
    baud_rate: serial::BaudRate,
    blacklist: Vec<String>,
}

impl SystemPortProvider {
    pub fn new() -> Self {
        SystemPortProvider {
            baud_rate: serial::BaudRate::Baud115200,
            blacklist: DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: serial::BaudRate) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Replace the default console/generic-UART name blacklist.
    pub fn with_blacklist(mut self, blacklist: Vec<String>) -> Self {
        self.blacklist = blacklist;
        self
    }
}

impl Default for SystemPortProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PortProvider for SystemPortProvider {
    type Port = serial::SystemPort;

    fn candidates(&mut self) -> io::Result<Vec<Self::Port>> {
        let mut ports = Vec::new();
        for info in PortInfo::list_all() {
            if is_blacklisted(&info.name, &self.blacklist) {
                continue;
            }
            let mut port = match serial::open(&info.port) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let settings = serial::PortSettings {
                baud_rate: self.baud_rate,
                char_size: serial::CharSize::Bits8,
                parity: serial::Parity::ParityNone,
                stop_bits: serial::StopBits::Stop1,
                flow_control: serial::FlowControl::FlowNone,
            };
            if port.configure(&settings).is_err() {
                continue;
            }
            ports.push(port);
        }
        Ok(ports)
    }
}

/// Discover and hand-shake with a device, loading its full
/// configuration (every axis, extruder and temp channel).
///
/// `name_filter`, when given, is matched as a literal prefix against
/// the device's reported name (§4.5); candidates that boot but don't
/// match are left connected-but-discarded, same as the original's
/// `re.match` gate.
pub fn discover<PP>(
    provider: &mut PP,
    name_filter: Option<&str>,
    retry_limit: u32,
) -> Result<Session<PP::Port>, DiscoveryError>
where
    PP: PortProvider,
{
    for port in provider.candidates()? {
        match try_candidate(port, name_filter, retry_limit) {
            Ok(session) => return Ok(session),
            Err(_) => continue,
        }
    }
    Err(DiscoveryError::NotFound)
}

fn try_candidate<P>(
    port: P,
    name_filter: Option<&str>,
    retry_limit: u32,
) -> Result<Session<P>, DiscoveryError>
where
    P: SerialPort,
{
    let mut link = LinkLayer::new(port).with_retry_limit(retry_limit);

    link.reset_via_dtr(RESET_SETTLE)?;
    link.drain_input()?;

    let deadline = Instant::now() + BOOT_TIMEOUT;
    if !link.wait_for_boot(deadline)? {
        return Err(DiscoveryError::NotFound);
    }
    link.use_default_timeout()?;

    let mut session = Session::from_link(link);
    session.begin()?;

    let caps = session.read(0)?;
    if caps.len() != 4 {
        return Err(DiscoveryError::Session(
            crate::error::SessionError::Unexpected {
                expected: "4-byte capability tuple",
                got: caps.first().copied().unwrap_or(0),
            },
        ));
    }
    session.namelen = caps[0];
    session.maxaxes = caps[1];
    session.maxextruders = caps[2];
    session.maxtemps = caps[3];

    session.load_variables()?;

    if let Some(prefix) = name_filter {
        let name = String::from_utf8_lossy(&session.name);
        if !name.starts_with(prefix) {
            return Err(DiscoveryError::NotFound);
        }
    }

    for axis in 0..session.maxaxes {
        session.load_axis(axis)?;
    }
    for extruder in 0..session.maxextruders {
        session.load_extruder(extruder)?;
    }
    for temp in 0..session.maxtemps {
        session.load_temp(temp)?;
    }

    Ok(session)
}
