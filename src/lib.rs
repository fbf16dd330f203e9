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

//! # Franklin printer link driver
//!
//! A host-side driver for the Franklin 3D-printer firmware's serial
//! link: device discovery and the boot handshake, a flip-flop
//! sequenced reliable transport, and a command facade covering motion,
//! temperature control and the device's persisted configuration
//! channels.
//!
//! Typical use starts with [`discovery::discover`] to find and
//! hand-shake with a connected device, then drives it through the
//! methods on the returned [`session::Session`]:
//!
//! ```no_run
//! use franklin_link::discovery::{self, SystemPortProvider};
//!
//! let mut provider = SystemPortProvider::new();
//! let mut session = discovery::discover(&mut provider, None, 10)?;
//! session.ping(0)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod command;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod link;
pub mod ports;
pub mod session;
pub mod sinks;

pub use command::{AxisHandle, ChannelKind};
pub use error::{ControlToken, DecodeError, DiscoveryError, LinkError, SessionError};
pub use link::{LinkLayer, SendOutcome};
pub use session::Session;
pub use sinks::{DebugSink, LoggingDebugSink, LoggingMessageSink, MessageSink};
