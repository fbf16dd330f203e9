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

//! Pluggable sinks for out-of-band text the device emits.
//!
//! Firmware DEBUG strings and MESSAGE frames never affect protocol
//! state (§4.3/§4.4); they're routed here instead of being printed
//! unconditionally, per the soft spot noted in §9.

/// Receives NUL/timeout-terminated DEBUG text (§4.3).
pub trait DebugSink: Send {
    fn on_debug(&mut self, text: &[u8]);
}

/// Receives `(tag, text)` MESSAGE frames (§4.4).
pub trait MessageSink: Send {
    fn on_message(&mut self, tag: i32, text: &[u8]);
}

/// Default [`DebugSink`]: forwards to the `log` facade at debug level.
#[derive(Debug, Default)]
pub struct LoggingDebugSink;

impl DebugSink for LoggingDebugSink {
    fn on_debug(&mut self, text: &[u8]) {
        log::debug!("device debug: {}", String::from_utf8_lossy(text));
    }
}

/// Default [`MessageSink`]: forwards to the `log` facade at info level.
#[derive(Debug, Default)]
pub struct LoggingMessageSink;

impl MessageSink for LoggingMessageSink {
    fn on_message(&mut self, tag: i32, text: &[u8]) {
        log::info!("device message {}: {}", tag, String::from_utf8_lossy(text));
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    #[derive(Default)]
    pub struct CollectingDebugSink(pub Vec<Vec<u8>>);

    impl DebugSink for CollectingDebugSink {
        fn on_debug(&mut self, text: &[u8]) {
            self.0.push(text.to_vec());
        }
    }

    #[derive(Default)]
    pub struct CollectingMessageSink(pub Vec<(i32, Vec<u8>)>);

    impl MessageSink for CollectingMessageSink {
        fn on_message(&mut self, tag: i32, text: &[u8]) {
            self.0.push((tag, text.to_vec()));
        }
    }
}
