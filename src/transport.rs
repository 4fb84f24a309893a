//! Byte-level serial link and wire framing.
//!
//! Commands go out as ASCII terminated by a carriage return and responses are
//! read back one byte at a time until the same terminator arrives.

use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

/// Terminator for both commands and responses.
pub const TERMINATOR: u8 = b'\r';

/// How long a single serial read waits before it is retried.
const READ_POLL: Duration = Duration::from_millis(100);

/// Blocking byte channel to the instrument.
pub trait Transport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Reads until `terminator` is seen and returns everything before it.
    fn read_until(&mut self, terminator: u8) -> io::Result<Vec<u8>>;

    /// Waits between commands so the instrument's command buffer can settle.
    fn pause(&mut self, duration: Duration) {
        thread::sleep(duration);
    }

    fn close(&mut self) -> io::Result<()>;
}

/// Adds the wire terminator to a command.
pub fn frame(command: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(command.len() + 1);
    bytes.extend_from_slice(command.as_bytes());
    bytes.push(TERMINATOR);
    bytes
}

/// Turns a raw response into text, dropping a trailing terminator and
/// converting any embedded carriage returns into newlines.
pub fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(&[TERMINATOR]).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).replace('\r', "\n")
}

/// A serial port configured for the instrument: 8 data bits, no parity, one
/// stop bit and no flow control.
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn open(name: &str, baud_rate: u32) -> io::Result<Self> {
        let mut port = serialport::new(name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_POLL)
            .open()?;

        // the instrument expects RTS held low
        port.write_request_to_send(false)?;

        log::info!("opened {} at {} baud", name, baud_rate);
        Ok(Self {
            name: name.to_string(),
            port: Some(port),
        })
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn read_until(&mut self, terminator: u8) -> io::Result<Vec<u8>> {
        let port = self.port()?;
        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match port.read(&mut byte) {
                Ok(1) if byte[0] == terminator => return Ok(response),
                Ok(1) => response.push(byte[0]),
                Ok(_) => (),
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => (),
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self) -> io::Result<()> {
        if self.port.take().is_some() {
            log::info!("closed {}", self.name);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Everything a session did to the link, in order.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Event {
        Write(String),
        Pause(Duration),
        Read,
        Close,
    }

    /// In-memory transport that records traffic and replays canned responses.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        pub events: Vec<Event>,
        responses: VecDeque<Vec<u8>>,
        fail_on: Option<String>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues a response line; the terminator is added here.
        pub fn respond(mut self, response: &str) -> Self {
            self.responses.push_back(frame(response));
            self
        }

        /// Makes any write of `command` fail.
        pub fn fail_on(mut self, command: &str) -> Self {
            self.fail_on = Some(command.to_string());
            self
        }

        pub fn writes(&self) -> Vec<&str> {
            self.events
                .iter()
                .filter_map(|event| match event {
                    Event::Write(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect()
        }
    }

    impl Transport for ScriptedTransport {
        fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
            let text = String::from_utf8_lossy(bytes);
            let command = text.strip_suffix('\r').unwrap_or(&text).to_string();
            if self.fail_on.as_deref() == Some(command.as_str()) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link dropped"));
            }
            self.events.push(Event::Write(command));
            Ok(())
        }

        fn read_until(&mut self, terminator: u8) -> io::Result<Vec<u8>> {
            self.events.push(Event::Read);
            let mut response = self
                .responses
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no response queued"))?;
            if let Some(end) = response.iter().position(|b| *b == terminator) {
                response.truncate(end);
            }
            Ok(response)
        }

        fn pause(&mut self, duration: Duration) {
            self.events.push(Event::Pause(duration));
        }

        fn close(&mut self) -> io::Result<()> {
            self.events.push(Event::Close);
            Ok(())
        }
    }
}
