//! Device session: connection lifecycle and command sequencing.
//!
//! A [`LiveSession`] exclusively owns its transport and issues one command at
//! a time. It is not meant to be shared between threads; callers that need
//! that must wrap it in their own lock keyed by port.

use std::fmt;
use std::time::Duration;

use crate::command::{self, ChannelSelector, Clamp, Command, Function, Numeric, Response};
use crate::config::{SessionConfig, Timing};
use crate::response::{self, MeasurementFrame};
use crate::sweep::{self, SweepSpec};
use crate::transport::{self, SerialTransport, Transport, TERMINATOR};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Busy,
    Closed,
}

/// One element of a scripted command sequence.
///
/// A sent query also reads back its response line.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    Send(Command),
    Pause(Duration),
}

/// Everything a caller can ask of the instrument.
pub trait InstrumentSession {
    fn state(&self) -> SessionState;

    fn set_output(&mut self, on: bool) -> Result<()>;

    fn reset(&mut self) -> Result<()>;

    /// Resets the instrument, re-applies the startup configuration and leaves
    /// the output off.
    fn reset_to_startup(&mut self) -> Result<()>;

    fn set_source_type(&mut self, kind: Function) -> Result<()>;

    fn set_source_voltage(&mut self, volts: Numeric) -> Result<Clamp<Numeric>>;

    fn set_source_current(&mut self, amps: Numeric) -> Result<Clamp<Numeric>>;

    fn set_sensor_type(&mut self, kind: Function) -> Result<()>;

    fn set_sensor_range(&mut self, kind: Function, range: Numeric) -> Result<()>;

    fn set_voltage_compliance(&mut self, limit: Numeric) -> Result<()>;

    fn set_current_compliance(&mut self, limit: Numeric) -> Result<()>;

    fn set_trigger_count(&mut self, count: Numeric) -> Result<Clamp<i64>>;

    fn trigger_count(&mut self) -> Result<i64>;

    /// Takes one armed reading with the output switched on only for its
    /// duration.
    ///
    /// If the link fails part way through, the output may be left on. Call
    /// `set_output(false)` before doing anything else.
    fn read(&mut self, selector: ChannelSelector) -> Result<MeasurementFrame>;

    /// Runs a linear voltage sweep and returns one record per trigger.
    ///
    /// The number of records equals the clamped trigger count, which may be
    /// fewer than `points × sweeps` requested.
    fn sweep(&mut self, spec: &SweepSpec, selector: ChannelSelector) -> Result<MeasurementFrame>;

    /// Switches the output off if possible and releases the link. Safe to
    /// call more than once.
    fn close(&mut self) -> Result<()>;
}

/// Opens the session variant selected by `config`.
///
/// An offline configuration yields a [`NullSession`]; otherwise the
/// configured serial port is opened and the startup sequence applied.
pub fn open_session(config: &SessionConfig) -> Result<Box<dyn InstrumentSession>> {
    if config.offline {
        log::info!("using offline session");
        return Ok(Box::new(NullSession::new()));
    }

    let port = config
        .port
        .as_deref()
        .ok_or_else(|| Error::Config("no serial port configured".to_string()))?;
    let transport = SerialTransport::open(port, config.baud_rate).map_err(|source| Error::Connection {
        port: port.to_string(),
        source,
    })?;

    let mut session = LiveSession::new(transport, config);
    session.connect()?;
    Ok(Box::new(session))
}

/// A session bound to a real instrument link.
pub struct LiveSession<T: Transport> {
    transport: T,
    state: SessionState,
    port: String,
    timing: Timing,
    startup_commands: Vec<String>,
}

impl<T: Transport> LiveSession<T> {
    /// Wraps an open transport. Nothing is sent until [`connect`](Self::connect).
    pub fn new(transport: T, config: &SessionConfig) -> Self {
        Self {
            transport,
            state: SessionState::Disconnected,
            port: config.port_label().to_string(),
            timing: config.timing,
            startup_commands: config.startup_commands.clone(),
        }
    }

    /// Applies the startup configuration, one command per pause.
    ///
    /// A failed write aborts the sequence without retrying and leaves the
    /// session disconnected.
    pub fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Ready => return Ok(()),
            SessionState::Disconnected => (),
            state => return Err(Error::NotConnected { state }),
        }

        self.state = SessionState::Connecting;
        log::info!("applying {} startup commands on {}", self.startup_commands.len(), self.port);

        let pause = self.timing.command_pause();
        for text in &self.startup_commands {
            log::debug!("> {}", text);
            if let Err(source) = self.transport.write(&transport::frame(text)) {
                self.state = SessionState::Disconnected;
                return Err(Error::Connection {
                    port: self.port.clone(),
                    source,
                });
            }
            self.transport.pause(pause);
        }

        self.state = SessionState::Ready;
        log::info!("instrument on {} ready", self.port);
        Ok(())
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn require_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            state => Err(Error::NotConnected { state }),
        }
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        log::debug!("> {}", command);
        self.transport.write(&transport::frame(command.text()))?;
        Ok(())
    }

    fn query(&mut self, command: &Command) -> Result<String> {
        self.send(command)?;
        self.transport.pause(self.timing.response_wait());
        let response = transport::decode(&self.transport.read_until(TERMINATOR)?);
        log::debug!("< {}", response);
        Ok(response)
    }

    fn send_all(&mut self, commands: &[Command]) -> Result<()> {
        self.require_ready()?;
        for command in commands {
            self.send(command)?;
        }
        Ok(())
    }

    /// Runs a scripted sequence while marked busy and returns the last
    /// fetched response. The session is ready again afterwards, even on error.
    fn run(&mut self, steps: &[Step]) -> Result<String> {
        self.require_ready()?;
        self.state = SessionState::Busy;
        let result = self.run_steps(steps);
        self.state = SessionState::Ready;
        result
    }

    fn run_steps(&mut self, steps: &[Step]) -> Result<String> {
        let mut response = String::new();
        for step in steps {
            match step {
                Step::Send(command) => match command.response() {
                    Response::None => self.send(command)?,
                    Response::Line => response = self.query(command)?,
                },
                Step::Pause(duration) => self.transport.pause(*duration),
            }
        }
        Ok(response)
    }

    /// `*RST`, the startup commands with their pauses, then output off.
    fn reset_program(&self) -> Vec<Step> {
        let pause = self.timing.command_pause();
        let mut steps = vec![Step::Send(command::reset())];
        for text in &self.startup_commands {
            steps.push(Step::Send(Command::write(text.as_str())));
            steps.push(Step::Pause(pause));
        }
        steps.push(Step::Send(command::output(false)));
        steps
    }
}

/// Command sequence of a single armed reading.
pub(crate) fn read_program(selector: ChannelSelector, timing: &Timing) -> Vec<Step> {
    let settle = timing.settle();
    vec![
        Step::Send(command::read_format(selector)),
        Step::Send(command::output(true)),
        Step::Pause(settle),
        Step::Send(command::arm()),
        Step::Pause(settle),
        Step::Send(command::fetch()),
        Step::Pause(settle),
        Step::Send(command::output(false)),
    ]
}

fn report_clamp<V: PartialEq + fmt::Display>(what: &str, clamp: &Clamp<V>) {
    if clamp.is_clamped() {
        log::warn!("{} {} is out of range, using {}", what, clamp.requested, clamp.applied);
    }
}

impl<T: Transport> InstrumentSession for LiveSession<T> {
    fn state(&self) -> SessionState {
        self.state
    }

    fn set_output(&mut self, on: bool) -> Result<()> {
        self.send_all(&[command::output(on)])
    }

    fn reset(&mut self) -> Result<()> {
        self.send_all(&[command::reset()])
    }

    fn reset_to_startup(&mut self) -> Result<()> {
        log::info!("resetting {} to its startup configuration", self.port);
        let steps = self.reset_program();
        self.run(&steps)?;
        Ok(())
    }

    fn set_source_type(&mut self, kind: Function) -> Result<()> {
        self.send_all(&[command::source_type(kind)])
    }

    fn set_source_voltage(&mut self, volts: Numeric) -> Result<Clamp<Numeric>> {
        self.require_ready()?;
        let encoded = command::source_voltage(volts)?;
        report_clamp("source voltage", &encoded.clamp);
        self.send_all(&encoded.commands)?;
        Ok(encoded.clamp)
    }

    fn set_source_current(&mut self, amps: Numeric) -> Result<Clamp<Numeric>> {
        self.require_ready()?;
        let encoded = command::source_current(amps)?;
        report_clamp("source current", &encoded.clamp);
        self.send_all(&encoded.commands)?;
        Ok(encoded.clamp)
    }

    fn set_sensor_type(&mut self, kind: Function) -> Result<()> {
        self.send_all(&[command::sensor_type(kind)])
    }

    fn set_sensor_range(&mut self, kind: Function, range: Numeric) -> Result<()> {
        self.require_ready()?;
        let commands = command::sensor_range(kind, range)?;
        self.send_all(&commands)
    }

    fn set_voltage_compliance(&mut self, limit: Numeric) -> Result<()> {
        self.require_ready()?;
        let encoded = command::voltage_compliance(limit)?;
        self.send_all(&[encoded])
    }

    fn set_current_compliance(&mut self, limit: Numeric) -> Result<()> {
        self.require_ready()?;
        let encoded = command::current_compliance(limit)?;
        self.send_all(&[encoded])
    }

    fn set_trigger_count(&mut self, count: Numeric) -> Result<Clamp<i64>> {
        self.require_ready()?;
        let encoded = command::trigger_count(count)?;
        report_clamp("trigger count", &encoded.clamp);
        self.send_all(&encoded.commands)?;
        Ok(encoded.clamp)
    }

    fn trigger_count(&mut self) -> Result<i64> {
        self.require_ready()?;
        let response = self.query(&command::trigger_count_query())?;
        let digits: String = response.chars().filter(|c| !c.is_whitespace()).collect();
        digits
            .parse()
            .map_err(|_| Error::Protocol(format!("expected an integer trigger count, got '{}'", response.trim())))
    }

    fn read(&mut self, selector: ChannelSelector) -> Result<MeasurementFrame> {
        let steps = read_program(selector, &self.timing);
        let raw = self.run(&steps)?;
        response::parse(&raw, selector)
    }

    fn sweep(&mut self, spec: &SweepSpec, selector: ChannelSelector) -> Result<MeasurementFrame> {
        self.require_ready()?;
        let (plan, steps) = sweep::program(spec, selector, &self.timing)?;
        log::info!(
            "sweeping {} V to {} V in {} V steps, {} trigger(s)",
            plan.start.applied,
            plan.stop.applied,
            spec.step,
            plan.trigger_count.applied
        );
        report_clamp("sweep start", &plan.start);
        report_clamp("sweep stop", &plan.stop);
        report_clamp("sweep points", &plan.sweep_points);
        report_clamp("sweep trigger count", &plan.trigger_count);

        let raw = self.run(&steps)?;
        response::parse(&raw, selector)
    }

    fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        match self.send(&command::output(false)) {
            Ok(()) => self.transport.pause(self.timing.settle()),
            Err(e) => log::warn!("could not switch output off while closing {}: {}", self.port, e),
        }
        self.state = SessionState::Closed;
        self.transport.close()?;
        log::info!("session on {} closed", self.port);
        Ok(())
    }
}

impl<T: Transport> Drop for LiveSession<T> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            if let Err(e) = self.close() {
                log::warn!("error closing session on {}: {}", self.port, e);
            }
        }
    }
}

/// A session with no instrument behind it.
///
/// Every operation succeeds without side effects. Readings come back as
/// empty frames with the requested columns.
#[derive(Debug, Default)]
pub struct NullSession {
    closed: bool,
}

impl NullSession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InstrumentSession for NullSession {
    fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else {
            SessionState::Ready
        }
    }

    fn set_output(&mut self, _on: bool) -> Result<()> {
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn reset_to_startup(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_source_type(&mut self, _kind: Function) -> Result<()> {
        Ok(())
    }

    fn set_source_voltage(&mut self, volts: Numeric) -> Result<Clamp<Numeric>> {
        Ok(Clamp { requested: volts, applied: volts })
    }

    fn set_source_current(&mut self, amps: Numeric) -> Result<Clamp<Numeric>> {
        Ok(Clamp { requested: amps, applied: amps })
    }

    fn set_sensor_type(&mut self, _kind: Function) -> Result<()> {
        Ok(())
    }

    fn set_sensor_range(&mut self, _kind: Function, _range: Numeric) -> Result<()> {
        Ok(())
    }

    fn set_voltage_compliance(&mut self, _limit: Numeric) -> Result<()> {
        Ok(())
    }

    fn set_current_compliance(&mut self, _limit: Numeric) -> Result<()> {
        Ok(())
    }

    fn set_trigger_count(&mut self, count: Numeric) -> Result<Clamp<i64>> {
        let count = match count {
            Numeric::Int(count) => count,
            Numeric::Float(value) => value as i64,
        };
        Ok(Clamp { requested: count, applied: count })
    }

    fn trigger_count(&mut self) -> Result<i64> {
        Ok(0)
    }

    fn read(&mut self, selector: ChannelSelector) -> Result<MeasurementFrame> {
        Ok(MeasurementFrame::empty(selector))
    }

    fn sweep(&mut self, _spec: &SweepSpec, selector: ChannelSelector) -> Result<MeasurementFrame> {
        Ok(MeasurementFrame::empty(selector))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
