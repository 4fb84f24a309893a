//! Linear voltage sweeps.
//!
//! A sweep is programmed as one fixed command sequence: read format, a forced
//! voltage source with a current sensor behind a 0.5 A protection limit, the
//! sweep shape, the trigger count, then output on, arm and a blocking fetch.

use crate::command::{self, ChannelSelector, Clamp, Command, Function, Numeric, VOLTAGE_LIMITS};
use crate::config::Timing;
use crate::session::Step;
use crate::{Error, Result};

/// Current protection applied for every sweep, whatever compliance the caller set.
pub const SWEEP_COMPLIANCE_AMPS: f64 = 0.5;

/// Source delay between sweep points, in seconds.
pub const SWEEP_SOURCE_DELAY_S: f64 = 0.1;

/// Requested sweep, in volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSpec {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
    pub num_sweeps: u32,
}

impl SweepSpec {
    pub fn new(start: f64, stop: f64, step: f64, num_sweeps: u32) -> Self {
        Self { start, stop, step, num_sweeps }
    }

    /// Derives the values the sweep is programmed with.
    ///
    /// Start and stop are clamped to the source range first, so the point and
    /// trigger counts describe the span the instrument actually runs. A sweep
    /// with fewer than one point still runs a single point. Only a zero step
    /// or a non-finite value is rejected.
    pub fn plan(&self) -> Result<SweepPlan> {
        if !(self.start.is_finite() && self.stop.is_finite() && self.step.is_finite()) {
            return Err(Error::InvalidArgument("sweep limits must be finite".to_string()));
        }
        if self.step == 0.0 {
            return Err(Error::InvalidArgument("sweep step must not be zero".to_string()));
        }

        let start = clamp_volts(self.start);
        let stop = clamp_volts(self.stop);
        // rounded so that float noise such as 1 / 0.0004 keeps every point
        let points = ((stop.applied - start.applied) / self.step).round() as i64;

        Ok(SweepPlan {
            start,
            stop,
            sweep_points: Clamp { requested: points, applied: points.max(1) },
            trigger_count: command::clamp_trigger_count(points.saturating_mul(self.num_sweeps.into())),
        })
    }
}

impl Default for SweepSpec {
    fn default() -> Self {
        Self::new(-10.0, 10.0, 1.0, 1)
    }
}

/// Values a sweep is actually programmed with.
///
/// The frame returned by a sweep has `trigger_count.applied` records. Compare
/// against `trigger_count.requested` to detect a clamped sweep. Point and
/// trigger counts are derived from the clamped start and stop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPlan {
    pub start: Clamp<f64>,
    pub stop: Clamp<f64>,
    pub sweep_points: Clamp<i64>,
    pub trigger_count: Clamp<i64>,
}

fn clamp_volts(volts: f64) -> Clamp<f64> {
    let (low, high) = VOLTAGE_LIMITS;
    Clamp { requested: volts, applied: volts.max(low).min(high) }
}

/// Builds the full command sequence of a sweep.
pub(crate) fn program(
    spec: &SweepSpec,
    selector: ChannelSelector,
    timing: &Timing,
) -> Result<(SweepPlan, Vec<Step>)> {
    let plan = spec.plan()?;

    let programming = vec![
        command::read_format(selector),
        command::source_type(Function::Voltage),
        Command::write(":SENS:FUNC 'CURR:DC'"),
        Command::write(format!(":SENS:CURR:PROT {}", SWEEP_COMPLIANCE_AMPS)),
        Command::write(format!(":SOUR:VOLT:START {}", plan.start.applied)),
        Command::write(format!(":SOUR:VOLT:STOP {}", plan.stop.applied)),
        Command::write(format!(":SOUR:VOLT:STEP {}", spec.step)),
        Command::write(":SOUR:VOLT:MODE SWE"),
        Command::write(":SOUR:SWE:RANG AUTO"),
        Command::write(":SOUR:SWE:SPAC LIN"),
        Command::write(format!(":SOUR:SWE:POIN {}", plan.sweep_points.applied)),
    ]
    .into_iter()
    .chain(command::trigger_count(Numeric::Int(plan.trigger_count.applied))?.commands)
    .chain([
        Command::write(format!(":SOUR:DEL {}", SWEEP_SOURCE_DELAY_S)),
        command::output(true),
    ]);

    let mut steps = Vec::new();
    for command in programming {
        steps.push(Step::Send(command));
        steps.push(Step::Pause(timing.sweep_pause()));
    }
    steps.extend([
        Step::Send(command::arm()),
        Step::Send(command::fetch()),
        Step::Pause(timing.settle()),
        Step::Send(command::output(false)),
    ]);

    Ok((plan, steps))
}
