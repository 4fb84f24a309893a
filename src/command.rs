//! SCPI command encoding.
//!
//! Every function here is pure: it maps a typed operation onto the ASCII
//! command(s) the instrument expects, clamping values to the instrument's
//! limits. Nothing is written to the wire from this module.

use std::fmt;
use std::str::FromStr;

use crate::response::Quantity;
use crate::{Error, Result};

/// Source voltage bounds in volts.
pub const VOLTAGE_LIMITS: (f64, f64) = (-200.0, 200.0);
/// Source current bounds in amperes.
pub const CURRENT_LIMITS: (f64, f64) = (-1.0, 1.0);
/// Trigger count bounds imposed by the instrument's buffer.
pub const TRIGGER_LIMITS: (i64, i64) = (1, 2500);

/// Whether a command produces a line the caller has to read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    None,
    Line,
}

/// A single ASCII command, without the wire terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    response: Response,
}

impl Command {
    /// A command that is only written.
    pub fn write(text: impl Into<String>) -> Self {
        Self { text: text.into(), response: Response::None }
    }

    /// A command that is answered with one response line.
    pub fn query(text: impl Into<String>) -> Self {
        Self { text: text.into(), response: Response::Line }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn response(&self) -> Response {
        self.response
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// The two quantities the instrument can source or sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Voltage,
    Current,
}

impl Function {
    fn scpi_name(self) -> &'static str {
        match self {
            Function::Voltage => "VOLT",
            Function::Current => "CURR",
        }
    }
}

impl FromStr for Function {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "current" | "curr" | "c" => Ok(Function::Current),
            "voltage" | "volt" | "v" => Ok(Function::Voltage),
            other => Err(Error::InvalidArgument(format!(
                "unknown function '{}', expected voltage or current",
                other
            ))),
        }
    }
}

/// A numeric argument, either integer or floating-point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    pub fn as_f64(self) -> f64 {
        match self {
            Numeric::Int(value) => value as f64,
            Numeric::Float(value) => value,
        }
    }

    /// Rejects NaN and infinities, which the instrument cannot represent.
    fn finite(self, what: &str) -> Result<Self> {
        match self {
            Numeric::Float(value) if !value.is_finite() => Err(Error::InvalidArgument(format!(
                "{} must be a finite number, got {}",
                what, value
            ))),
            _ => Ok(self),
        }
    }

    fn clamp(self, (low, high): (f64, f64)) -> Clamp<Numeric> {
        let value = self.as_f64();
        let bound = if value > high {
            Some(high)
        } else if value < low {
            Some(low)
        } else {
            None
        };
        let applied = match (bound, self) {
            (None, _) => self,
            (Some(bound), Numeric::Int(_)) => Numeric::Int(bound as i64),
            (Some(bound), Numeric::Float(_)) => Numeric::Float(bound),
        };
        Clamp { requested: self, applied }
    }
}

impl From<i64> for Numeric {
    fn from(value: i64) -> Self {
        Numeric::Int(value)
    }
}

impl From<i32> for Numeric {
    fn from(value: i32) -> Self {
        Numeric::Int(value.into())
    }
}

impl From<u32> for Numeric {
    fn from(value: u32) -> Self {
        Numeric::Int(value.into())
    }
}

impl From<f64> for Numeric {
    fn from(value: f64) -> Self {
        Numeric::Float(value)
    }
}

impl From<f32> for Numeric {
    fn from(value: f32) -> Self {
        Numeric::Float(value.into())
    }
}

impl FromStr for Numeric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(value) = s.parse::<i64>() {
            return Ok(Numeric::Int(value));
        }
        match s.parse::<f64>() {
            Ok(value) => Numeric::Float(value).finite("value"),
            Err(_) => Err(Error::InvalidArgument(format!("'{}' is not a number", s))),
        }
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Numeric::Int(value) => write!(f, "{}", value),
            Numeric::Float(value) => write!(f, "{}", value),
        }
    }
}

/// Result of pushing a value through a limit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamp<T> {
    pub requested: T,
    pub applied: T,
}

impl<T: PartialEq> Clamp<T> {
    pub fn is_clamped(&self) -> bool {
        self.requested != self.applied
    }
}

/// Commands produced for a value that may have been clamped.
#[derive(Debug, Clone, PartialEq)]
pub struct Clamped<T> {
    pub commands: Vec<Command>,
    pub clamp: Clamp<T>,
}

/// Which channels a reading returns.
///
/// The instrument always reports time alongside the selected quantity; the
/// default selection reports all three quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelSelector {
    #[default]
    All,
    Voltage,
    Current,
    Resistance,
}

impl ChannelSelector {
    /// Maps a selector code onto a selection.
    ///
    /// `v`, `c` and `r` (any case) select a single quantity. Anything else,
    /// including no code at all, falls back to the full four-channel reading.
    pub fn from_code(code: Option<&str>) -> Self {
        match code.map(|c| c.trim().to_ascii_lowercase()).as_deref() {
            Some("v") => ChannelSelector::Voltage,
            Some("c") => ChannelSelector::Current,
            Some("r") => ChannelSelector::Resistance,
            None => ChannelSelector::All,
            Some(other) => {
                log::debug!("unrecognised channel selector '{}', reading all channels", other);
                ChannelSelector::All
            }
        }
    }

    /// Number of values the instrument sends per record.
    pub fn width(self) -> usize {
        match self {
            ChannelSelector::All => 4,
            _ => 2,
        }
    }

    /// Column order of a parsed frame.
    pub fn quantities(self) -> &'static [Quantity] {
        match self {
            ChannelSelector::All => &[
                Quantity::Time,
                Quantity::Voltage,
                Quantity::Current,
                Quantity::Resistance,
            ],
            ChannelSelector::Voltage => &[Quantity::Time, Quantity::Voltage],
            ChannelSelector::Current => &[Quantity::Time, Quantity::Current],
            ChannelSelector::Resistance => &[Quantity::Time, Quantity::Resistance],
        }
    }
}

pub fn reset() -> Command {
    Command::write("*RST")
}

pub fn output(on: bool) -> Command {
    Command::write(if on { ":OUTP ON" } else { ":OUTP OFF" })
}

/// Starts the armed trigger sequence.
pub fn arm() -> Command {
    Command::write(":INIT")
}

/// Blocks on the instrument side until every armed trigger has completed.
pub fn fetch() -> Command {
    Command::query(":FETCH?")
}

pub fn source_type(kind: Function) -> Command {
    match kind {
        Function::Current => Command::write(":SOUR:FUNC CURRENT"),
        Function::Voltage => Command::write(":SOUR:FUNC VOLT"),
    }
}

/// Switches the source to voltage and programs the level, clamped to ±200 V.
pub fn source_voltage(volts: Numeric) -> Result<Clamped<Numeric>> {
    let clamp = volts.finite("source voltage")?.clamp(VOLTAGE_LIMITS);
    Ok(Clamped {
        commands: vec![
            source_type(Function::Voltage),
            Command::write(format!(":SOUR:VOLT {}", clamp.applied)),
        ],
        clamp,
    })
}

/// Switches the source to current and programs the level, clamped to ±1 A.
pub fn source_current(amps: Numeric) -> Result<Clamped<Numeric>> {
    let clamp = amps.finite("source current")?.clamp(CURRENT_LIMITS);
    Ok(Clamped {
        commands: vec![
            source_type(Function::Current),
            Command::write(format!(":SOUR:CURR {}", clamp.applied)),
        ],
        clamp,
    })
}

pub fn sensor_type(kind: Function) -> Command {
    Command::write(format!(":SENS:FUNC \"{}\"", kind.scpi_name()))
}

/// Selects the sensor and its range as `10E<order>`.
pub fn sensor_range(kind: Function, range: Numeric) -> Result<Vec<Command>> {
    let range = range.finite("sensor range")?.as_f64();
    let (_, order) = two_digit_scientific(range.abs())?;
    Ok(vec![
        sensor_type(kind),
        Command::write(format!(":SENS:{}:RANG 10E{}", kind.scpi_name(), order)),
    ])
}

pub fn voltage_compliance(limit: Numeric) -> Result<Command> {
    compliance(Function::Voltage, limit)
}

pub fn current_compliance(limit: Numeric) -> Result<Command> {
    compliance(Function::Current, limit)
}

fn compliance(kind: Function, limit: Numeric) -> Result<Command> {
    let limit = limit.finite("compliance limit")?.as_f64();
    Ok(Command::write(format!(
        ":SENS:{}:PROT {}",
        kind.scpi_name(),
        compliance_value(limit)?
    )))
}

/// Programs how many triggers one arm runs, clamped to 1..=2500.
pub fn trigger_count(count: Numeric) -> Result<Clamped<i64>> {
    let count = match count {
        Numeric::Int(count) => count,
        Numeric::Float(value) => {
            return Err(Error::InvalidArgument(format!(
                "trigger count must be an integer, got {}",
                value
            )))
        }
    };
    let clamp = clamp_trigger_count(count);
    Ok(Clamped {
        commands: vec![Command::write(format!(":TRIG:COUN {}", clamp.applied))],
        clamp,
    })
}

pub fn trigger_count_query() -> Command {
    Command::query(":TRIG:COUN?")
}

pub fn clamp_trigger_count(count: i64) -> Clamp<i64> {
    let (low, high) = TRIGGER_LIMITS;
    Clamp { requested: count, applied: count.clamp(low, high) }
}

pub fn read_format(selector: ChannelSelector) -> Command {
    let elements = match selector {
        ChannelSelector::All => "TIME, VOLT, CURR, RES",
        ChannelSelector::Voltage => "TIME, VOLT",
        ChannelSelector::Current => "TIME, CURR",
        ChannelSelector::Resistance => "TIME, RES",
    };
    Command::write(format!(":FORM:ELEM {}", elements))
}

/// Formats `value` with two significant digits and splits the result into the
/// mantissa text and the base-10 exponent.
fn two_digit_scientific(value: f64) -> Result<(String, i32)> {
    let formatted = format!("{:.2e}", value);
    let invalid = || Error::InvalidArgument(format!("{} has no decimal exponent", value));
    let (mantissa, exponent) = formatted.split_once('e').ok_or_else(invalid)?;
    let order = exponent.parse().map_err(|_| invalid())?;
    Ok((mantissa.to_string(), order))
}

/// `<coefficient>E<exponent>` with the mantissa cut to one decimal place.
fn compliance_value(limit: f64) -> Result<String> {
    let (mantissa, order) = two_digit_scientific(limit)?;
    let coefficient = match mantissa.find('.') {
        Some(dot) => &mantissa[..dot + 2],
        None => mantissa.as_str(),
    };
    Ok(format!("{}E{}", coefficient, order))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(commands: &[Command]) -> Vec<&str> {
        commands.iter().map(Command::text).collect()
    }

    fn range_order(command: &Command) -> i32 {
        let (_, exponent) = command.text().rsplit_once("10E").unwrap();
        exponent.parse().unwrap()
    }

    #[test]
    fn function_accepts_abbreviations_in_any_case() {
        for word in ["current", "CURR", "c", " Current "] {
            assert_eq!(word.parse::<Function>().unwrap(), Function::Current);
        }
        for word in ["voltage", "Volt", "V"] {
            assert_eq!(word.parse::<Function>().unwrap(), Function::Voltage);
        }
    }

    #[test]
    fn unknown_function_is_rejected() {
        assert!(matches!("ohms".parse::<Function>(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn source_type_commands() {
        assert_eq!(source_type(Function::Current).text(), ":SOUR:FUNC CURRENT");
        assert_eq!(source_type(Function::Voltage).text(), ":SOUR:FUNC VOLT");
    }

    #[test]
    fn voltage_within_limits_is_untouched() {
        let encoded = source_voltage(Numeric::Float(12.5)).unwrap();
        assert!(!encoded.clamp.is_clamped());
        assert_eq!(texts(&encoded.commands), [":SOUR:FUNC VOLT", ":SOUR:VOLT 12.5"]);
    }

    #[test]
    fn voltage_is_clamped_to_limits() {
        for (requested, expected) in [(250.0, 200.0), (-1000.0, -200.0), (200.0, 200.0), (-3.0, -3.0)] {
            let encoded = source_voltage(Numeric::Float(requested)).unwrap();
            assert_eq!(encoded.clamp.applied.as_f64(), requested.max(-200.0).min(200.0));
            assert_eq!(encoded.clamp.applied.as_f64(), expected);
        }
        let encoded = source_voltage(Numeric::Int(201)).unwrap();
        assert!(encoded.clamp.is_clamped());
        assert_eq!(encoded.clamp.requested, Numeric::Int(201));
        assert_eq!(encoded.commands[1].text(), ":SOUR:VOLT 200");
    }

    #[test]
    fn current_is_clamped_to_limits() {
        let encoded = source_current(Numeric::Float(1.5)).unwrap();
        assert!(encoded.clamp.is_clamped());
        assert_eq!(texts(&encoded.commands), [":SOUR:FUNC CURRENT", ":SOUR:CURR 1"]);

        let encoded = source_current(Numeric::Float(-0.25)).unwrap();
        assert!(!encoded.clamp.is_clamped());
        assert_eq!(encoded.commands[1].text(), ":SOUR:CURR -0.25");

        let encoded = source_current(Numeric::Int(-7)).unwrap();
        assert_eq!(encoded.clamp.applied, Numeric::Int(-1));
    }

    #[test]
    fn non_numeric_levels_are_rejected() {
        assert!(matches!(source_voltage(Numeric::Float(f64::NAN)), Err(Error::InvalidArgument(_))));
        assert!(matches!(source_current(Numeric::Float(f64::INFINITY)), Err(Error::InvalidArgument(_))));
        assert!(matches!("ten".parse::<Numeric>(), Err(Error::InvalidArgument(_))));
        assert!(matches!("inf".parse::<Numeric>(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn numeric_text_keeps_integer_kind() {
        assert_eq!("42".parse::<Numeric>().unwrap(), Numeric::Int(42));
        assert_eq!(" -0.5 ".parse::<Numeric>().unwrap(), Numeric::Float(-0.5));
        assert_eq!("1e-3".parse::<Numeric>().unwrap(), Numeric::Float(0.001));
    }

    #[test]
    fn sensor_type_commands() {
        assert_eq!(sensor_type(Function::Current).text(), ":SENS:FUNC \"CURR\"");
        assert_eq!(sensor_type(Function::Voltage).text(), ":SENS:FUNC \"VOLT\"");
    }

    #[test]
    fn sensor_range_uses_order_of_magnitude() {
        for (range, order) in [(0.001, -3), (1.0, 0), (10.0, 1), (1500.0, 3)] {
            let commands = sensor_range(Function::Voltage, Numeric::Float(range)).unwrap();
            assert_eq!(range_order(&commands[1]), order, "range {}", range);
        }
        let commands = sensor_range(Function::Current, Numeric::Float(0.001)).unwrap();
        assert_eq!(texts(&commands), [":SENS:FUNC \"CURR\"", ":SENS:CURR:RANG 10E-3"]);
    }

    #[test]
    fn sensor_range_rounds_to_two_significant_digits() {
        // 9.999 formats as 1.00e1, so the order moves up
        let commands = sensor_range(Function::Voltage, Numeric::Float(9.999)).unwrap();
        assert_eq!(range_order(&commands[1]), 1);
        let commands = sensor_range(Function::Voltage, Numeric::Float(-20.0)).unwrap();
        assert_eq!(range_order(&commands[1]), 1);
    }

    #[test]
    fn compliance_is_coefficient_and_exponent() {
        assert_eq!(current_compliance(Numeric::Float(0.5)).unwrap().text(), ":SENS:CURR:PROT 5.0E-1");
        assert_eq!(current_compliance(Numeric::Float(0.00156)).unwrap().text(), ":SENS:CURR:PROT 1.5E-3");
        assert_eq!(voltage_compliance(Numeric::Int(21)).unwrap().text(), ":SENS:VOLT:PROT 2.1E1");
        assert_eq!(voltage_compliance(Numeric::Float(-0.75)).unwrap().text(), ":SENS:VOLT:PROT -7.5E-1");
    }

    #[test]
    fn scientific_split_needs_an_exponent() {
        assert_eq!(two_digit_scientific(0.00156).unwrap(), ("1.56".to_string(), -3));
        assert_eq!(two_digit_scientific(0.0).unwrap(), ("0.00".to_string(), 0));
        assert!(matches!(two_digit_scientific(f64::INFINITY), Err(Error::InvalidArgument(_))));
        assert!(matches!(two_digit_scientific(f64::NAN), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn trigger_count_is_clamped() {
        for n in [-5, 0, 1, 20, 2500, 2501, 100_000] {
            let encoded = trigger_count(Numeric::Int(n)).unwrap();
            assert_eq!(encoded.clamp.applied, n.max(1).min(2500));
            assert_eq!(encoded.commands[0].text(), format!(":TRIG:COUN {}", n.max(1).min(2500)));
        }
    }

    #[test]
    fn trigger_count_requires_integer() {
        assert!(matches!(trigger_count(Numeric::Float(3.0)), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn read_format_per_selector() {
        assert_eq!(read_format(ChannelSelector::All).text(), ":FORM:ELEM TIME, VOLT, CURR, RES");
        assert_eq!(read_format(ChannelSelector::Voltage).text(), ":FORM:ELEM TIME, VOLT");
        assert_eq!(read_format(ChannelSelector::Current).text(), ":FORM:ELEM TIME, CURR");
        assert_eq!(read_format(ChannelSelector::Resistance).text(), ":FORM:ELEM TIME, RES");
    }

    #[test]
    fn unknown_selector_falls_back_to_all_channels() {
        assert_eq!(ChannelSelector::from_code(None), ChannelSelector::All);
        assert_eq!(ChannelSelector::from_code(Some("x")), ChannelSelector::All);
        assert_eq!(ChannelSelector::from_code(Some("V")), ChannelSelector::Voltage);
        assert_eq!(ChannelSelector::from_code(Some("r")), ChannelSelector::Resistance);
    }

    #[test]
    fn queries_expect_a_response() {
        assert_eq!(fetch().response(), Response::Line);
        assert_eq!(trigger_count_query().response(), Response::Line);
        assert_eq!(arm().response(), Response::None);
    }
}
