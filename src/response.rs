//! Decoding of delimited numeric responses into per-channel series.

use std::fmt;

use crate::command::ChannelSelector;
use crate::{Error, Result};

/// One named channel of a measurement frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Time,
    Voltage,
    Current,
    Resistance,
}

impl Quantity {
    pub fn label(self) -> &'static str {
        match self {
            Quantity::Time => "time",
            Quantity::Voltage => "voltage",
            Quantity::Current => "current",
            Quantity::Resistance => "resistance",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Column-major measurement data: one series per quantity, aligned by record.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementFrame {
    selector: ChannelSelector,
    columns: Vec<Vec<f64>>,
}

impl MeasurementFrame {
    /// A frame with the selector's columns and no records.
    pub fn empty(selector: ChannelSelector) -> Self {
        Self {
            selector,
            columns: vec![Vec::new(); selector.quantities().len()],
        }
    }

    pub fn quantities(&self) -> &'static [Quantity] {
        self.selector.quantities()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column(&self, quantity: Quantity) -> Option<&[f64]> {
        self.quantities()
            .iter()
            .position(|q| *q == quantity)
            .map(|index| self.columns[index].as_slice())
    }

    pub fn time(&self) -> &[f64] {
        &self.columns[0]
    }

    pub fn columns(&self) -> impl Iterator<Item = (Quantity, &[f64])> {
        self.quantities()
            .iter()
            .copied()
            .zip(self.columns.iter().map(Vec::as_slice))
    }

    /// Values of one record in column order.
    pub fn row(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.len() {
            return None;
        }
        Some(self.columns.iter().map(|column| column[index]).collect())
    }
}

/// Decodes a raw instrument response.
///
/// Records arrive as `volt, curr, res, time` for the full selection and as
/// `value, time` for a single quantity. Tokens left over after the last
/// complete record are dropped. A non-numeric token anywhere fails the whole
/// response.
pub fn parse(raw: &str, selector: ChannelSelector) -> Result<MeasurementFrame> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Ok(MeasurementFrame::empty(selector));
    }

    let values = cleaned
        .split(',')
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| Error::Protocol(format!("non-numeric value '{}' in response", token)))
        })
        .collect::<Result<Vec<f64>>>()?;

    let width = selector.width();
    let dropped = values.len() % width;
    if dropped > 0 {
        log::debug!("dropping {} trailing value(s) that do not fill a record", dropped);
    }

    // raw index of each returned column within a record
    let layout: &[usize] = match selector {
        ChannelSelector::All => &[3, 0, 1, 2][..],
        _ => &[1, 0][..],
    };

    let mut frame = MeasurementFrame::empty(selector);
    for record in values.chunks_exact(width) {
        for (column, &raw_index) in frame.columns.iter_mut().zip(layout) {
            column.push(record[raw_index]);
        }
    }
    Ok(frame)
}
