//! BaseStation (SBS-1) line parser.
//!
//! A feed line is a comma-separated record such as:
//!
//! ```text
//! MSG,3,1,1,4CA2D6,1,2024/05/01,12:00:00.000,2024/05/01,12:00:00.000,,37000,,,35.12345,-35.54321,,,0,0,0,0
//! ```
//!
//! Only the fields needed for a position are looked at:
//! - field 0: message kind (`MSG` or `MLAT`)
//! - field 1: transmission subtype (`3` or `4`)
//! - fields 14/15: latitude / longitude
//!
//! Anything else yields no observation. This is filtering, not an
//! error, and is never logged.

use std::str::FromStr;

use crate::geo::Observation;

const FIELD_KIND: usize = 0;
const FIELD_SUBTYPE: usize = 1;
const FIELD_LAT: usize = 14;
const FIELD_LON: usize = 15;

/// Transmission subtypes that may carry an airborne position.
const POSITION_SUBTYPES: [&str; 2] = ["3", "4"];

/// Message kinds that may carry a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Standard decoded transmission
    Msg,

    /// Position derived by multilateration
    Mlat,
}

impl FromStr for MessageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MSG" => Ok(Self::Msg),
            "MLAT" => Ok(Self::Mlat),
            _ => Err(()),
        }
    }
}

/// Extracts a position from one feed line.
///
/// The record terminator should already be stripped; a leftover
/// `\r` or `\n` is tolerated.
///
/// IMPORTANT:
/// - Must never panic on arbitrary input
/// - Non-numeric or non-finite coordinates yield `None`
pub fn parse_line(line: &str) -> Option<Observation> {
    let line = line.trim_end_matches(['\r', '\n']);
    let fields: Vec<&str> = line.split(',').collect();

    if fields.len() <= FIELD_LON {
        return None;
    }

    fields[FIELD_KIND].parse::<MessageKind>().ok()?;

    if !POSITION_SUBTYPES.contains(&fields[FIELD_SUBTYPE]) {
        return None;
    }

    let lat = parse_degrees(fields[FIELD_LAT])?;
    let lon = parse_degrees(fields[FIELD_LON])?;

    Some(Observation { lat, lon })
}

fn parse_degrees(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}
