use std::fmt;
use std::fmt::{Display, Formatter};

use bincode::{Decode, Encode};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{SkyError, SkyResult};
use crate::geometry;

/// A position on the celestial sphere, stored in degrees.
///
/// RA is kept wrapped to [0, 360); Dec is expected in [-90, 90].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct SkyPosition {
    pub ra: f64,
    pub dec: f64,
}

impl SkyPosition {
    pub fn new(ra_deg: f64, dec_deg: f64) -> SkyPosition {
        SkyPosition {
            ra: ra_deg.rem_euclid(360.0),
            dec: dec_deg,
        }
    }

    pub fn from_radians(ra_rad: f64, dec_rad: f64) -> SkyPosition {
        SkyPosition::new(ra_rad.to_degrees(), dec_rad.to_degrees())
    }

    pub fn to_radians(&self) -> (f64, f64) {
        (self.ra.to_radians(), self.dec.to_radians())
    }

    /// Great-circle separation to another position, in degrees.
    pub fn separation_deg(&self, other: &SkyPosition) -> f64 {
        geometry::angular_separation_deg(self.ra, self.dec, other.ra, other.dec)
    }

    /// Parses an RA value: either degrees as a plain float, or a
    /// sexagesimal `hh:mm:ss.s` string in hours.
    pub fn parse_ra(value: &str) -> SkyResult<f64> {
        let value = value.trim();
        if let Ok(deg) = value.parse::<f64>() {
            if deg.is_finite() {
                return Ok(deg.rem_euclid(360.0));
            }
        }
        let pattern = Regex::new(r"^(\d{1,2}):(\d{1,2}):(\d{1,2}(?:\.\d*)?)$").unwrap();
        let caps = pattern
            .captures(value)
            .ok_or_else(|| SkyError::InvalidParameter(format!("RA value '{}' not understood", value)))?;
        let hours: f64 = caps[1].parse().unwrap();
        let minutes: f64 = caps[2].parse().unwrap();
        let seconds: f64 = caps[3].parse().unwrap();
        if hours >= 24.0 || minutes >= 60.0 || seconds >= 60.0 {
            return Err(SkyError::InvalidParameter(format!(
                "RA value '{}' out of range",
                value
            )));
        }
        Ok((hours + minutes / 60.0 + seconds / 3600.0) * 15.0)
    }

    /// Parses a Dec value: either degrees as a plain float, or a
    /// sexagesimal `dd.mm.ss.s` string. The sign applies to the whole
    /// value, minutes and seconds included.
    pub fn parse_dec(value: &str) -> SkyResult<f64> {
        let value = value.trim();
        if let Ok(deg) = value.parse::<f64>() {
            if deg.is_finite() && (-90.0..=90.0).contains(&deg) {
                return Ok(deg);
            }
            return Err(SkyError::InvalidParameter(format!(
                "Dec value '{}' out of range",
                value
            )));
        }
        let pattern =
            Regex::new(r"^([+-]?)(\d{1,2})\.(\d{1,2})\.(\d{1,2}(?:\.\d*)?)$").unwrap();
        let caps = pattern
            .captures(value)
            .ok_or_else(|| SkyError::InvalidParameter(format!("Dec value '{}' not understood", value)))?;
        let degrees: f64 = caps[2].parse().unwrap();
        let minutes: f64 = caps[3].parse().unwrap();
        let seconds: f64 = caps[4].parse().unwrap();
        if minutes >= 60.0 || seconds >= 60.0 {
            return Err(SkyError::InvalidParameter(format!(
                "Dec value '{}' out of range",
                value
            )));
        }
        let magnitude = degrees + minutes / 60.0 + seconds / 3600.0;
        if magnitude > 90.0 {
            return Err(SkyError::InvalidParameter(format!(
                "Dec value '{}' out of range",
                value
            )));
        }
        if &caps[1] == "-" {
            Ok(-magnitude)
        } else {
            Ok(magnitude)
        }
    }

    /// Parses a sexagesimal or decimal RA/Dec pair.
    pub fn parse(ra: &str, dec: &str) -> SkyResult<SkyPosition> {
        Ok(SkyPosition::new(
            SkyPosition::parse_ra(ra)?,
            SkyPosition::parse_dec(dec)?,
        ))
    }

    /// RA as an `hh:mm:ss.ss` string in hours.
    pub fn format_ra(&self) -> String {
        let total_seconds = self.ra / 15.0 * 3600.0;
        let hours = (total_seconds / 3600.0).floor();
        let minutes = ((total_seconds - hours * 3600.0) / 60.0).floor();
        let seconds = total_seconds - hours * 3600.0 - minutes * 60.0;
        // Rounding seconds up to 60 would produce "xx:yy:60.00".
        let (hours, minutes, seconds) = carry_sexagesimal(hours, minutes, seconds, 59.995, 24.0);
        format!("{:02}:{:02}:{:05.2}", hours as u32, minutes as u32, seconds)
    }

    /// Dec as a signed `dd.mm.ss.s` string in degrees.
    pub fn format_dec(&self) -> String {
        let sign = if self.dec < 0.0 { '-' } else { '+' };
        let total_seconds = self.dec.abs() * 3600.0;
        let degrees = (total_seconds / 3600.0).floor();
        let minutes = ((total_seconds - degrees * 3600.0) / 60.0).floor();
        let seconds = total_seconds - degrees * 3600.0 - minutes * 60.0;
        let (degrees, minutes, seconds) = carry_sexagesimal(degrees, minutes, seconds, 59.95, 360.0);
        format!(
            "{}{:02}.{:02}.{:04.1}",
            sign, degrees as u32, minutes as u32, seconds
        )
    }
}

fn carry_sexagesimal(
    mut major: f64,
    mut minutes: f64,
    mut seconds: f64,
    carry_at: f64,
    wrap: f64,
) -> (f64, f64, f64) {
    if seconds >= carry_at {
        seconds = 0.0;
        minutes += 1.0;
    }
    if minutes >= 60.0 {
        minutes = 0.0;
        major += 1.0;
    }
    if major >= wrap {
        major = 0.0;
    }
    (major, minutes, seconds)
}

impl Display for SkyPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.format_ra(), self.format_dec())
    }
}
