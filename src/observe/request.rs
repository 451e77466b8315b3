use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone};
use serde::Serialize;

use crate::error::ObservationError;

/// Longest object label accepted
pub const MAX_LABEL_LEN: usize = 40;

const DEFAULT_LABEL: &str = "image";
const DEFAULT_EPOCH: &str = "J2000";

/// Filter wheel positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Filter {
    Red,
    Blue,
    Green,
    Lunar,
    Clear,
}

impl Filter {
    /// Wheel position sent to the sync service
    pub fn id(self) -> u8 {
        match self {
            Filter::Red => 1,
            Filter::Blue => 2,
            Filter::Green => 3,
            Filter::Lunar => 4,
            Filter::Clear => 5,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Filter::Red => "red",
            Filter::Blue => "blue",
            Filter::Green => "green",
            Filter::Lunar => "lunar",
            Filter::Clear => "clear",
        };
        f.write_str(name)
    }
}

impl FromStr for Filter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "red" | "r" => Ok(Filter::Red),
            "2" | "blue" | "b" => Ok(Filter::Blue),
            "3" | "green" | "g" => Ok(Filter::Green),
            "4" | "lunar" => Ok(Filter::Lunar),
            "5" | "clear" | "c" => Ok(Filter::Clear),
            other => Err(format!("unknown filter: {}", other)),
        }
    }
}

/// One pointing and exposure request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRequest {
    /// `hh:mm:ss`
    pub right_ascension: String,
    /// `[+-]dd:mm:ss`
    pub declination: String,
    pub epoch: String,
    pub filter: Filter,
    pub exposure_seconds: u32,
    pub exposure_count: u32,
    pub object_label: Option<String>,
}

impl ObservationRequest {
    pub fn new(
        right_ascension: impl Into<String>,
        declination: impl Into<String>,
        filter: Filter,
        exposure_seconds: u32,
        exposure_count: u32,
    ) -> Self {
        Self {
            right_ascension: right_ascension.into(),
            declination: declination.into(),
            epoch: DEFAULT_EPOCH.to_string(),
            filter,
            exposure_seconds,
            exposure_count,
            object_label: None,
        }
    }

    pub fn with_epoch(mut self, epoch: impl Into<String>) -> Self {
        self.epoch = epoch.into();
        self
    }

    pub fn with_object(mut self, label: impl Into<String>) -> Self {
        self.object_label = Some(label.into());
        self
    }

    pub fn validate(&self) -> Result<(), ObservationError> {
        let invalid = |msg: String| Err(ObservationError::InvalidRequest(msg));

        match parse_sexagesimal(&self.right_ascension) {
            Some((sign, h, _, _)) if sign > 0.0 && h < 24 => {}
            _ => return invalid(format!("bad right ascension {:?}", self.right_ascension)),
        }

        match parse_sexagesimal(&self.declination) {
            Some((_, d, m, s)) if d < 90 || (d == 90 && m == 0 && s == 0.0) => {}
            _ => return invalid(format!("bad declination {:?}", self.declination)),
        }

        if self.epoch.trim().is_empty() || self.epoch.contains(char::is_whitespace) {
            return invalid(format!("bad epoch {:?}", self.epoch));
        }
        if self.exposure_seconds == 0 {
            return invalid("exposure time must be positive".to_string());
        }
        if self.exposure_count == 0 {
            return invalid("exposure count must be positive".to_string());
        }
        if let Some(label) = &self.object_label {
            if label.chars().count() > MAX_LABEL_LEN {
                return invalid(format!("object label longer than {}", MAX_LABEL_LEN));
            }
        }
        Ok(())
    }

    /// Object label reduced to filename-safe characters
    pub fn label(&self) -> String {
        let label: String = self
            .object_label
            .as_deref()
            .unwrap_or_default()
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        if label.is_empty() {
            DEFAULT_LABEL.to_string()
        } else {
            label
        }
    }

    /// Base filename tag: `<data_dir>/<label>-<timestamp>`
    pub fn base_filename<Tz>(&self, data_dir: &Path, at: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let name = format!("{}-{}", self.label(), at.format("%Y%m%d%H%M%S"));
        data_dir.join(name).display().to_string()
    }

    /// Properties staged on the sync service, in order
    pub fn parameters(&self, base_filename: &str) -> Vec<(&'static str, String)> {
        vec![
            ("RA", self.right_ascension.trim().to_string()),
            ("DEC", self.declination.trim().to_string()),
            ("EPOCH", self.epoch.trim().to_string()),
            ("FILTER", self.filter.id().to_string()),
            ("EXPTIME", self.exposure_seconds.to_string()),
            ("NEXP", self.exposure_count.to_string()),
            ("BFNAME", base_filename.to_string()),
        ]
    }
}

/// Expected total time of a run: one slew plus readout and exposure per frame.
///
/// Saturates at `Duration::MAX`.
pub fn estimate_duration(
    pointing_time: Duration,
    ccd_read_time: Duration,
    exposure_seconds: u64,
    exposure_count: u64,
) -> Duration {
    let per_frame = ccd_read_time.saturating_add(Duration::from_secs(exposure_seconds));
    let frames = u32::try_from(exposure_count).unwrap_or(u32::MAX);
    pointing_time.saturating_add(per_frame.saturating_mul(frames))
}

/// `[+-]a:b:c` into sign, whole parts and seconds
fn parse_sexagesimal(value: &str) -> Option<(f64, u32, u32, f64)> {
    let value = value.trim();
    let (sign, rest) = match value.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, value.strip_prefix('+').unwrap_or(value)),
    };

    let mut parts = rest.split(':');
    let major = parts.next()?.parse::<u32>().ok()?;
    let minutes = parts.next()?.parse::<u32>().ok()?;
    let seconds = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() || minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some((sign, major, minutes, seconds))
}
