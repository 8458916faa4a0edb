//! # Position Fix Types
//!
//! The records a position source reader hands to the controller. A fix is
//! immutable once produced: ownership passes from reader to controller on
//! emission and the fix is discarded after the merge/forward path.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Instant;

use crate::nmea::protocol::{RmcData, RthData};

/// Which receiver produced a fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FixSource {
    Gps,
    Usbl,
}

impl fmt::Display for FixSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixSource::Gps => write!(f, "GPS"),
            FixSource::Usbl => write!(f, "USBL"),
        }
    }
}

/// An absolute geodetic fix decoded from a GPS `RMC` sentence
#[derive(Debug, Clone)]
pub struct GpsFix {
    /// Decoded sentence (valid fixes only reach the controller)
    pub data: RmcData,

    /// The raw sentence text, kept for pass-through forwarding
    pub raw: String,

    /// Monotonic receive instant, used for staleness checks
    pub received_at: Instant,

    /// Wall-clock receive time
    pub timestamp: DateTime<Utc>,
}

impl GpsFix {
    pub fn new(data: RmcData, raw: String) -> Self {
        Self {
            data,
            raw,
            received_at: Instant::now(),
            timestamp: Utc::now(),
        }
    }

    /// Time elapsed since this fix was received
    pub fn age(&self) -> std::time::Duration {
        self.received_at.elapsed()
    }
}

/// A relative acoustic fix decoded from a ROVL `RTH` sentence
///
/// Positions the vehicle relative to the receiver; it becomes absolute only
/// after fusion with a GPS origin.
#[derive(Debug, Clone)]
pub struct UsblFix {
    /// Decoded sentence
    pub data: RthData,

    /// Monotonic receive instant
    pub received_at: Instant,

    /// Wall-clock receive time
    pub timestamp: DateTime<Utc>,
}

impl UsblFix {
    pub fn new(data: RthData) -> Self {
        Self {
            data,
            received_at: Instant::now(),
            timestamp: Utc::now(),
        }
    }
}

/// A single timestamped position measurement from one source
#[derive(Debug, Clone)]
pub enum PositionFix {
    Gps(GpsFix),
    Usbl(UsblFix),
}

impl PositionFix {
    pub fn source(&self) -> FixSource {
        match self {
            PositionFix::Gps(_) => FixSource::Gps,
            PositionFix::Usbl(_) => FixSource::Usbl,
        }
    }

    pub fn received_at(&self) -> Instant {
        match self {
            PositionFix::Gps(fix) => fix.received_at,
            PositionFix::Usbl(fix) => fix.received_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea::decoder::{parse_rmc, parse_rth, parse_sentence};

    const RMC_LINE: &str =
        "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    const RTH_LINE: &str =
        "$USRTH,45.0,45.0,-10.0,100.0,90.0,90.0,-10.0,0.5,-0.3,12.0,180.0,20.0*6A";

    #[test]
    fn test_fix_source_display() {
        assert_eq!(FixSource::Gps.to_string(), "GPS");
        assert_eq!(FixSource::Usbl.to_string(), "USBL");
    }

    #[test]
    fn test_gps_fix_keeps_raw_sentence() {
        let rmc = parse_rmc(&parse_sentence(RMC_LINE).unwrap()).unwrap();
        let fix = GpsFix::new(rmc, RMC_LINE.to_string());
        assert_eq!(fix.raw, RMC_LINE);
        assert!(fix.age() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_position_fix_source() {
        let rmc = parse_rmc(&parse_sentence(RMC_LINE).unwrap()).unwrap();
        let rth = parse_rth(&parse_sentence(RTH_LINE).unwrap()).unwrap();
        assert_eq!(
            PositionFix::Gps(GpsFix::new(rmc, RMC_LINE.to_string())).source(),
            FixSource::Gps
        );
        assert_eq!(PositionFix::Usbl(UsblFix::new(rth)).source(), FixSource::Usbl);
    }
}
