//! # NMEA Protocol Constants and Types
//!
//! Sentence framing constants and the decoded forms of the two sentence
//! types this relay consumes: GPS `RMC` and Cerulean ROVL `RTH`.

/// Sentence start delimiter
pub const NMEA_START: char = '$';

/// Checksum delimiter
pub const NMEA_CHECKSUM_DELIMITER: char = '*';

/// Sentence terminator on the wire
pub const NMEA_TERMINATOR: &str = "\r\n";

/// Maximum sentence length including `$` and checksum (NMEA-0183 limit)
pub const NMEA_MAX_SENTENCE_LEN: usize = 82;

/// Mnemonic of the recommended-minimum GPS sentence
pub const RMC_MNEMONIC: &str = "RMC";

/// Mnemonic of the ROVL range/bearing sentence
pub const RTH_MNEMONIC: &str = "RTH";

/// Talker used for fused sentences (mixed-source, "GN" = combined GNSS)
pub const FUSED_TALKER: &str = "GN";

/// Number of fields in an RTH payload
pub const RTH_FIELD_COUNT: usize = 12;

/// Minimum RMC payload fields (through the date field)
pub const RMC_MIN_FIELD_COUNT: usize = 9;

// RMC payload field indices
pub const RMC_FIELD_TIME: usize = 0;
pub const RMC_FIELD_STATUS: usize = 1;
pub const RMC_FIELD_LATITUDE: usize = 2;
pub const RMC_FIELD_LAT_HEMISPHERE: usize = 3;
pub const RMC_FIELD_LONGITUDE: usize = 4;
pub const RMC_FIELD_LON_HEMISPHERE: usize = 5;
pub const RMC_FIELD_SPEED: usize = 6;
pub const RMC_FIELD_COURSE: usize = 7;
pub const RMC_FIELD_DATE: usize = 8;

/// A framed NMEA sentence, split into address and payload fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    /// Talker id, e.g. "GP", "GN", "US"
    pub talker: String,

    /// Sentence mnemonic, e.g. "RMC", "RTH"
    pub mnemonic: String,

    /// Payload fields (everything after the address, comma-separated)
    pub fields: Vec<String>,
}

/// Decoded RMC sentence
///
/// Keeps the raw payload fields so a fused sentence can be re-encoded with
/// the time/date fields of the fix it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct RmcData {
    /// Talker id of the received sentence
    pub talker: String,

    /// Raw payload fields as received
    pub fields: Vec<String>,

    /// Status field was "A" (active fix)
    pub valid: bool,

    /// Latitude in signed degrees (negative = south); 0.0 when invalid
    pub latitude: f64,

    /// Longitude in signed degrees (negative = west); 0.0 when invalid
    pub longitude: f64,
}

/// Decoded RTH sentence from the ROVL receiver
///
/// Field order follows the ROVL documentation; the fusion path uses
/// `compass_bearing`, `true_elevation` and `slant_range`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RthData {
    /// Apparent bearing to target in degrees
    pub apparent_bearing: f64,

    /// Apparent bearing to target in compass degrees
    pub apparent_compass_bearing: f64,

    /// Apparent elevation to target in degrees
    pub apparent_elevation: f64,

    /// Slant range in meters
    pub slant_range: f64,

    /// True bearing to target in degrees
    pub true_bearing: f64,

    /// True bearing to target in compass degrees
    pub compass_bearing: f64,

    /// True elevation to target in degrees (negative = below surface)
    pub true_elevation: f64,

    /// Euler roll of the receiver in degrees
    pub roll: f64,

    /// Euler pitch of the receiver in degrees
    pub pitch: f64,

    /// Euler yaw of the receiver in degrees
    pub yaw: f64,

    /// Compass heading in degrees
    pub compass_heading: f64,

    /// AGC gain in dB
    pub agc_gain: f64,
}

impl RthData {
    /// Horizontal component of the slant range in meters
    pub fn horizontal_range(&self) -> f64 {
        self.slant_range * self.true_elevation.to_radians().cos()
    }

    /// Depth of the target below the receiver in meters
    ///
    /// Positive when the target is below the surface (negative elevation).
    pub fn depth(&self) -> f64 {
        -self.slant_range * self.true_elevation.to_radians().sin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rth(slant_range: f64, true_elevation: f64) -> RthData {
        RthData {
            apparent_bearing: 0.0,
            apparent_compass_bearing: 0.0,
            apparent_elevation: 0.0,
            slant_range,
            true_bearing: 0.0,
            compass_bearing: 0.0,
            true_elevation,
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            compass_heading: 0.0,
            agc_gain: 0.0,
        }
    }

    #[test]
    fn test_horizontal_range_level_target() {
        // Elevation 0 means the whole slant range is horizontal
        assert!((rth(100.0, 0.0).horizontal_range() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_horizontal_range_steep_target() {
        // cos(60 deg) = 0.5
        assert!((rth(100.0, -60.0).horizontal_range() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_depth_below_surface_is_positive() {
        // sin(-30 deg) = -0.5, so depth = 50 m below
        assert!((rth(100.0, -30.0).depth() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_rmc_field_indices_match_sentence_layout() {
        // $GPRMC,time,status,lat,N,lon,E,speed,course,date,...
        assert_eq!(RMC_FIELD_TIME, 0);
        assert_eq!(RMC_FIELD_STATUS, 1);
        assert_eq!(RMC_FIELD_DATE, 8);
        assert!(RMC_MIN_FIELD_COUNT > RMC_FIELD_DATE);
    }
}
