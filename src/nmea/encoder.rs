//! # NMEA Sentence Encoder
//!
//! Builds outgoing sentences: coordinate formatting and checksummed
//! framing for the fused `RMC` messages the relay forwards.

use super::checksum::{format_checksum, nmea_checksum};
use super::protocol::{RmcData, NMEA_CHECKSUM_DELIMITER, NMEA_START};

/// Split signed fractional degrees into (is_positive, whole degrees, minutes)
pub fn degrees_to_sdm(signed_degrees: f64) -> (bool, u32, f64) {
    let unsigned = signed_degrees.abs();
    (
        signed_degrees >= 0.0,
        unsigned as u32,
        (unsigned * 60.0) % 60.0,
    )
}

/// Format a latitude as the NMEA "ddmm.mmm" field plus hemisphere
pub fn format_latitude(latitude: f64) -> (String, char) {
    let (positive, degrees, minutes) = degrees_to_sdm(latitude);
    (
        format!("{:02}{:06.3}", degrees, minutes),
        if positive { 'N' } else { 'S' },
    )
}

/// Format a longitude as the NMEA "dddmm.mmm" field plus hemisphere
pub fn format_longitude(longitude: f64) -> (String, char) {
    let (positive, degrees, minutes) = degrees_to_sdm(longitude);
    (
        format!("{:03}{:06.3}", degrees, minutes),
        if positive { 'E' } else { 'W' },
    )
}

/// Frame a sentence with `$`, the address, payload fields and checksum
///
/// The terminator is not appended; callers add it when building a
/// datagram so one place owns the wire framing.
pub fn encode_sentence(talker: &str, mnemonic: &str, fields: &[String]) -> String {
    let body = format!("{}{},{}", talker, mnemonic, fields.join(","));
    let sum = nmea_checksum(&body);
    format!(
        "{}{}{}{}",
        NMEA_START,
        body,
        NMEA_CHECKSUM_DELIMITER,
        format_checksum(sum)
    )
}

/// Encode a decoded RMC back onto the wire
pub fn encode_rmc(rmc: &RmcData) -> String {
    encode_sentence(&rmc.talker, super::protocol::RMC_MNEMONIC, &rmc.fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nmea::decoder::{parse_rmc, parse_sentence};

    #[test]
    fn test_degrees_to_sdm_positive() {
        let (positive, degrees, minutes) = degrees_to_sdm(48.1173);
        assert!(positive);
        assert_eq!(degrees, 48);
        assert!((minutes - 7.038).abs() < 1e-9);
    }

    #[test]
    fn test_degrees_to_sdm_negative() {
        let (positive, degrees, minutes) = degrees_to_sdm(-11.516_666_666_666_667);
        assert!(!positive);
        assert_eq!(degrees, 11);
        assert!((minutes - 31.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_latitude() {
        let (field, hemisphere) = format_latitude(48.1173);
        assert_eq!(field, "4807.038");
        assert_eq!(hemisphere, 'N');

        let (field, hemisphere) = format_latitude(-48.1173);
        assert_eq!(field, "4807.038");
        assert_eq!(hemisphere, 'S');
    }

    #[test]
    fn test_format_longitude_pads_three_degree_digits() {
        let (field, hemisphere) = format_longitude(11.516_666_666_666_667);
        assert_eq!(field, "01131.000");
        assert_eq!(hemisphere, 'E');

        let (field, hemisphere) = format_longitude(-120.5);
        assert_eq!(field, "12030.000");
        assert_eq!(hemisphere, 'W');
    }

    #[test]
    fn test_format_zero_coordinates() {
        assert_eq!(format_latitude(0.0).0, "0000.000");
        assert_eq!(format_longitude(0.0).0, "00000.000");
    }

    #[test]
    fn test_encode_sentence_checksum() {
        let fields: Vec<String> = "123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W"
            .split(',')
            .map(str::to_string)
            .collect();
        let line = encode_sentence("GP", "RMC", &fields);
        assert_eq!(
            line,
            "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A"
        );
    }

    #[test]
    fn test_encode_rmc_round_trips_parsed_sentence() {
        let line = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
        let rmc = parse_rmc(&parse_sentence(line).unwrap()).unwrap();
        assert_eq!(encode_rmc(&rmc), line);
    }
}
