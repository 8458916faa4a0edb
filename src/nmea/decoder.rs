//! # NMEA Sentence Decoder
//!
//! Splits raw lines into framed sentences and decodes the `RMC` and `RTH`
//! payloads.

use super::checksum::nmea_checksum;
use super::protocol::*;
use crate::error::SourceError;

/// Parse a raw line into a framed sentence
///
/// Verifies the `$` start, the length limit and — when present — the
/// trailing checksum, then splits the address into talker and mnemonic.
/// A missing checksum is tolerated (some receivers omit it); a wrong one
/// is not.
///
/// # Errors
///
/// Returns `ProtocolError` if:
/// - The line does not start with `$`
/// - The line exceeds the NMEA length limit
/// - The checksum is present but does not match
/// - The address field is too short to hold a talker and mnemonic
pub fn parse_sentence(line: &str) -> Result<Sentence, SourceError> {
    let line = line.trim_end_matches(['\r', '\n']);

    if !line.starts_with(NMEA_START) {
        return Err(SourceError::ProtocolError(format!(
            "sentence does not start with '$': {:?}",
            line
        )));
    }

    if line.len() > NMEA_MAX_SENTENCE_LEN {
        return Err(SourceError::ProtocolError(format!(
            "sentence exceeds {} characters",
            NMEA_MAX_SENTENCE_LEN
        )));
    }

    // Strip "$", then split off "*XX" if present and verify it
    let inner = &line[1..];
    let body = match inner.rsplit_once(NMEA_CHECKSUM_DELIMITER) {
        Some((body, given)) => {
            let expected = nmea_checksum(body);
            let given = u8::from_str_radix(given, 16).map_err(|_| {
                SourceError::ProtocolError(format!("malformed checksum field: {:?}", given))
            })?;
            if given != expected {
                return Err(SourceError::ProtocolError(format!(
                    "checksum mismatch: expected {:02X}, got {:02X}",
                    expected, given
                )));
            }
            body
        }
        None => inner,
    };

    let mut parts = body.split(',');
    let address = parts.next().unwrap_or_default();
    if address.len() < 5 {
        return Err(SourceError::ProtocolError(format!(
            "address field too short: {:?}",
            address
        )));
    }

    let (talker, mnemonic) = address.split_at(address.len() - 3);

    Ok(Sentence {
        talker: talker.to_string(),
        mnemonic: mnemonic.to_string(),
        fields: parts.map(str::to_string).collect(),
    })
}

/// Decode an RMC payload
///
/// A sentence with status `V` (void) decodes successfully with
/// `valid == false` and zeroed coordinates; the caller decides whether to
/// use it. Anything structurally wrong is a `ProtocolError`.
pub fn parse_rmc(sentence: &Sentence) -> Result<RmcData, SourceError> {
    if sentence.mnemonic != RMC_MNEMONIC {
        return Err(SourceError::ProtocolError(format!(
            "expected RMC sentence, got {}",
            sentence.mnemonic
        )));
    }

    if sentence.fields.len() < RMC_MIN_FIELD_COUNT {
        return Err(SourceError::ProtocolError(format!(
            "RMC payload too short: {} fields",
            sentence.fields.len()
        )));
    }

    let status = sentence.fields[RMC_FIELD_STATUS].as_str();
    let valid = match status {
        "A" => true,
        "V" => false,
        other => {
            return Err(SourceError::ProtocolError(format!(
                "unknown RMC status: {:?}",
                other
            )));
        }
    };

    let (latitude, longitude) = if valid {
        let latitude = parse_coordinate(
            &sentence.fields[RMC_FIELD_LATITUDE],
            &sentence.fields[RMC_FIELD_LAT_HEMISPHERE],
        )?;
        let longitude = parse_coordinate(
            &sentence.fields[RMC_FIELD_LONGITUDE],
            &sentence.fields[RMC_FIELD_LON_HEMISPHERE],
        )?;
        (latitude, longitude)
    } else {
        (0.0, 0.0)
    };

    Ok(RmcData {
        talker: sentence.talker.clone(),
        fields: sentence.fields.clone(),
        valid,
        latitude,
        longitude,
    })
}

/// Decode an RTH payload from the ROVL receiver
pub fn parse_rth(sentence: &Sentence) -> Result<RthData, SourceError> {
    if sentence.mnemonic != RTH_MNEMONIC {
        return Err(SourceError::ProtocolError(format!(
            "expected RTH sentence, got {}",
            sentence.mnemonic
        )));
    }

    if sentence.fields.len() < RTH_FIELD_COUNT {
        return Err(SourceError::ProtocolError(format!(
            "RTH payload too short: {} fields",
            sentence.fields.len()
        )));
    }

    let mut values = [0.0f64; RTH_FIELD_COUNT];
    for (i, value) in values.iter_mut().enumerate() {
        *value = sentence.fields[i].parse().map_err(|_| {
            SourceError::ProtocolError(format!(
                "RTH field {} is not a number: {:?}",
                i, sentence.fields[i]
            ))
        })?;
    }

    Ok(RthData {
        apparent_bearing: values[0],
        apparent_compass_bearing: values[1],
        apparent_elevation: values[2],
        slant_range: values[3],
        true_bearing: values[4],
        compass_bearing: values[5],
        true_elevation: values[6],
        roll: values[7],
        pitch: values[8],
        yaw: values[9],
        compass_heading: values[10],
        agc_gain: values[11],
    })
}

/// Parse an NMEA "ddmm.mmmm" coordinate plus hemisphere into signed degrees
///
/// Degrees are everything left of the two digits preceding the decimal
/// point; the remainder is minutes. South and west are negative.
fn parse_coordinate(value: &str, hemisphere: &str) -> Result<f64, SourceError> {
    let dot = value.find('.').unwrap_or(value.len());
    if dot < 3 {
        return Err(SourceError::ProtocolError(format!(
            "coordinate too short: {:?}",
            value
        )));
    }

    let (degrees_part, minutes_part) = value.split_at(dot - 2);
    let degrees: f64 = degrees_part.parse().map_err(|_| {
        SourceError::ProtocolError(format!("bad coordinate degrees: {:?}", value))
    })?;
    let minutes: f64 = minutes_part.parse().map_err(|_| {
        SourceError::ProtocolError(format!("bad coordinate minutes: {:?}", value))
    })?;

    let unsigned = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Ok(unsigned),
        "S" | "W" => Ok(-unsigned),
        other => Err(SourceError::ProtocolError(format!(
            "unknown hemisphere: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RMC_LINE: &str =
        "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    const RMC_VOID_LINE: &str = "$GPRMC,,V,,,,,,,230394,,*3E";
    const RTH_LINE: &str =
        "$USRTH,45.0,45.0,-10.0,100.0,90.0,90.0,-10.0,0.5,-0.3,12.0,180.0,20.0*6A";

    #[test]
    fn test_parse_sentence_splits_address() {
        let sentence = parse_sentence(RMC_LINE).unwrap();
        assert_eq!(sentence.talker, "GP");
        assert_eq!(sentence.mnemonic, "RMC");
        assert_eq!(sentence.fields.len(), 11);
        assert_eq!(sentence.fields[0], "123519");
    }

    #[test]
    fn test_parse_sentence_rejects_missing_start() {
        let result = parse_sentence("GPRMC,123519,A");
        assert!(matches!(result, Err(SourceError::ProtocolError(_))));
    }

    #[test]
    fn test_parse_sentence_rejects_bad_checksum() {
        let line = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*00";
        let err = parse_sentence(line).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_parse_sentence_tolerates_missing_checksum() {
        let sentence = parse_sentence("$GPRMC,123519,A,4807.038,N,01131.000,E,,,230394,,").unwrap();
        assert_eq!(sentence.mnemonic, "RMC");
    }

    #[test]
    fn test_parse_sentence_accepts_trailing_terminator() {
        let line = format!("{}\r\n", RMC_LINE);
        assert!(parse_sentence(&line).is_ok());
    }

    #[test]
    fn test_parse_rmc_canonical_fix() {
        let rmc = parse_rmc(&parse_sentence(RMC_LINE).unwrap()).unwrap();
        assert!(rmc.valid);
        // 48 deg 07.038 min = 48.1173 deg
        assert!((rmc.latitude - 48.1173).abs() < 1e-9);
        // 11 deg 31.000 min = 11.51666... deg
        assert!((rmc.longitude - 11.516_666_666_666_667).abs() < 1e-9);
        assert_eq!(rmc.talker, "GP");
    }

    #[test]
    fn test_parse_rmc_void_fix_is_invalid_not_error() {
        let rmc = parse_rmc(&parse_sentence(RMC_VOID_LINE).unwrap()).unwrap();
        assert!(!rmc.valid);
        assert_eq!(rmc.latitude, 0.0);
        assert_eq!(rmc.longitude, 0.0);
    }

    #[test]
    fn test_parse_rmc_rejects_wrong_mnemonic() {
        let gga = parse_sentence(
            "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47",
        )
        .unwrap();
        assert!(parse_rmc(&gga).is_err());
    }

    #[test]
    fn test_parse_rth_fields() {
        let rth = parse_rth(&parse_sentence(RTH_LINE).unwrap()).unwrap();
        assert!((rth.compass_bearing - 90.0).abs() < 1e-9);
        assert!((rth.slant_range - 100.0).abs() < 1e-9);
        assert!((rth.true_elevation + 10.0).abs() < 1e-9);
        assert!((rth.agc_gain - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_rth_rejects_non_numeric_field() {
        let sentence = parse_sentence("$USRTH,a,b,c,d,e,f,g,h,i,j,k,l").unwrap();
        assert!(parse_rth(&sentence).is_err());
    }

    #[test]
    fn test_parse_coordinate_hemispheres() {
        assert!((parse_coordinate("4807.038", "N").unwrap() - 48.1173).abs() < 1e-9);
        assert!((parse_coordinate("4807.038", "S").unwrap() + 48.1173).abs() < 1e-9);
        assert!((parse_coordinate("01131.000", "W").unwrap() + 11.516_666_666_666_667).abs() < 1e-9);
        assert!(parse_coordinate("4807.038", "Q").is_err());
        assert!(parse_coordinate("7", "N").is_err());
    }
}
