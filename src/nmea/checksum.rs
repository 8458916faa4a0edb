//! # NMEA Checksum
//!
//! The NMEA-0183 checksum: XOR of every byte between `$` and `*`.

/// Compute the checksum over a sentence body (the text between `$` and `*`)
///
/// # Arguments
///
/// * `body` - Sentence body, e.g. `"GPRMC,123519,A,..."`
///
/// # Returns
///
/// * `u8` - XOR of all body bytes
pub fn nmea_checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Format a checksum as the two-digit uppercase hex suffix NMEA expects
pub fn format_checksum(sum: u8) -> String {
    format!("{:02X}", sum)
}
