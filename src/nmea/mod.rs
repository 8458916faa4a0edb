//! # NMEA-0183 Protocol Module
//!
//! Encoding and decoding of the NMEA sentences this relay handles:
//! - `RMC` (recommended minimum) fixes from the GPS receiver
//! - `RTH` (range/bearing) fixes from the Cerulean ROVL USBL receiver

pub mod checksum;
pub mod decoder;
pub mod encoder;
pub mod protocol;
