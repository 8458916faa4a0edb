//! # Position Fusion
//!
//! Converts a relative USBL fix into absolute coordinates using the GPS
//! origin, and builds the fused `RMC` sentence that gets forwarded.
//!
//! The projection treats the earth as a sphere of equatorial radius: the
//! horizontal component of the slant range is split into north/east
//! offsets by the compass bearing, converted to degrees of latitude
//! directly and degrees of longitude scaled by cos(latitude). Adequate for
//! the few hundred meters a USBL link spans.

use crate::nmea::protocol::{
    RmcData, RthData, FUSED_TALKER, RMC_FIELD_DATE, RMC_FIELD_STATUS,
};
use crate::nmea::encoder::{format_latitude, format_longitude};

/// Earth equatorial radius in meters (WGS-84)
pub const EARTH_RADIUS_METERS: f64 = 6_378_137.0;

/// Degree offsets produced by moving north/east from a given latitude
pub fn offset_degrees(latitude: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let d_lat = (north_m / EARTH_RADIUS_METERS).to_degrees();
    let d_lon = (east_m / (EARTH_RADIUS_METERS * latitude.to_radians().cos())).to_degrees();
    (d_lat, d_lon)
}

/// Absolute position of the target described by `rth`, relative to `origin`
pub fn project_fix(origin: &RmcData, rth: &RthData) -> (f64, f64) {
    let horizontal = rth.horizontal_range();
    let north = rth.compass_bearing.to_radians().cos() * horizontal;
    let east = rth.compass_bearing.to_radians().sin() * horizontal;

    let (d_lat, d_lon) = offset_degrees(origin.latitude, north, east);
    (origin.latitude + d_lat, origin.longitude + d_lon)
}

/// Build the fused RMC sentence for a USBL fix
///
/// Keeps the origin's time, status and trailing fields (date, magnetic
/// variation), replaces the coordinates with the projected target position
/// and blanks speed/course, which describe the surface receiver rather
/// than the vehicle.
pub fn fuse_rmc_rth(origin: &RmcData, rth: &RthData) -> RmcData {
    let (latitude, longitude) = project_fix(origin, rth);

    let (lat_field, lat_hemisphere) = format_latitude(latitude);
    let (lon_field, lon_hemisphere) = format_longitude(longitude);

    let mut fields: Vec<String> = Vec::with_capacity(origin.fields.len());
    fields.extend(origin.fields[..=RMC_FIELD_STATUS].iter().cloned());
    fields.push(lat_field);
    fields.push(lat_hemisphere.to_string());
    fields.push(lon_field);
    fields.push(lon_hemisphere.to_string());
    fields.push(String::new());
    fields.push(String::new());
    fields.extend(origin.fields[RMC_FIELD_DATE..].iter().cloned());

    RmcData {
        talker: FUSED_TALKER.to_string(),
        fields,
        valid: true,
        latitude,
        longitude,
    }
}
