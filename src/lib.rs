//! # USBL Relay Library
//!
//! Relay GPS and USBL position data to a ground control station and an ROV.
//!
//! This library reads NMEA position fixes from a GPS receiver (`RMC`) and a
//! Cerulean ROVL USBL receiver (`RTH`), fuses the relative acoustic fix
//! with the GPS origin, and forwards consolidated vehicle positions over
//! UDP. The [`controller::RelayController`] type exposes the operation set
//! a front end consumes.

pub mod config;
pub mod error;
pub mod event;
pub mod fix;
pub mod nmea;
pub mod serial;
pub mod reader;
pub mod endpoint;
pub mod controller;
