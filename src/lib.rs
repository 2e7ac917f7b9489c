//! # MSP Link Library
//!
//! Ground station telemetry engine for MultiWii Serial Protocol (MSP)
//! flight controllers.
//!
//! This library provides the MSP frame codec, the serial transport
//! channel, the adaptive command scheduler, the observable vehicle state
//! store, and the voice alarm engine that together make up the telemetry
//! side of a ground station.

pub mod alarm;
pub mod config;
pub mod engine;
pub mod error;
pub mod flightlog;
pub mod location;
pub mod msp;
pub mod scheduler;
pub mod transport;
pub mod units;
pub mod vehicle;
