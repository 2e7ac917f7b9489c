//! # Unit Formatting
//!
//! Converts telemetry values held internally in metric units into display
//! strings for the operator's preferred unit system.

use std::fmt;
use std::str::FromStr;

const FEET_PER_METER: f64 = 3.28084;
const FEET_PER_MILE: f64 = 5280.0;
const MPH_PER_KMH: f64 = 0.621371;

/// Operator-selected unit system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

impl FromStr for UnitSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metric" => Ok(UnitSystem::Metric),
            "imperial" => Ok(UnitSystem::Imperial),
            other => Err(format!("unknown unit system '{}'", other)),
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitSystem::Metric => write!(f, "metric"),
            UnitSystem::Imperial => write!(f, "imperial"),
        }
    }
}

impl UnitSystem {
    /// Format a distance given in meters; switches to km or miles for
    /// long distances
    pub fn format_distance(self, meters: f64) -> String {
        match self {
            UnitSystem::Metric => {
                if meters.abs() >= 1000.0 {
                    format!("{:.2} km", meters / 1000.0)
                } else {
                    format!("{:.0} m", meters)
                }
            }
            UnitSystem::Imperial => {
                let feet = meters * FEET_PER_METER;
                if feet.abs() >= FEET_PER_MILE {
                    format!("{:.2} mi", feet / FEET_PER_MILE)
                } else {
                    format!("{:.0} ft", feet)
                }
            }
        }
    }

    /// Format an altitude given in meters
    pub fn format_altitude(self, meters: f64) -> String {
        match self {
            UnitSystem::Metric => format!("{:.1} m", meters),
            UnitSystem::Imperial => format!("{:.0} ft", meters * FEET_PER_METER),
        }
    }

    /// Format a ground speed given in km/h
    pub fn format_speed(self, kmh: f64) -> String {
        match self {
            UnitSystem::Metric => format!("{:.1} km/h", kmh),
            UnitSystem::Imperial => format!("{:.1} mph", kmh * MPH_PER_KMH),
        }
    }

    /// Format a climb rate given in m/s
    pub fn format_vertical_speed(self, ms: f64) -> String {
        match self {
            UnitSystem::Metric => format!("{:.1} m/s", ms),
            UnitSystem::Imperial => format!("{:.0} ft/min", ms * FEET_PER_METER * 60.0),
        }
    }
}
