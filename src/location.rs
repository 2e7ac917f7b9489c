//! # Location Sources
//!
//! Abstraction over the ground station's own position, used to steer the
//! vehicle toward the operator in follow mode.

/// A WGS84 position fix for the ground station
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// Source of the ground station's current position
///
/// Returning `None` means no fix is available right now; the caller skips
/// that update cycle rather than sending a stale position.
pub trait LocationProvider: Send {
    fn current_position(&mut self) -> Option<Coordinate>;
}

/// Fixed-position provider, useful for bench setups and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticLocation(pub Coordinate);

impl LocationProvider for StaticLocation {
    fn current_position(&mut self) -> Option<Coordinate> {
        Some(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_location_always_returns_fix() {
        let mut provider = StaticLocation(Coordinate { latitude: 48.137, longitude: 11.575 });
        assert_eq!(
            provider.current_position(),
            Some(Coordinate { latitude: 48.137, longitude: 11.575 })
        );
    }
}
