//! Simulated spacecraft telemetry

use std::time::Instant;

use rand::Rng;
use serde::Serialize;

use crate::command::unix_seconds;

/// Bound on each simulated coordinate, in km
const POSITION_RANGE_KM: f64 = 1000.0;

/// Simulated position report
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: f64,
    pub unit: &'static str,
}

/// Produces telemetry for the HTTP surface
pub struct TelemetryReader {
    /// Start time for calculating uptime
    start_time: Instant,
}

impl TelemetryReader {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// A fresh random position, rounded to 10 m
    pub fn position(&self) -> Position {
        let mut rng = rand::rng();
        let mut coordinate = || {
            let km: f64 = rng.random_range(-POSITION_RANGE_KM..=POSITION_RANGE_KM);
            (km * 100.0).round() / 100.0
        };

        Position {
            x: coordinate(),
            y: coordinate(),
            z: coordinate(),
            timestamp: unix_seconds(),
            unit: "km",
        }
    }
}
