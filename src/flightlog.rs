//! # Flight Log
//!
//! Records telemetry to JSONL (JSON Lines) files, one file per flight
//! session. Each line is a self-contained snapshot, so a truncated file
//! from a crash or power loss still parses up to the last complete line.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::vehicle::Vehicle;

/// One telemetry snapshot, serialized as a single JSONL line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    pub armed: bool,
    pub battery_volts: f64,
    pub amps: f64,
    pub rssi: i32,
    pub gps_fix: bool,
    pub gps_num_sats: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub distance_to_home: f64,
    pub heading: f64,
}

impl TelemetryRecord {
    /// Snapshot the loggable subset of the vehicle state
    pub fn from_vehicle(vehicle: &Vehicle) -> Self {
        Self {
            timestamp: Utc::now(),
            armed: *vehicle.armed.get(),
            battery_volts: *vehicle.battery_volts.get(),
            amps: *vehicle.amps.get(),
            rssi: *vehicle.rssi.get(),
            gps_fix: *vehicle.gps_fix.get(),
            gps_num_sats: *vehicle.gps_num_sats.get(),
            latitude: *vehicle.latitude.get(),
            longitude: *vehicle.longitude.get(),
            altitude: *vehicle.altitude.get(),
            speed: *vehicle.speed.get(),
            distance_to_home: *vehicle.distance_to_home.get(),
            heading: *vehicle.heading.get(),
        }
    }
}

/// Appends telemetry records to a per-session JSONL file
pub struct FlightLogRecorder {
    writer: BufWriter<File>,
    path: PathBuf,
    records_written: u64,
}

impl std::fmt::Debug for FlightLogRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightLogRecorder")
            .field("path", &self.path)
            .field("records_written", &self.records_written)
            .finish()
    }
}

impl FlightLogRecorder {
    /// Create a new session file under `log_dir`, named after the start time
    pub fn create<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        fs::create_dir_all(&log_dir)?;

        let filename = format!("flight-{}.jsonl", Utc::now().format("%Y%m%d-%H%M%S"));
        let path = log_dir.as_ref().join(filename);

        let file = OpenOptions::new().create_new(true).write(true).open(&path)?;
        info!("flight log started at {}", path.display());

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            records_written: 0,
        })
    }

    /// Append one record as a JSONL line
    pub fn record(&mut self, record: &TelemetryRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(b"\n")?;
        self.records_written += 1;
        Ok(())
    }

    /// Flush buffered records to disk
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Close the session, flushing any buffered data
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        debug!(
            "flight log closed: {} records in {}",
            self.records_written,
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_record() -> TelemetryRecord {
        TelemetryRecord {
            timestamp: Utc::now(),
            armed: true,
            battery_volts: 15.8,
            amps: 12.4,
            rssi: 87,
            gps_fix: true,
            gps_num_sats: 9,
            latitude: 48.137154,
            longitude: 11.576124,
            altitude: 42.5,
            speed: 18.3,
            distance_to_home: 120.0,
            heading: 270.0,
        }
    }

    #[test]
    fn test_records_appear_as_parseable_lines() {
        let dir = TempDir::new().unwrap();
        let mut recorder = FlightLogRecorder::create(dir.path()).unwrap();

        recorder.record(&sample_record()).unwrap();
        recorder.record(&sample_record()).unwrap();
        assert_eq!(recorder.records_written(), 2);

        let path = recorder.path().to_path_buf();
        recorder.close().unwrap();

        let contents = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: TelemetryRecord = serde_json::from_str(lines[0]).unwrap();
        assert!(parsed.armed);
        assert_eq!(parsed.gps_num_sats, 9);
    }

    #[test]
    fn test_record_from_vehicle_snapshot() {
        let mut vehicle = Vehicle::new();
        vehicle.battery_volts.set(16.2);
        vehicle.gps_num_sats.set(7);

        let record = TelemetryRecord::from_vehicle(&vehicle);
        assert_eq!(record.battery_volts, 16.2);
        assert_eq!(record.gps_num_sats, 7);
        assert!(!record.armed);
    }

    #[test]
    fn test_session_files_live_under_log_dir() {
        let dir = TempDir::new().unwrap();
        let recorder = FlightLogRecorder::create(dir.path()).unwrap();
        assert!(recorder.path().starts_with(dir.path()));
        assert!(recorder.path().extension().is_some_and(|e| e == "jsonl"));
    }
}
