//! # Vehicle State Store
//!
//! Observable typed values describing the remote vehicle, updated by the
//! frame-decoding path.
//!
//! Every decoded frame maps to one or more field writes; writes notify
//! subscribers synchronously on the task that decoded the frame, then
//! control returns to the transport read loop. Writes are write-always:
//! an unchanged value still ticks its subscribers, so a consumer can use
//! any field as a freshness signal.

pub mod observable;

use bytes::Buf;
use tracing::{debug, trace};

use crate::msp::protocol::*;

pub use observable::{ObservableValue, SubscriptionHandle};

/// Default per-cell voltage thresholds, replaced once MSP_MISC arrives
const DEFAULT_VBAT_WARNING_CELL: f64 = 3.5;
const DEFAULT_VBAT_MIN_CELL: f64 = 3.3;
const DEFAULT_VBAT_MAX_CELL: f64 = 4.3;

/// Observable vehicle state
///
/// Owned by the engine context; subscribers hold registration handles
/// only, never ownership, so the store can be torn down independently.
pub struct Vehicle {
    // Link state
    pub connected: ObservableValue<bool>,
    pub no_data_received: ObservableValue<bool>,

    // Flight status (MSP_STATUS)
    pub armed: ObservableValue<bool>,
    pub gps_position_mode: ObservableValue<bool>,

    // Battery and radio (MSP_ANALOG / MSP_MISC)
    pub battery_volts: ObservableValue<f64>,
    pub battery_cells: ObservableValue<u32>,
    pub amps: ObservableValue<f64>,
    pub rssi: ObservableValue<i32>,
    pub vbat_warning_cell: ObservableValue<f64>,
    pub vbat_min_cell: ObservableValue<f64>,
    pub vbat_max_cell: ObservableValue<f64>,

    // Position (MSP_RAW_GPS / MSP_COMP_GPS)
    pub gps_fix: ObservableValue<bool>,
    pub gps_num_sats: ObservableValue<u32>,
    pub latitude: ObservableValue<f64>,
    pub longitude: ObservableValue<f64>,
    pub gps_altitude: ObservableValue<f64>,
    pub speed: ObservableValue<f64>,
    pub distance_to_home: ObservableValue<f64>,
    pub direction_to_home: ObservableValue<f64>,

    // Attitude and altitude (MSP_ATTITUDE / MSP_ALTITUDE)
    pub roll: ObservableValue<f64>,
    pub pitch: ObservableValue<f64>,
    pub heading: ObservableValue<f64>,
    pub altitude: ObservableValue<f64>,
    pub vario: ObservableValue<f64>,
}

impl Default for Vehicle {
    fn default() -> Self {
        Self::new()
    }
}

impl Vehicle {
    pub fn new() -> Self {
        Self {
            connected: ObservableValue::new(false),
            no_data_received: ObservableValue::new(false),
            armed: ObservableValue::new(false),
            gps_position_mode: ObservableValue::new(false),
            battery_volts: ObservableValue::new(0.0),
            battery_cells: ObservableValue::new(0),
            amps: ObservableValue::new(0.0),
            rssi: ObservableValue::new(0),
            vbat_warning_cell: ObservableValue::new(DEFAULT_VBAT_WARNING_CELL),
            vbat_min_cell: ObservableValue::new(DEFAULT_VBAT_MIN_CELL),
            vbat_max_cell: ObservableValue::new(DEFAULT_VBAT_MAX_CELL),
            gps_fix: ObservableValue::new(false),
            gps_num_sats: ObservableValue::new(0),
            latitude: ObservableValue::new(0.0),
            longitude: ObservableValue::new(0.0),
            gps_altitude: ObservableValue::new(0.0),
            speed: ObservableValue::new(0.0),
            distance_to_home: ObservableValue::new(0.0),
            direction_to_home: ObservableValue::new(0.0),
            roll: ObservableValue::new(0.0),
            pitch: ObservableValue::new(0.0),
            heading: ObservableValue::new(0.0),
            altitude: ObservableValue::new(0.0),
            vario: ObservableValue::new(0.0),
        }
    }

    /// Decode a frame into field writes
    ///
    /// Unknown commands and short payloads are ignored: each status frame
    /// is independently useful and a dropped one must not block the rest.
    pub fn apply_frame(&mut self, frame: &MspFrame) {
        match frame.command {
            MSP_STATUS => self.apply_status(&frame.payload),
            MSP_RAW_GPS => self.apply_raw_gps(&frame.payload),
            MSP_COMP_GPS => self.apply_comp_gps(&frame.payload),
            MSP_ATTITUDE => self.apply_attitude(&frame.payload),
            MSP_ALTITUDE => self.apply_altitude(&frame.payload),
            MSP_ANALOG => self.apply_analog(&frame.payload),
            MSP_MISC => self.apply_misc(&frame.payload),
            other => trace!("ignoring frame with command 0x{:02X}", other),
        }
    }

    fn apply_status(&mut self, payload: &[u8]) {
        if payload.len() < 11 {
            debug!("short MSP_STATUS payload: {} bytes", payload.len());
            return;
        }
        let mut buf = payload;
        let _cycle_time = buf.get_u16_le();
        let _i2c_errors = buf.get_u16_le();
        let _sensors = buf.get_u16_le();
        let mode = buf.get_u32_le();

        self.armed.set(mode & MODE_ARM != 0);
        self.gps_position_mode
            .set(mode & (MODE_GPS_HOME | MODE_GPS_HOLD) != 0);
    }

    fn apply_raw_gps(&mut self, payload: &[u8]) {
        if payload.len() < 16 {
            debug!("short MSP_RAW_GPS payload: {} bytes", payload.len());
            return;
        }
        let mut buf = payload;
        self.gps_fix.set(buf.get_u8() != 0);
        self.gps_num_sats.set(buf.get_u8() as u32);
        self.latitude.set(buf.get_i32_le() as f64 / 10_000_000.0);
        self.longitude.set(buf.get_i32_le() as f64 / 10_000_000.0);
        self.gps_altitude.set(buf.get_u16_le() as f64);
        self.speed.set(buf.get_u16_le() as f64 * 0.036); // cm/s -> km/h
    }

    fn apply_comp_gps(&mut self, payload: &[u8]) {
        if payload.len() < 4 {
            debug!("short MSP_COMP_GPS payload: {} bytes", payload.len());
            return;
        }
        let mut buf = payload;
        self.distance_to_home.set(buf.get_u16_le() as f64);
        self.direction_to_home.set(buf.get_u16_le() as f64);
    }

    fn apply_attitude(&mut self, payload: &[u8]) {
        if payload.len() < 6 {
            debug!("short MSP_ATTITUDE payload: {} bytes", payload.len());
            return;
        }
        let mut buf = payload;
        self.roll.set(buf.get_i16_le() as f64 / 10.0);
        self.pitch.set(buf.get_i16_le() as f64 / 10.0);
        self.heading.set(buf.get_i16_le() as f64);
    }

    fn apply_altitude(&mut self, payload: &[u8]) {
        if payload.len() < 6 {
            debug!("short MSP_ALTITUDE payload: {} bytes", payload.len());
            return;
        }
        let mut buf = payload;
        self.altitude.set(buf.get_i32_le() as f64 / 100.0); // cm -> m
        self.vario.set(buf.get_i16_le() as f64 / 100.0); // cm/s -> m/s
    }

    fn apply_analog(&mut self, payload: &[u8]) {
        if payload.len() < 7 {
            debug!("short MSP_ANALOG payload: {} bytes", payload.len());
            return;
        }
        let mut buf = payload;
        let volts = buf.get_u8() as f64 / 10.0;
        let _power_meter_sum = buf.get_u16_le();
        let rssi_raw = buf.get_u16_le();
        let amps = buf.get_i16_le() as f64 / 100.0;

        self.battery_volts.set(volts);
        self.rssi.set((rssi_raw as i32 * 100) / 1023);
        self.amps.set(amps);

        // Cell count is not reported directly; derive it from the pack
        // voltage and the configured full-cell voltage.
        let max_cell = *self.vbat_max_cell.get();
        if volts > 0.0 && max_cell > 0.0 {
            self.battery_cells.set((volts / max_cell).ceil() as u32);
        }
    }

    fn apply_misc(&mut self, payload: &[u8]) {
        if payload.len() < 22 {
            debug!("short MSP_MISC payload: {} bytes", payload.len());
            return;
        }
        // Voltage thresholds sit at the tail of the payload, in 0.1 V
        self.vbat_min_cell.set(payload[19] as f64 / 10.0);
        self.vbat_max_cell.set(payload[20] as f64 / 10.0);
        self.vbat_warning_cell.set(payload[21] as f64 / 10.0);
    }

    /// Per-cell voltage, or 0 when the cell count is unknown
    pub fn volts_per_cell(&self) -> f64 {
        let cells = *self.battery_cells.get();
        if cells == 0 {
            return 0.0;
        }
        self.battery_volts.get() / cells as f64
    }
}
