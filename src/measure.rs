//! Polling of live measurements.

use fugit::Duration;
use tracing::info;

use crate::{
    error::Result,
    mode::{ActiveMode, OverallMode},
    sync::SyncEngine,
    transport::Transport,
    value::TypedValue,
};

/// One poll of the instrument's meters.
///
/// Current, power and resistance are only read while the load is on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurements {
    pub load_on: bool,
    pub voltage: f64,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub resistance: Option<f64>,
    pub battery: Option<BatteryReadings>,
}

/// Discharge counters, read in Battery mode only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReadings {
    pub discharge_time: Duration<u32, 1, 1>,
    pub discharged_mah: f64,
    pub added_mah: f64,
}

fn in_battery_mode(mode: Option<ActiveMode>) -> bool {
    mode.is_some_and(|m| m.overall == OverallMode::Battery)
}

impl<T: Transport> SyncEngine<T> {
    /// Read the meters and the load state.
    ///
    /// Also notices the load being switched on or off at the instrument itself, which ends or
    /// starts a battery discharge segment just like a switch through [`set_output`](Self::set_output).
    pub fn refresh_measurements(&mut self) -> Result<Measurements> {
        let output = self.table.output_enable;
        let was_on = self.cache.get(output).and_then(TypedValue::as_bool);
        let load_on = self.read_register(output)?.as_bool().unwrap_or(false);
        if was_on.is_some_and(|was| was != load_on) {
            info!(load_on, "load switched at the instrument");
            self.output_changed(load_on)?;
        }

        let voltage = self.query_number("MEASURE:VOLTAGE")?;
        let (current, power, resistance) = if load_on {
            (
                Some(self.query_number("MEASURE:CURRENT")?),
                Some(self.query_number("MEASURE:POWER")?),
                Some(self.query_number("MEASURE:RESISTANCE")?),
            )
        } else {
            (None, None, None)
        };

        let battery = if in_battery_mode(self.active) {
            let secs = self.query_number("BATTERY:DISCHA:TIMER")?.max(0.0) as u32;
            Some(BatteryReadings {
                discharge_time: Duration::<u32, 1, 1>::secs(secs),
                discharged_mah: self.query_number("BATTERY:DISCHA:CAP")?,
                added_mah: self.query_number("BATTERY:ADDCAP")?,
            })
        } else {
            None
        };

        if load_on {
            if let Some(run) = self.discharge.as_mut() {
                run.initial_voltage.get_or_insert(voltage);
            }
        }

        Ok(Measurements {
            load_on,
            voltage,
            current,
            power,
            resistance,
            battery,
        })
    }
}
