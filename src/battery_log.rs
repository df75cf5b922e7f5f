//! Battery discharge log.
//!
//! Every time the load is switched off in Battery mode, the finished discharge run becomes a
//! [`Segment`]. The instrument's added-capacity register is advanced by the discharged
//! capacity so its own counter keeps accumulating across runs.

use chrono::{DateTime, Local};
use fugit::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    error::Result,
    mode::{ConstMode, OverallMode},
    registry::Identification,
    sync::SyncEngine,
    transport::Transport,
    value::TypedValue,
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A discharge that is still running.
#[derive(Debug, Clone, PartialEq)]
pub struct DischargeRun {
    pub started: DateTime<Local>,
    /// Terminal voltage at the first measurement after the load was switched on
    pub initial_voltage: Option<f64>,
}

/// One completed discharge run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// e.g. `CC 1.500A`
    pub mode: String,
    /// e.g. `Vmin 3.000V or Time 1:00:00`
    pub stop_condition: String,
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
    pub capacity_mah: f64,
    pub initial_voltage: Option<f64>,
}

impl Segment {
    pub fn run_time(&self) -> Duration<u32, 1, 1> {
        seconds_between(self.start, self.end)
    }
}

/// All segments recorded since the log was last cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    segments: Vec<Segment>,
}

impl SessionLog {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_capacity_mah(&self) -> f64 {
        self.segments.iter().map(|s| s.capacity_mah).sum()
    }

    /// Plain text report of the test. `None` while nothing has been recorded.
    pub fn report(&self, device: &Identification) -> Option<String> {
        let first = self.segments.first()?;
        let last = self.segments.last()?;
        let several = self.segments.len() > 1;

        let mut lines = vec![
            format!("Test device: {} {}", device.manufacturer, device.model),
            format!("S/N: {}", device.serial),
            format!("Firmware: {}", device.firmware),
        ];
        if several {
            lines.push("** Overall test **".to_owned());
        }
        lines.push(format!("Start time: {}", first.start.format(TIME_FORMAT)));
        lines.push(format!("End time: {}", last.end.format(TIME_FORMAT)));
        lines.push(format!(
            "Elapsed time: {}",
            format_hms(seconds_between(first.start, last.end))
        ));

        if several {
            let test_time = self
                .segments
                .iter()
                .fold(Duration::<u32, 1, 1>::secs(0), |acc, s| acc + s.run_time());
            lines.push(format!("Test time: {}", format_hms(test_time)));
        } else {
            lines.push(format!("Test mode: {}", first.mode));
            lines.push(format!("Stop condition: {}", first.stop_condition));
            lines.push(format!("Initial voltage: {}", format_voltage(first.initial_voltage)));
        }
        lines.push(format!("Capacity: {:.3}Ah", self.total_capacity_mah() / 1000.0));

        if several {
            for (i, segment) in self.segments.iter().enumerate() {
                lines.push(format!("** Test segment #{} **", i + 1));
                lines.push(format!("Start time: {}", segment.start.format(TIME_FORMAT)));
                lines.push(format!("End time: {}", segment.end.format(TIME_FORMAT)));
                lines.push(format!("Test time: {}", format_hms(segment.run_time())));
                lines.push(format!("Test mode: {}", segment.mode));
                lines.push(format!("Stop condition: {}", segment.stop_condition));
                lines.push(format!(
                    "Initial voltage: {}",
                    format_voltage(segment.initial_voltage)
                ));
                lines.push(format!("Capacity: {:.3}Ah", segment.capacity_mah / 1000.0));
            }
        }

        Some(lines.join("\n"))
    }
}

fn seconds_between(start: DateTime<Local>, end: DateTime<Local>) -> Duration<u32, 1, 1> {
    let secs = (end - start).num_seconds().clamp(0, u32::MAX as i64) as u32;
    Duration::<u32, 1, 1>::secs(secs)
}

/// `h:mm:ss`, hours unbounded.
pub fn format_hms(duration: Duration<u32, 1, 1>) -> String {
    let secs = duration.to_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn format_voltage(voltage: Option<f64>) -> String {
    match voltage {
        Some(v) => format!("{:.3}V", v),
        None => "Not measured".to_owned(),
    }
}

impl<T: Transport> SyncEngine<T> {
    /// Track discharge runs as the load input changes state.
    pub(crate) fn output_changed(&mut self, on: bool) -> Result<()> {
        let battery = self.active.filter(|m| m.overall == OverallMode::Battery);
        let Some(mode) = battery else {
            self.discharge = None;
            return Ok(());
        };

        if on {
            self.discharge = Some(DischargeRun {
                started: Local::now(),
                initial_voltage: None,
            });
            info!("battery discharge started");
            return Ok(());
        }

        let Some(run) = self.discharge.take() else {
            return Ok(());
        };
        let discharged = self.query_number("BATTERY:DISCHA:CAP")?;
        let added = self.query_number("BATTERY:ADDCAP")?;
        self.send(&format!("BATTERY:ADDCAP {}", discharged + added))?;

        let segment = Segment {
            mode: self.battery_mode_text(mode.constant),
            stop_condition: self.stop_condition_text(),
            start: run.started,
            end: Local::now(),
            capacity_mah: discharged,
            initial_voltage: run.initial_voltage,
        };
        info!(
            capacity_mah = segment.capacity_mah,
            run_time = %format_hms(segment.run_time()),
            "battery discharge finished"
        );
        self.battery_log.push(segment);
        Ok(())
    }

    pub fn battery_log(&self) -> &SessionLog {
        &self.battery_log
    }

    /// Forget all recorded segments and reset the instrument's added capacity.
    pub fn clear_battery_log(&mut self) -> Result<()> {
        self.send("BATTERY:ADDCAP 0")?;
        self.battery_log.clear();
        Ok(())
    }

    fn cached_number(&self, path: &str) -> f64 {
        self.cache.get(path).and_then(TypedValue::as_f64).unwrap_or(0.0)
    }

    fn cached_flag(&self, path: &str) -> bool {
        self.cache.get(path).and_then(TypedValue::as_bool).unwrap_or(false)
    }

    fn battery_mode_text(&self, constant: Option<ConstMode>) -> String {
        let level = self.cached_number("BATTERY:LEVEL");
        match constant {
            Some(ConstMode::Current) => format!("CC {:.3}A", level),
            Some(ConstMode::Power) => format!("CP {:.3}W", level),
            Some(ConstMode::Resistance) => format!("CR {:.3}Ω", level),
            Some(ConstMode::Voltage) | None => "Unknown".to_owned(),
        }
    }

    /// Only the stop conditions that are switched on.
    fn stop_condition_text(&self) -> String {
        let mut conditions = Vec::new();
        if self.cached_flag("BATTERY:VOLTAGE:STATE") {
            conditions.push(format!("Vmin {:.3}V", self.cached_number("BATTERY:VOLTAGE")));
        }
        if self.cached_flag("BATTERY:CAP:STATE") {
            conditions.push(format!("Cap {:.3}Ah", self.cached_number("BATTERY:CAP") / 1000.0));
        }
        if self.cached_flag("BATTERY:TIMER:STATE") {
            let secs = self.cached_number("BATTERY:TIMER").max(0.0) as u32;
            conditions.push(format!("Time {}", format_hms(Duration::<u32, 1, 1>::secs(secs))));
        }
        if conditions.is_empty() {
            "None".to_owned()
        } else {
            conditions.join(" or ")
        }
    }
}
