//! A session with one identified instrument.
//!
//! [`Session::open`] identifies the instrument, picks its mode table from an
//! [`InstrumentRegistry`] and applies the [`SessionConfig`]. Everything else is delegated to
//! the [`SyncEngine`], which stays reachable through [`Session::engine_mut`].

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::{
    cache::Snapshot,
    config::SessionConfig,
    error::{Error, Result},
    measure::Measurements,
    mode::{ActiveMode, ModeKey},
    registry::{Identification, InstrumentRegistry},
    sync::{ClampedValue, CommitOutcome, ParameterAddress, SyncEngine},
    table::EntryPolicy,
    transport::Transport,
    value::TypedValue,
};

const REMOTE_LOCK: &str = "SYST:REMOTE:STATE";

/// What [`Session::restore`] changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreOutcome {
    pub written: Vec<String>,
    pub clamped: Vec<ClampedValue>,
    /// The mode the instrument was left in.
    pub mode: Option<ActiveMode>,
}

pub struct Session<T: Transport> {
    engine: SyncEngine<T>,
    identification: Identification,
    config: SessionConfig,
}

impl<T: Transport> Session<T> {
    /// Identify the instrument behind `transport` and open a session with it.
    pub fn open(mut transport: T, registry: &InstrumentRegistry, config: SessionConfig) -> Result<Self> {
        let reply = transport.request("*IDN?")?;
        let identification = Identification::parse(&reply)?;
        let table = registry.table_for(&identification)?;
        info!(
            device = %identification,
            serial = identification.serial.as_str(),
            firmware = identification.firmware.as_str(),
            "instrument identified"
        );
        Self::with_identification(SyncEngine::new(transport, table), identification, config)
    }

    /// Open a session on an engine whose instrument is already identified.
    pub fn with_identification(
        engine: SyncEngine<T>,
        identification: Identification,
        config: SessionConfig,
    ) -> Result<Self> {
        let mut session = Self {
            engine,
            identification,
            config,
        };
        if session.config.lock_front_panel {
            session.lock_front_panel()?;
        }
        if session.config.refresh_on_open {
            session.refresh()?;
        }
        Ok(session)
    }

    pub fn identification(&self) -> &Identification {
        &self.identification
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> &SyncEngine<T> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut SyncEngine<T> {
        &mut self.engine
    }

    pub fn into_engine(self) -> SyncEngine<T> {
        self.engine
    }

    fn lock_front_panel(&mut self) -> Result<()> {
        self.engine
            .commit([(REMOTE_LOCK, TypedValue::Bool(true))])
            .map(|_| ())
    }

    /// Re-read the instrument; writes back clamped values if so configured.
    pub fn refresh(&mut self) -> Result<ActiveMode> {
        let mode = self.engine.refresh()?;
        if self.config.flush_clamped_on_refresh {
            self.engine.flush_pending()?;
        }
        Ok(mode)
    }

    pub fn commit<A, I>(&mut self, changes: I) -> Result<CommitOutcome>
    where
        A: Into<ParameterAddress>,
        I: IntoIterator<Item = (A, TypedValue)>,
    {
        self.engine.commit(changes)
    }

    pub fn transition(&mut self, mode: ModeKey) -> Result<ActiveMode> {
        self.engine.transition(mode.overall, mode.constant, mode.sub)
    }

    pub fn active_mode(&self) -> Option<ActiveMode> {
        self.engine.active_mode()
    }

    pub fn current_value(&self, wire_path: &str) -> Option<&TypedValue> {
        self.engine.current_value(wire_path)
    }

    pub fn bounds(&self, address: impl Into<ParameterAddress>) -> Result<(f64, f64)> {
        self.engine.bounds(address)
    }

    pub fn set_load(&mut self, on: bool) -> Result<bool> {
        self.engine.set_output(on)
    }

    pub fn set_short(&mut self, on: bool) -> Result<bool> {
        self.engine.set_short(on)
    }

    pub fn refresh_measurements(&mut self) -> Result<Measurements> {
        self.engine.refresh_measurements()
    }

    pub fn battery_report(&self) -> Option<String> {
        self.engine.battery_log().report(&self.identification)
    }

    pub fn clear_battery_log(&mut self) -> Result<()> {
        self.engine.clear_battery_log()
    }

    /// Reconnect over a new transport, re-lock the panel and refresh.
    pub fn reconnect(&mut self, transport: T) -> Result<ActiveMode> {
        let mode = self.engine.reconnect(transport)?;
        if self.config.lock_front_panel {
            self.lock_front_panel()?;
        }
        if self.config.flush_clamped_on_refresh {
            self.engine.flush_pending()?;
        }
        Ok(mode)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.engine.cache().snapshot()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        self.engine.cache().to_json()
    }

    pub fn restore_json(&mut self, json: &str) -> Result<RestoreOutcome> {
        let snapshot: Snapshot = serde_json::from_str(json).map_err(|e| Error::InvalidValue {
            path: "snapshot".into(),
            value: e.to_string(),
        })?;
        self.restore(&snapshot)
    }

    /// Write a saved snapshot back to the instrument and return to the mode it was taken in.
    ///
    /// Values are committed one mode at a time, General registers first. A register shared by
    /// several modes is written in the mode matching the snapshot's own mode registers. Modes
    /// whose values already match are not entered. The load and short circuit states are not restored.
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<RestoreOutcome> {
        if self.engine.active_mode().is_none() {
            self.engine.refresh()?;
        }
        let table = self.engine.table().clone();

        let mut groups: BTreeMap<Option<ModeKey>, Vec<(ParameterAddress, TypedValue)>> =
            BTreeMap::new();
        for (path, value) in snapshot {
            if path == table.output_enable || path == table.short_enable {
                continue;
            }
            let Some((descriptor, spec)) = table.find(path) else {
                warn!(path = path.as_str(), "skipping unknown register in snapshot");
                continue;
            };
            if !spec.is_writable() {
                continue;
            }
            let unchanged = spec.kind.coerce(value).is_some_and(|v| {
                self.engine
                    .current_value(path)
                    .is_some_and(|cached| spec.kind.same_on_wire(cached, &v))
            });
            if unchanged {
                continue;
            }
            // Registers shared by several modes go with the mode the snapshot was set up for.
            let candidates: Vec<ModeKey> = table.sharing(path).iter().flatten().copied().collect();
            let key = table.closest_mode(&candidates, snapshot).or(descriptor.key);
            let address = ParameterAddress {
                mode_key: key,
                command_path: path.clone(),
            };
            groups
                .entry(key)
                .or_default()
                .push((address, value.clone()));
        }

        let mut outcome = RestoreOutcome::default();
        for (key, changes) in groups {
            if let Some(key) = key {
                if table.lookup(key)?.entry == EntryPolicy::ReadOnly {
                    warn!(mode = %key, "skipping values of a mode that can't be entered");
                    continue;
                }
            }
            let commit = self.engine.commit(changes)?;
            outcome.written.extend(commit.written);
            outcome.clamped.extend(commit.clamped);
        }

        let saved = table.derive_active_mode(snapshot);
        if self.engine.active_mode() != Some(saved) {
            match self.transition(saved) {
                Ok(_) => {}
                Err(Error::ModeNotEnterable(mode)) => {
                    warn!(mode = %mode, "saved mode can't be entered, staying put");
                }
                Err(e) => return Err(e),
            }
        }
        outcome.mode = self.engine.active_mode();
        info!(
            written = outcome.written.len(),
            clamped = outcome.clamped.len(),
            "snapshot restored"
        );
        Ok(outcome)
    }
}
