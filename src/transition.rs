//! Mode Transition Controller: moving the instrument between modes.

use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    mode::{ActiveMode, ConstMode, ModeKey, OverallMode, SubMode},
    sync::SyncEngine,
    table::{EntryPolicy, OverallSpec},
    transport::Transport,
    value::{TypedValue, ValueKind},
};

impl<T: Transport> SyncEngine<T> {
    /// Put the instrument into the given mode and return the mode it reports afterwards.
    ///
    /// A constant or sub mode left out is taken from the instrument's current register, or
    /// from the overall mode's default if that register doesn't hold a valid choice. The load
    /// and the short circuit are switched off before the mode is changed.
    pub fn transition(
        &mut self,
        overall: OverallMode,
        constant: Option<ConstMode>,
        sub: Option<SubMode>,
    ) -> Result<ActiveMode> {
        self.ensure_connected()?;
        let requested = ModeKey::new(overall, constant, sub);
        let spec = *self
            .table
            .overall_spec(overall)
            .ok_or(Error::UnknownModeCombination(requested))?;

        let constant = self.choose_const(&spec, constant, requested)?;
        let sub = self.choose_sub(&spec, constant, sub, requested)?;
        let target = ModeKey::new(overall, constant, sub);
        self.table.validate(target)?;

        let descriptor = self.table.lookup(target)?;
        if descriptor.entry == EntryPolicy::ReadOnly {
            return Err(Error::ModeNotEnterable(overall));
        }

        info!(from = ?self.active, to = %target, "changing mode");
        self.set_output(false)?;
        self.set_short(false)?;

        let keyword_kind = ValueKind::EnumString(&[]);
        match descriptor.entry {
            EntryPolicy::Settable { path, fixed } => {
                let keyword = fixed.or(constant.map(ConstMode::scpi_name)).unwrap_or_default();
                self.write_register(path, keyword_kind, &TypedValue::from(keyword))?;
            }
            EntryPolicy::Triggered { command } => {
                self.send(command)?;
                if let (Some(register), Some(constant)) = (spec.const_register, constant) {
                    self.write_register(register, keyword_kind, &TypedValue::from(constant.scpi_name()))?;
                }
            }
            EntryPolicy::ReadOnly => return Err(Error::ModeNotEnterable(overall)),
        }

        if let (Some(constant), Some(sub)) = (constant, sub) {
            if let Some(register) = spec.sub_wire_path(constant) {
                self.write_register(&register, keyword_kind, &TypedValue::from(sub.scpi_name()))?;
            }
        }

        let reached = self.read_back_mode()?;
        if reached != target {
            warn!(requested = %target, reached = %reached, "instrument reports a different mode");
        }
        self.active = Some(reached);
        Ok(reached)
    }

    fn choose_const(
        &self,
        spec: &OverallSpec,
        requested: Option<ConstMode>,
        key: ModeKey,
    ) -> Result<Option<ConstMode>> {
        if spec.consts.is_empty() {
            return match requested {
                Some(_) => Err(Error::UnknownModeCombination(key)),
                None => Ok(None),
            };
        }
        if requested.is_some() {
            return Ok(requested);
        }
        let cached = spec
            .const_register
            .and_then(|register| self.cache.get(register))
            .and_then(|v| v.as_text().and_then(ConstMode::from_reply))
            .filter(|c| spec.consts.contains(c));
        match cached {
            Some(constant) => Ok(Some(constant)),
            None => {
                warn!(mode = %spec.overall, fallback = ?spec.fallback_const, "constant mode unknown, using default");
                spec.fallback_const
                    .map(Some)
                    .ok_or(Error::UnknownModeCombination(key))
            }
        }
    }

    fn choose_sub(
        &self,
        spec: &OverallSpec,
        constant: Option<ConstMode>,
        requested: Option<SubMode>,
        key: ModeKey,
    ) -> Result<Option<SubMode>> {
        if spec.subs.is_empty() {
            return match requested {
                Some(_) => Err(Error::UnknownModeCombination(key)),
                None => Ok(None),
            };
        }
        if requested.is_some() {
            return Ok(requested);
        }
        let cached = constant
            .and_then(|c| spec.sub_wire_path(c))
            .and_then(|path| self.cache.get(&path).and_then(|v| v.as_text().and_then(SubMode::from_reply)))
            .filter(|s| spec.subs.contains(s));
        match cached {
            Some(sub) => Ok(Some(sub)),
            None => {
                warn!(mode = %spec.overall, fallback = ?spec.fallback_sub, "sub mode unknown, using default");
                spec.fallback_sub
                    .map(Some)
                    .ok_or(Error::UnknownModeCombination(key))
            }
        }
    }

    /// Re-read the registers the active mode is derived from.
    fn read_back_mode(&mut self) -> Result<ActiveMode> {
        let mut registers: Vec<&'static str> = Vec::new();
        for rule in self.table.rules() {
            if !registers.contains(&rule.register) {
                registers.push(rule.register);
            }
        }
        for register in registers {
            self.read_register(register)?;
        }

        let overall = self.table.derive_overall(&self.cache);
        if let Some(spec) = self.table.overall_spec(overall) {
            if let Some(register) = spec.const_register {
                self.read_register(register)?;
            }
            let constant = self.table.derive_active_mode(&self.cache).constant;
            if let Some(register) = constant.and_then(|c| spec.sub_wire_path(c)) {
                self.read_register(&register)?;
            }
        }
        Ok(self.table.derive_active_mode(&self.cache))
    }
}
