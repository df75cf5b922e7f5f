//! The Sync Engine keeps the [`ParameterStateCache`] and the instrument consistent.
//!
//! [`SyncEngine::refresh`] reads every register of the mode table into a fresh cache and
//! derives the active mode. [`SyncEngine::commit`] clamps requested values into their bounds,
//! moves the instrument into the mode the values belong to and writes only what differs from
//! the cache. The cache is updated after each acknowledged write, never ahead of it.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::{
    battery_log::{DischargeRun, SessionLog},
    bounds::{clamp, resolve},
    cache::{Overlay, ParameterStateCache, Snapshot},
    error::{Error, Result, TransportError},
    mode::{ActiveMode, ModeKey},
    table::{BoundKind, ModeDescriptor, ModeTable, ParameterSpec, WriteOrder},
    transport::Transport,
    value::{TypedValue, ValueKind},
};

/// Identifies one register from the caller's point of view.
///
/// `command_path` is the full path as sent on the wire, e.g. `CURRENT:LEVEL:IMMEDIATE`. Without
/// a `mode_key` the register is looked up in the active mode, then among the General
/// registers, then in the first mode declaring it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParameterAddress {
    pub mode_key: Option<ModeKey>,
    pub command_path: String,
}

impl ParameterAddress {
    pub fn new(mode_key: ModeKey, command_path: impl Into<String>) -> Self {
        Self {
            mode_key: Some(mode_key),
            command_path: command_path.into(),
        }
    }

    pub fn path(command_path: impl Into<String>) -> Self {
        Self {
            mode_key: None,
            command_path: command_path.into(),
        }
    }
}

impl From<&str> for ParameterAddress {
    fn from(command_path: &str) -> Self {
        Self::path(command_path)
    }
}

impl From<String> for ParameterAddress {
    fn from(command_path: String) -> Self {
        Self::path(command_path)
    }
}

/// A requested value that was constrained into its bounds before being written.
#[derive(Debug, Clone, PartialEq)]
pub struct ClampedValue {
    pub path: String,
    pub requested: TypedValue,
    pub committed: TypedValue,
}

/// What a successful commit did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitOutcome {
    /// Command paths written, in wire order. Includes dependent flags.
    pub written: Vec<String>,
    pub clamped: Vec<ClampedValue>,
    /// The mode reached, if the commit had to change modes first.
    pub transitioned: Option<ActiveMode>,
}

/// A requested change after address resolution and coercion.
struct Change {
    wire: String,
    explicit: Option<ModeKey>,
    descriptor: &'static ModeDescriptor,
    spec: &'static ParameterSpec,
    value: TypedValue,
}

/// One planned write.
struct Step {
    wire: String,
    command: String,
    value: TypedValue,
}

impl Step {
    fn new(wire: &str, kind: ValueKind, value: &TypedValue) -> Self {
        Self {
            wire: wire.to_owned(),
            command: format!("{} {}", wire, kind.format(value)),
            value: value.clone(),
        }
    }
}

/// Owns one instrument session: its transport, its mode table and its register cache.
pub struct SyncEngine<T: Transport> {
    pub(crate) transport: T,
    pub(crate) table: ModeTable,
    pub(crate) cache: ParameterStateCache,
    pub(crate) active: Option<ActiveMode>,
    pending: Snapshot,
    poisoned: bool,
    pub(crate) battery_log: SessionLog,
    pub(crate) discharge: Option<DischargeRun>,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(transport: T, table: ModeTable) -> Self {
        Self {
            transport,
            table,
            cache: ParameterStateCache::new(),
            active: None,
            pending: Snapshot::new(),
            poisoned: false,
            battery_log: SessionLog::default(),
            discharge: None,
        }
    }

    pub fn table(&self) -> &ModeTable {
        &self.table
    }

    pub fn cache(&self) -> &ParameterStateCache {
        &self.cache
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The mode derived by the last refresh or transition. `None` before the first refresh.
    pub fn active_mode(&self) -> Option<ActiveMode> {
        self.active
    }

    /// `false` once a transport failure poisoned the session.
    pub fn is_connected(&self) -> bool {
        !self.poisoned
    }

    pub fn current_value(&self, wire_path: &str) -> Option<&TypedValue> {
        self.cache.get(wire_path)
    }

    /// Values the last refresh found outside their bounds, already clamped.
    pub fn pending_writebacks(&self) -> &Snapshot {
        &self.pending
    }

    /// The effective range of a parameter given the current cache.
    pub fn bounds(&self, address: impl Into<ParameterAddress>) -> Result<(f64, f64)> {
        let address = address.into();
        let (descriptor, spec) = self.resolve_address(&address, self.active)?;
        Ok(resolve(spec, descriptor, &self.table, &self.cache))
    }

    /// Re-read every register from the instrument into an empty cache.
    ///
    /// Registers declared by several modes are only queried once. Values found outside the
    /// bounds of the now active mode are recorded in [`pending_writebacks`](Self::pending_writebacks).
    pub fn refresh(&mut self) -> Result<ActiveMode> {
        self.ensure_connected()?;
        self.cache.clear();
        self.pending.clear();

        for descriptor in self.table.all_descriptors() {
            for spec in descriptor.params {
                let wire_path = descriptor.wire_path(spec.path);
                if self.cache.contains(&wire_path) {
                    continue;
                }
                let value = self.query_value(&wire_path, spec.kind)?;
                self.cache.insert(wire_path, value);
            }
        }

        let active = self.table.derive_active_mode(&self.cache);
        self.active = Some(active);
        self.collect_out_of_range(active)?;

        info!(
            mode = %active,
            registers = self.cache.len(),
            pending = self.pending.len(),
            "refresh complete"
        );
        Ok(active)
    }

    /// Write a set of parameter changes to the instrument.
    ///
    /// Values are coerced to their register's kind and clamped into bounds resolved against
    /// the cache plus the changes accepted so far, in table order. If the changes belong to a
    /// mode other than the active one the instrument is moved there first; changes spanning
    /// two such modes are rejected. Only values differing from the cache are written.
    ///
    /// A transport failure part way through yields [`Error::PartialCommitFailure`]; the cache
    /// then reflects exactly the writes that went through.
    pub fn commit<A, I>(&mut self, changes: I) -> Result<CommitOutcome>
    where
        A: Into<ParameterAddress>,
        I: IntoIterator<Item = (A, TypedValue)>,
    {
        self.ensure_connected()?;

        // Later entries for the same path win.
        let mut requested: BTreeMap<String, (Option<ModeKey>, TypedValue)> = BTreeMap::new();
        for (address, value) in changes {
            let address = address.into();
            requested.insert(address.command_path, (address.mode_key, value));
        }

        let mut changes = Vec::with_capacity(requested.len());
        for (wire, (explicit, value)) in requested {
            let address = ParameterAddress {
                mode_key: explicit,
                command_path: wire,
            };
            let (descriptor, spec) = self.resolve_address(&address, self.active)?;
            if !spec.is_writable() {
                return Err(Error::ReadOnlyParameter(address.command_path));
            }
            let coerced = spec.kind.coerce(&value).ok_or_else(|| Error::InvalidValue {
                path: address.command_path.clone(),
                value: value.to_string(),
            })?;
            changes.push(Change {
                wire: address.command_path,
                explicit,
                descriptor,
                spec,
                value: coerced,
            });
        }
        changes.sort_by_key(|c| self.table.declaration_order(&c.wire).unwrap_or(usize::MAX));

        let target = self.transition_target(&changes)?;
        if let Some(target) = target {
            // Bounds and flags follow the mode the writes will land in.
            for change in changes.iter_mut().filter(|c| c.explicit.is_none()) {
                let address = ParameterAddress::path(change.wire.clone());
                let (descriptor, spec) = self.resolve_address(&address, Some(target))?;
                change.descriptor = descriptor;
                change.spec = spec;
            }
        }

        let mut clamped = Vec::new();
        let mut accepted = Snapshot::new();
        for change in &mut changes {
            if let Some(committed) = self.clamp_change(change, &accepted) {
                warn!(
                    path = change.wire.as_str(),
                    requested = %change.value,
                    committed = %committed,
                    "value clamped to its bounds"
                );
                clamped.push(ClampedValue {
                    path: change.wire.clone(),
                    requested: change.value.clone(),
                    committed: committed.clone(),
                });
                change.value = committed;
            }
            accepted.insert(change.wire.clone(), change.value.clone());
        }

        let transitioned = match target {
            Some(target) => Some(self.transition(target.overall, target.constant, target.sub)?),
            None => None,
        };

        let plan = self.plan_writes(&changes);
        let mut written = Vec::with_capacity(plan.len());
        for (i, step) in plan.iter().enumerate() {
            if let Err(source) = self.transmit(&step.command) {
                return Err(partial_failure(written, &plan[i..], source));
            }
            let previous = self.cache.insert(step.wire.clone(), step.value.clone());
            written.push(step.wire.clone());

            if step.wire == self.table.output_enable {
                let was_on = previous.and_then(|v| v.as_bool()).unwrap_or(false);
                let on = step.value.as_bool().unwrap_or(false);
                if was_on != on {
                    match self.output_changed(on) {
                        Ok(()) => {}
                        Err(Error::Transport(source)) => {
                            return Err(partial_failure(written, &plan[i + 1..], source));
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
        }

        info!(
            written = written.len(),
            clamped = clamped.len(),
            "commit complete"
        );
        Ok(CommitOutcome {
            written,
            clamped,
            transitioned,
        })
    }

    /// Commit the values clamped by the last refresh.
    pub fn flush_pending(&mut self) -> Result<CommitOutcome> {
        if self.pending.is_empty() {
            return Ok(CommitOutcome::default());
        }
        let pending = std::mem::take(&mut self.pending);
        let result = self.commit(pending.clone());
        if result.is_err() {
            self.pending = pending;
        }
        result
    }

    /// Swap in a new transport after a failure and refresh from it.
    pub fn reconnect(&mut self, transport: T) -> Result<ActiveMode> {
        info!("reconnecting");
        self.transport = transport;
        self.poisoned = false;
        self.discharge = None;
        self.refresh()
    }

    /// Turn the load input on or off. Returns whether anything was written.
    pub fn set_output(&mut self, on: bool) -> Result<bool> {
        let path = self.table.output_enable;
        if !self.write_if_changed(path, on)? {
            return Ok(false);
        }
        self.output_changed(on)?;
        Ok(true)
    }

    /// Turn the short circuit on or off. Returns whether anything was written.
    pub fn set_short(&mut self, on: bool) -> Result<bool> {
        let path = self.table.short_enable;
        self.write_if_changed(path, on)
    }

    fn write_if_changed(&mut self, path: &str, on: bool) -> Result<bool> {
        self.ensure_connected()?;
        if self.cache.get(path).and_then(TypedValue::as_bool) == Some(on) {
            return Ok(false);
        }
        self.write_register(path, ValueKind::Bool, &TypedValue::Bool(on))?;
        Ok(true)
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.poisoned {
            Err(Error::NotConnected)
        } else {
            Ok(())
        }
    }

    fn poison(&mut self, err: TransportError) -> TransportError {
        warn!(error = %err, "transport failed; session needs a reconnect");
        self.poisoned = true;
        err
    }

    /// Send one command, poisoning the session on failure.
    pub(crate) fn transmit(&mut self, command: &str) -> core::result::Result<(), TransportError> {
        if self.poisoned {
            return Err(TransportError::ConnectionLost(embedded_io::ErrorKind::NotConnected));
        }
        debug!(command, "SCPI write");
        self.transport.send(command).map_err(|e| self.poison(e))
    }

    pub(crate) fn send(&mut self, command: &str) -> Result<()> {
        self.ensure_connected()?;
        Ok(self.transmit(command)?)
    }

    pub(crate) fn request(&mut self, query: &str) -> Result<String> {
        self.ensure_connected()?;
        debug!(query, "SCPI query");
        match self.transport.request(query) {
            Ok(reply) => {
                debug!(query, reply = reply.as_str(), "SCPI reply");
                Ok(reply)
            }
            Err(e) => Err(Error::Transport(self.poison(e))),
        }
    }

    pub(crate) fn query_value(&mut self, wire_path: &str, kind: ValueKind) -> Result<TypedValue> {
        let query = format!("{}?", wire_path);
        let reply = self.request(&query)?;
        kind.parse(&reply)
            .ok_or(Error::InvalidReply { command: query, reply })
    }

    /// Query a numeric value that isn't mirrored in the cache, such as a measurement.
    pub(crate) fn query_number(&mut self, path: &str) -> Result<f64> {
        let query = format!("{}?", path);
        let reply = self.request(&query)?;
        reply
            .trim()
            .parse()
            .map_err(|_| Error::InvalidReply { command: query, reply })
    }

    /// Query a register the table knows about and store it in the cache.
    pub(crate) fn read_register(&mut self, wire_path: &str) -> Result<TypedValue> {
        let kind = self
            .table
            .find(wire_path)
            .map_or(ValueKind::EnumString(&[]), |(_, spec)| spec.kind);
        let value = self.query_value(wire_path, kind)?;
        self.cache.insert(wire_path, value.clone());
        Ok(value)
    }

    /// Write a register unconditionally and mirror it in the cache.
    pub(crate) fn write_register(
        &mut self,
        wire_path: &str,
        kind: ValueKind,
        value: &TypedValue,
    ) -> Result<()> {
        self.send(&format!("{} {}", wire_path, kind.format(value)))?;
        self.cache.insert(wire_path, value.clone());
        Ok(())
    }

    fn resolve_address(
        &self,
        address: &ParameterAddress,
        effective: Option<ModeKey>,
    ) -> Result<(&'static ModeDescriptor, &'static ParameterSpec)> {
        let path = address.command_path.as_str();
        let unknown = || Error::UnknownParameter(path.to_owned());
        let general = self
            .table
            .general()
            .and_then(|d| d.param_by_wire(path).map(|s| (d, s)));

        match address.mode_key {
            Some(key) => {
                let descriptor = self.table.lookup(key)?;
                descriptor
                    .param_by_wire(path)
                    .map(|s| (descriptor, s))
                    .or(general)
                    .ok_or_else(unknown)
            }
            None => effective
                .and_then(|key| self.table.lookup(key).ok())
                .and_then(|d| d.param_by_wire(path).map(|s| (d, s)))
                .or(general)
                .or_else(|| self.table.find(path))
                .ok_or_else(unknown),
        }
    }

    /// The mode all changes not reachable from the active mode agree on. Among several, the
    /// one matching the cached constant and sub mode registers.
    fn transition_target(&self, changes: &[Change]) -> Result<Option<ModeKey>> {
        let candidates: Vec<Vec<ModeKey>> = changes
            .iter()
            .filter(|c| match (c.descriptor.key, self.active) {
                (None, _) => false,
                (Some(key), Some(active)) => {
                    key != active && !self.table.is_available_in(&c.wire, active)
                }
                (Some(_), None) => true,
            })
            .map(|c| match c.explicit {
                Some(key) => vec![key],
                None => self.table.sharing(&c.wire).iter().flatten().copied().collect(),
            })
            .collect();

        let Some(first) = candidates.first() else {
            return Ok(None);
        };
        let common: Vec<ModeKey> = first
            .iter()
            .copied()
            .filter(|key| candidates.iter().all(|keys| keys.contains(key)))
            .collect();
        // Stay in the battery or sub mode the instrument is already set up for.
        self.table
            .closest_mode(&common, &self.cache)
            .map(Some)
            .ok_or(Error::MixedModeCommit)
    }

    /// The clamped value of a change, if clamping changes what would be written.
    fn clamp_change(&self, change: &Change, accepted: &Snapshot) -> Option<TypedValue> {
        if matches!(change.spec.bounds, BoundKind::None) || !change.spec.kind.is_numeric() {
            return None;
        }
        let requested = change.value.as_f64()?;
        let overlay = Overlay::new(&self.cache, accepted);
        let bounds = resolve(change.spec, change.descriptor, &self.table, &overlay);
        let committed = change
            .spec
            .kind
            .coerce(&TypedValue::Float(clamp(requested, bounds)))?;
        (!change.spec.kind.same_on_wire(&committed, &change.value)).then_some(committed)
    }

    /// Second refresh pass: record cached values outside the active mode's bounds.
    fn collect_out_of_range(&mut self, active: ActiveMode) -> Result<()> {
        let descriptor = self.table.lookup(active)?;
        for spec in descriptor.params {
            let wire = descriptor.wire_path(spec.path);
            let Some(value) = self.cache.get(&wire).cloned() else {
                continue;
            };
            let change = Change {
                wire,
                explicit: None,
                descriptor,
                spec,
                value,
            };
            if let Some(committed) = self.clamp_change(&change, &Snapshot::new()) {
                warn!(
                    path = change.wire.as_str(),
                    reported = %change.value,
                    clamped = %committed,
                    "instrument value outside its bounds"
                );
                self.pending.insert(change.wire, committed);
            }
        }
        Ok(())
    }

    /// Order the diff-only writes of a commit, including dependent flags.
    fn plan_writes(&self, changes: &[Change]) -> Vec<Step> {
        let mut planned = Snapshot::new();
        let mut plan = Vec::new();
        let push = |step: Step, plan: &mut Vec<Step>, planned: &mut Snapshot| {
            planned.insert(step.wire.clone(), step.value.clone());
            plan.push(step);
        };

        for change in changes {
            let kind = change.spec.kind;
            if self.is_current(&planned, &change.wire, kind, &change.value) {
                continue;
            }
            let main = Step::new(&change.wire, kind, &change.value);

            let flag = change.spec.flag.and_then(|flag| {
                let wire = change.descriptor.wire_path(flag.path);
                let enable = change.value.is_nonzero();
                let value = TypedValue::Bool(enable);
                if self.is_current(&planned, &wire, ValueKind::Bool, &value) {
                    return None;
                }
                let order = if enable { flag.enable } else { flag.disable };
                Some((Step::new(&wire, ValueKind::Bool, &value), order))
            });

            match flag {
                Some((flag, WriteOrder::FlagFirst)) => {
                    push(flag, &mut plan, &mut planned);
                    push(main, &mut plan, &mut planned);
                }
                Some((flag, WriteOrder::ValueFirst)) => {
                    push(main, &mut plan, &mut planned);
                    push(flag, &mut plan, &mut planned);
                }
                None => push(main, &mut plan, &mut planned),
            }
        }
        plan
    }

    fn is_current(&self, planned: &Snapshot, wire: &str, kind: ValueKind, value: &TypedValue) -> bool {
        planned
            .get(wire)
            .or_else(|| self.cache.get(wire))
            .is_some_and(|old| kind.same_on_wire(old, value))
    }
}

fn partial_failure(written: Vec<String>, rest: &[Step], source: TransportError) -> Error {
    Error::PartialCommitFailure {
        written,
        failed: rest.iter().map(|s| s.wire.clone()).collect(),
        source,
    }
}
