//! The declarative mode/parameter table.
//!
//! A [`ModeTable`] lists, for every mode combination an instrument supports, the registers
//! that are meaningful in that mode and how they are represented and bounded. The table is
//! pure data; the [`SyncEngine`](crate::sync::SyncEngine) interprets it.

use std::collections::BTreeMap;

use crate::{
    cache::ValueSource,
    error::{Error, Result},
    mode::{ConstMode, ModeKey, OverallMode, SubMode},
    value::ValueKind,
};

/// One side of a numeric range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Limit {
    Literal(f64),
    /// The current value of another parameter in the same mode, e.g. an OCP start bounded by
    /// the end current.
    Paired(&'static str),
    /// The selected current range (`IRANGE`) of the same mode.
    CurrentRange,
    /// The selected voltage range (`VRANGE`) of the same mode.
    VoltageRange,
    /// The power rating of the instrument model.
    PowerRating,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundKind {
    None,
    Range { lo: Limit, hi: Limit },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    /// Status registers, never written.
    ReadOnly,
    /// Registers that select a mode. Only written by a mode transition.
    ModeSelect,
}

/// Which of a parameter and its enable flag goes on the wire first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrder {
    FlagFirst,
    ValueFirst,
}

/// A boolean register kept in lockstep with a parameter being non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentFlag {
    /// Command path of the flag, relative to the same prefix as the parameter.
    pub path: &'static str,
    /// Order used when the parameter becomes non-zero.
    pub enable: WriteOrder,
    /// Order used when the parameter becomes zero.
    pub disable: WriteOrder,
}

impl DependentFlag {
    pub const fn new(path: &'static str) -> Self {
        Self {
            path,
            enable: WriteOrder::FlagFirst,
            disable: WriteOrder::ValueFirst,
        }
    }
}

/// Immutable description of one register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSpec {
    pub path: &'static str,
    pub kind: ValueKind,
    pub bounds: BoundKind,
    pub access: Access,
    pub flag: Option<DependentFlag>,
}

impl ParameterSpec {
    pub const fn new(path: &'static str, kind: ValueKind) -> Self {
        Self {
            path,
            kind,
            bounds: BoundKind::None,
            access: Access::ReadWrite,
            flag: None,
        }
    }

    pub const fn bounded(mut self, lo: Limit, hi: Limit) -> Self {
        self.bounds = BoundKind::Range { lo, hi };
        self
    }

    pub const fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    pub const fn mode_select(mut self) -> Self {
        self.access = Access::ModeSelect;
        self
    }

    pub const fn with_flag(mut self, flag: DependentFlag) -> Self {
        self.flag = Some(flag);
        self
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }
}

/// How an overall mode is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPolicy {
    /// Write the constant mode keyword (or `fixed`, if given) to `path`.
    Settable {
        path: &'static str,
        fixed: Option<&'static str>,
    },
    /// Send a bare command. There is no register choosing this mode.
    Triggered { command: &'static str },
    /// Can only be observed, never entered remotely.
    ReadOnly,
}

/// The registers valid in one mode combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeDescriptor {
    /// `None` for the General registers that exist in every mode.
    pub key: Option<ModeKey>,
    /// Prepended to every parameter path; empty for General.
    pub prefix: &'static str,
    pub entry: EntryPolicy,
    pub params: &'static [ParameterSpec],
}

impl ModeDescriptor {
    /// The full command path of `path` in this mode.
    pub fn wire_path(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_owned()
        } else {
            format!("{}:{}", self.prefix, path)
        }
    }

    pub fn param(&self, path: &str) -> Option<&'static ParameterSpec> {
        self.params.iter().find(|spec| spec.path == path)
    }

    /// Find the parameter addressed by a full command path.
    pub fn param_by_wire(&self, wire_path: &str) -> Option<&'static ParameterSpec> {
        self.params
            .iter()
            .find(|spec| self.wire_path(spec.path) == wire_path)
    }

    pub fn is_dynamic(&self) -> bool {
        self.key.is_some_and(|key| key.overall == OverallMode::Dynamic)
    }
}

/// Per overall mode: which constant and sub modes it has and where they are read back from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverallSpec {
    pub overall: OverallMode,
    pub consts: &'static [ConstMode],
    /// Register reporting the constant mode.
    pub const_register: Option<&'static str>,
    /// Used when the constant mode can't be recovered.
    pub fallback_const: Option<ConstMode>,
    pub subs: &'static [SubMode],
    /// Path of the sub-mode register below the constant mode prefix, e.g. `TRANSIENT:MODE`.
    pub sub_register: Option<&'static str>,
    pub fallback_sub: Option<SubMode>,
}

impl OverallSpec {
    pub fn sub_wire_path(&self, constant: ConstMode) -> Option<String> {
        self.sub_register
            .map(|path| format!("{}:{}", constant.scpi_name(), path))
    }
}

/// "If `register` reads `keyword`, the instrument is in `overall`."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeRule {
    pub register: &'static str,
    pub keyword: &'static str,
    pub overall: OverallMode,
}

/// The complete mode/parameter table of one instrument family.
#[derive(Debug, Clone)]
pub struct ModeTable {
    pub name: &'static str,
    descriptors: &'static [ModeDescriptor],
    overall: &'static [OverallSpec],
    /// Evaluated in order; the first match wins.
    rules: &'static [ModeRule],
    default_overall: OverallMode,
    pub output_enable: &'static str,
    pub short_enable: &'static str,
    pub current_range: &'static str,
    pub voltage_range: &'static str,
    /// Inserted between the mode prefix and range registers in Dynamic modes.
    pub transient_infix: &'static str,
    /// Upper bound of [`Limit::PowerRating`] parameters.
    pub power_rating: f64,
    sharing: BTreeMap<String, Vec<Option<ModeKey>>>,
    order: BTreeMap<String, usize>,
}

impl ModeTable {
    pub fn new(
        name: &'static str,
        descriptors: &'static [ModeDescriptor],
        overall: &'static [OverallSpec],
        rules: &'static [ModeRule],
        default_overall: OverallMode,
        power_rating: f64,
    ) -> Self {
        let mut sharing: BTreeMap<String, Vec<Option<ModeKey>>> = BTreeMap::new();
        let mut order = BTreeMap::new();
        for descriptor in descriptors {
            for spec in descriptor.params {
                let wire_path = descriptor.wire_path(spec.path);
                let next = order.len();
                order.entry(wire_path.clone()).or_insert(next);
                sharing.entry(wire_path).or_default().push(descriptor.key);
            }
        }
        Self {
            name,
            descriptors,
            overall,
            rules,
            default_overall,
            output_enable: "INPUT:STATE",
            short_enable: "SHORT:STATE",
            current_range: "IRANGE",
            voltage_range: "VRANGE",
            transient_infix: "TRANSIENT",
            power_rating,
            sharing,
            order,
        }
    }

    /// The descriptor of one mode combination.
    pub fn lookup(&self, key: ModeKey) -> Result<&'static ModeDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.key == Some(key))
            .ok_or(Error::UnknownModeCombination(key))
    }

    /// The registers that exist in every mode.
    pub fn general(&self) -> Option<&'static ModeDescriptor> {
        self.descriptors.iter().find(|d| d.key.is_none())
    }

    /// Every descriptor, in declaration order.
    pub fn all_descriptors(&self) -> impl Iterator<Item = &'static ModeDescriptor> + use<> {
        self.descriptors.iter()
    }

    pub fn overall_spec(&self, overall: OverallMode) -> Option<&'static OverallSpec> {
        self.overall.iter().find(|s| s.overall == overall)
    }

    pub fn rules(&self) -> &'static [ModeRule] {
        self.rules
    }

    /// Position of the first declaration of `wire_path` in table order.
    pub fn declaration_order(&self, wire_path: &str) -> Option<usize> {
        self.order.get(wire_path).copied()
    }

    /// Mode keys of every descriptor declaring `wire_path`, in declaration order.
    pub fn sharing(&self, wire_path: &str) -> &[Option<ModeKey>] {
        self.sharing.get(wire_path).map_or(&[], Vec::as_slice)
    }

    /// Every distinct command path the table knows about.
    pub fn wire_paths(&self) -> impl Iterator<Item = &str> {
        self.sharing.keys().map(String::as_str)
    }

    /// The first declaration of `wire_path`.
    pub fn find(&self, wire_path: &str) -> Option<(&'static ModeDescriptor, &'static ParameterSpec)> {
        self.descriptors
            .iter()
            .find_map(|d| d.param_by_wire(wire_path).map(|spec| (d, spec)))
    }

    /// Whether a parameter is reachable without a transition while in `active`.
    pub fn is_available_in(&self, wire_path: &str, active: ModeKey) -> bool {
        self.sharing(wire_path)
            .iter()
            .any(|key| key.is_none() || *key == Some(active))
    }

    /// Whether an overall mode combines with the given constant and sub modes.
    pub fn validate(&self, key: ModeKey) -> Result<()> {
        let ok = self.overall_spec(key.overall).is_some_and(|spec| {
            let const_ok = match key.constant {
                Some(c) => spec.consts.contains(&c),
                None => spec.consts.is_empty(),
            };
            let sub_ok = match key.sub {
                Some(s) => spec.subs.contains(&s),
                None => spec.subs.is_empty(),
            };
            const_ok && sub_ok
        });
        if ok && self.lookup(key).is_ok() {
            Ok(())
        } else {
            Err(Error::UnknownModeCombination(key))
        }
    }

    /// The overall mode indicated by the status registers in `source`.
    pub fn derive_overall(&self, source: &impl ValueSource) -> OverallMode {
        self.rules
            .iter()
            .find(|rule| {
                source
                    .value(rule.register)
                    .is_some_and(|v| v.matches_keyword(rule.keyword))
            })
            .map_or(self.default_overall, |rule| rule.overall)
    }

    /// Derive the full active mode from cached register values.
    ///
    /// Constant and sub modes that can't be read back fall back to the documented default of
    /// the overall mode.
    pub fn derive_active_mode(&self, source: &impl ValueSource) -> ModeKey {
        let overall = self.derive_overall(source);
        let Some(spec) = self.overall_spec(overall) else {
            return ModeKey::bare(overall);
        };

        let constant = if spec.consts.is_empty() {
            None
        } else {
            spec.const_register
                .and_then(|register| source.value(register))
                .and_then(|v| v.as_text().and_then(ConstMode::from_reply))
                .filter(|c| spec.consts.contains(c))
                .or(spec.fallback_const)
        };

        let sub = match constant {
            Some(constant) if !spec.subs.is_empty() => spec
                .sub_wire_path(constant)
                .and_then(|path| source.value(&path).and_then(|v| v.as_text().and_then(SubMode::from_reply)))
                .filter(|s| spec.subs.contains(s))
                .or(spec.fallback_sub),
            _ => None,
        };

        ModeKey::new(overall, constant, sub)
    }

    /// Of `candidates`, the one whose constant and sub mode agree most with the mode
    /// registers in `source`. Ties go to the earlier candidate.
    pub fn closest_mode(&self, candidates: &[ModeKey], source: &impl ValueSource) -> Option<ModeKey> {
        let mut best: Option<(usize, ModeKey)> = None;
        for &key in candidates {
            let score = self.agreement(key, source);
            if best.is_none_or(|(top, _)| score > top) {
                best = Some((score, key));
            }
        }
        best.map(|(_, key)| key)
    }

    fn agreement(&self, key: ModeKey, source: &impl ValueSource) -> usize {
        let Some(spec) = self.overall_spec(key.overall) else {
            return 0;
        };
        let cached_const = spec
            .const_register
            .and_then(|register| source.value(register))
            .and_then(|v| v.as_text().and_then(ConstMode::from_reply));
        let cached_sub = key
            .constant
            .and_then(|c| spec.sub_wire_path(c))
            .and_then(|path| source.value(&path).and_then(|v| v.as_text().and_then(SubMode::from_reply)));

        let constant = key.constant.is_some() && cached_const == key.constant;
        let sub = key.sub.is_some() && cached_sub == key.sub;
        usize::from(constant) + usize::from(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::ParameterStateCache, sdl1000, value::TypedValue};

    #[test]
    fn wire_path_joins_prefix() {
        let table = sdl1000::mode_table(sdl1000::PowerRating::W200);
        let cv = table
            .lookup(ModeKey::constant(OverallMode::Basic, ConstMode::Voltage))
            .unwrap();
        assert_eq!(cv.wire_path("LEVEL:IMMEDIATE"), "VOLTAGE:LEVEL:IMMEDIATE");
        assert_eq!(table.general().unwrap().wire_path("INPUT:STATE"), "INPUT:STATE");
    }

    #[test]
    fn unknown_combination_is_an_error() {
        let table = sdl1000::mode_table(sdl1000::PowerRating::W200);
        let key = ModeKey::constant(OverallMode::Battery, ConstMode::Voltage);
        assert_eq!(table.lookup(key), Err(Error::UnknownModeCombination(key)));
        assert!(table.validate(key).is_err());
        assert!(table.validate(ModeKey::dynamic(ConstMode::Power, SubMode::Toggle)).is_ok());
    }

    #[test]
    fn sub_modes_share_transient_registers() {
        let table = sdl1000::mode_table(sdl1000::PowerRating::W200);
        let sharing = table.sharing("CURRENT:TRANSIENT:MODE");
        assert_eq!(
            sharing,
            &[
                Some(ModeKey::dynamic(ConstMode::Current, SubMode::Continuous)),
                Some(ModeKey::dynamic(ConstMode::Current, SubMode::Pulse)),
                Some(ModeKey::dynamic(ConstMode::Current, SubMode::Toggle)),
            ]
        );
        assert!(table.is_available_in(
            "CURRENT:TRANSIENT:ALEVEL",
            ModeKey::dynamic(ConstMode::Current, SubMode::Toggle)
        ));
        assert!(!table.is_available_in(
            "CURRENT:TRANSIENT:AWIDTH",
            ModeKey::dynamic(ConstMode::Current, SubMode::Toggle)
        ));
    }

    #[test]
    fn derive_priority_prefers_list() {
        let table = sdl1000::mode_table(sdl1000::PowerRating::W200);
        let mut cache = ParameterStateCache::new();
        cache.insert("FUNCTION:MODE", "LIST".into());
        cache.insert("LIST:MODE", "POWER".into());
        cache.insert("FUNCTION", "LED".into());
        assert_eq!(
            table.derive_active_mode(&cache),
            ModeKey::constant(OverallMode::List, ConstMode::Power)
        );
    }

    #[test]
    fn derive_led_from_function_register() {
        let table = sdl1000::mode_table(sdl1000::PowerRating::W200);
        let mut cache = ParameterStateCache::new();
        cache.insert("FUNCTION:MODE", "BASIC".into());
        cache.insert("FUNCTION", "LED".into());
        assert_eq!(table.derive_active_mode(&cache), ModeKey::bare(OverallMode::Led));
    }

    #[test]
    fn derive_dynamic_reads_sub_register() {
        let table = sdl1000::mode_table(sdl1000::PowerRating::W200);
        let mut cache = ParameterStateCache::new();
        cache.insert("FUNCTION:MODE", "TRAN".into());
        cache.insert("FUNCTION:TRANSIENT", "RESISTANCE".into());
        cache.insert("RESISTANCE:TRANSIENT:MODE", "TOGGLE".into());
        assert_eq!(
            table.derive_active_mode(&cache),
            ModeKey::dynamic(ConstMode::Resistance, SubMode::Toggle)
        );
    }

    #[test]
    fn derive_falls_back_when_const_is_unreadable() {
        let table = sdl1000::mode_table(sdl1000::PowerRating::W200);
        let mut cache = ParameterStateCache::new();
        cache.insert("FUNCTION:MODE", "BASIC".into());
        cache.insert("FUNCTION", TypedValue::Text("OCP".into()));
        assert_eq!(
            table.derive_active_mode(&cache),
            ModeKey::constant(OverallMode::Basic, ConstMode::Voltage)
        );
    }
}
