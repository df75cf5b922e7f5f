//! Bounds resolution: the effective numeric range of a parameter.
//!
//! Ranges may depend on other registers (the selected current range, a paired start/end
//! value), so they are always resolved against a [`ValueSource`]. Resolution never fails: when
//! a dependency isn't known yet the affected side falls back to a permissive sentinel.

use crate::{
    cache::ValueSource,
    table::{BoundKind, Limit, ModeDescriptor, ModeTable, ParameterSpec},
};

/// Lower bound used when a dependency hasn't been read yet.
pub const SENTINEL_LO: f64 = 0.0;
/// Upper bound used when a dependency hasn't been read yet.
pub const SENTINEL_HI: f64 = 1e9;

#[derive(Clone, Copy)]
enum Side {
    Lo,
    Hi,
}

impl Side {
    fn sentinel(self) -> f64 {
        match self {
            Side::Lo => SENTINEL_LO,
            Side::Hi => SENTINEL_HI,
        }
    }
}

/// Resolve the `(lo, hi)` range of `spec` as declared in `descriptor`.
///
/// Parameters without bounds resolve to the whole real line.
pub fn resolve(
    spec: &ParameterSpec,
    descriptor: &ModeDescriptor,
    table: &ModeTable,
    source: &impl ValueSource,
) -> (f64, f64) {
    match spec.bounds {
        BoundKind::None => (f64::NEG_INFINITY, f64::INFINITY),
        BoundKind::Range { lo, hi } => (
            resolve_limit(lo, Side::Lo, descriptor, table, source),
            resolve_limit(hi, Side::Hi, descriptor, table, source),
        ),
    }
}

fn resolve_limit(
    limit: Limit,
    side: Side,
    descriptor: &ModeDescriptor,
    table: &ModeTable,
    source: &impl ValueSource,
) -> f64 {
    let lookup = |wire_path: String| {
        source
            .value(&wire_path)
            .and_then(|v| v.as_f64())
            .unwrap_or_else(|| side.sentinel())
    };
    match limit {
        Limit::Literal(value) => value,
        Limit::Paired(path) => lookup(descriptor.wire_path(path)),
        Limit::CurrentRange => lookup(range_register(descriptor, table, table.current_range)),
        Limit::VoltageRange => lookup(range_register(descriptor, table, table.voltage_range)),
        Limit::PowerRating => table.power_rating,
    }
}

/// The range register of the descriptor's mode; Dynamic modes keep theirs in the transient
/// subtree, e.g. `CURRENT:TRANSIENT:IRANGE`.
fn range_register(descriptor: &ModeDescriptor, table: &ModeTable, register: &str) -> String {
    if descriptor.is_dynamic() {
        descriptor.wire_path(&format!("{}:{}", table.transient_infix, register))
    } else {
        descriptor.wire_path(register)
    }
}

/// Constrain `value` into `bounds`. When the bounds are inverted the upper one wins.
pub fn clamp(value: f64, (lo, hi): (f64, f64)) -> f64 {
    value.max(lo).min(hi)
}
