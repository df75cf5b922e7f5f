//! Mode table of the Siglent SDL1000X series of programmable DC electronic loads.
//!
//! Models: SDL1020X, SDL1020X-E (200 W) and SDL1030X, SDL1030X-E (300 W). Both share the same
//! command set; they differ only in their power rating.
//!
//! A few quirks of the instrument are encoded here rather than in the engine:
//! * `FUNCTION:MODE?` is undocumented and query-only. It reports `BASIC`, `TRAN`, `BATTERY`,
//!   `OCP`, `OPP`, `LIST` or `PROGRAM`; LED counts as `BASIC` with `FUNCTION` reading `LED`.
//! * Battery, OCP, OPP, List and Program can only be entered with a trigger command.
//!   `FUNCTION` can report them, but writing it doesn't select them.

use strum_macros::{Display, EnumIter};

use crate::{
    mode::{ConstMode, ModeKey, OverallMode, SubMode},
    table::{
        DependentFlag, EntryPolicy, Limit, ModeDescriptor, ModeRule, ModeTable, OverallSpec,
        ParameterSpec,
    },
    value::ValueKind,
};

use ConstMode::{Current, Power, Resistance, Voltage};
use Limit::{CurrentRange, Literal, Paired, PowerRating as Rated, VoltageRange};
use SubMode::{Continuous, Pulse, Toggle};

/// The power rating of an SDL1000X model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum PowerRating {
    #[strum(to_string = "200W")]
    W200,
    #[strum(to_string = "300W")]
    W300,
}

impl PowerRating {
    pub fn max_watts(self) -> f64 {
        match self {
            PowerRating::W200 => 200.0,
            PowerRating::W300 => 300.0,
        }
    }
}

pub const MANUFACTURER: &str = "Siglent Technologies";

/// Model names as reported by `*IDN?`.
pub fn models(rating: PowerRating) -> &'static [&'static str] {
    match rating {
        PowerRating::W200 => &["SDL1020X", "SDL1020X-E"],
        PowerRating::W300 => &["SDL1030X", "SDL1030X-E"],
    }
}

/// Build the table for a model with the given power rating.
pub fn mode_table(rating: PowerRating) -> ModeTable {
    ModeTable::new(
        "Siglent SDL1000X",
        DESCRIPTORS,
        OVERALL,
        RULES,
        OverallMode::Basic,
        rating.max_watts(),
    )
}

const IRANGES: &[&str] = &["5", "30"];
const VRANGES: &[&str] = &["36", "150"];
const CONSTS: &[&str] = &["VOLTAGE", "CURRENT", "POWER", "RESISTANCE"];
const FUNCTIONS: &[&str] = &["VOLTAGE", "CURRENT", "POWER", "RESISTANCE", "LED"];
const BATTERY_CONSTS: &[&str] = &["CURRENT", "POWER", "RESISTANCE"];
const SUBS: &[&str] = &["CONTINUOUS", "PULSE", "TOGGLE"];

const fn float(path: &'static str, decimals: u8, lo: Limit, hi: Limit) -> ParameterSpec {
    ParameterSpec::new(path, ValueKind::Float(decimals)).bounded(lo, hi)
}

const fn int(path: &'static str, lo: f64, hi: f64) -> ParameterSpec {
    ParameterSpec::new(path, ValueKind::IntDecimal).bounded(Literal(lo), Literal(hi))
}

const fn flag(path: &'static str) -> ParameterSpec {
    ParameterSpec::new(path, ValueKind::Bool)
}

const IRANGE: ParameterSpec = ParameterSpec::new("IRANGE", ValueKind::RadioGroup(IRANGES));
const VRANGE: ParameterSpec = ParameterSpec::new("VRANGE", ValueKind::RadioGroup(VRANGES));

const BASIC_ENTRY: EntryPolicy = EntryPolicy::Settable {
    path: "FUNCTION",
    fixed: None,
};
const DYNAMIC_ENTRY: EntryPolicy = EntryPolicy::Settable {
    path: "FUNCTION:TRANSIENT",
    fixed: None,
};
const BATTERY_ENTRY: EntryPolicy = EntryPolicy::Triggered {
    command: "BATTERY:FUNC",
};
const LIST_ENTRY: EntryPolicy = EntryPolicy::Triggered {
    command: "LIST:STATE:ON",
};

// Dynamic mode registers. The range registers live below the transient subtree.
const T_IRANGE: ParameterSpec =
    ParameterSpec::new("TRANSIENT:IRANGE", ValueKind::RadioGroup(IRANGES));
const T_VRANGE: ParameterSpec =
    ParameterSpec::new("TRANSIENT:VRANGE", ValueKind::RadioGroup(VRANGES));
const T_MODE: ParameterSpec =
    ParameterSpec::new("TRANSIENT:MODE", ValueKind::RadioGroup(SUBS)).mode_select();

const T_ALEVEL_V: ParameterSpec = float("TRANSIENT:ALEVEL", 3, Literal(0.0), VoltageRange);
const T_BLEVEL_V: ParameterSpec = float("TRANSIENT:BLEVEL", 3, Literal(0.0), VoltageRange);
const T_AWIDTH_V: ParameterSpec = float("TRANSIENT:AWIDTH", 3, Literal(1.0), Literal(999.0));
const T_BWIDTH_V: ParameterSpec = float("TRANSIENT:BWIDTH", 3, Literal(1.0), Literal(999.0));

const T_ALEVEL_C: ParameterSpec = float("TRANSIENT:ALEVEL", 3, Literal(0.0), CurrentRange);
const T_BLEVEL_C: ParameterSpec = float("TRANSIENT:BLEVEL", 3, Literal(0.0), CurrentRange);
const T_AWIDTH_C: ParameterSpec = float("TRANSIENT:AWIDTH", 6, Literal(0.000_020), Literal(999.0));
const T_BWIDTH_C: ParameterSpec = float("TRANSIENT:BWIDTH", 6, Literal(0.000_020), Literal(999.0));
const T_SLEW_POS: ParameterSpec = float("TRANSIENT:SLEW:POSITIVE", 3, Literal(0.001), Literal(0.5));
const T_SLEW_NEG: ParameterSpec = float("TRANSIENT:SLEW:NEGATIVE", 3, Literal(0.001), Literal(0.05));

const T_ALEVEL_P: ParameterSpec = float("TRANSIENT:ALEVEL", 3, Literal(0.0), Rated);
const T_BLEVEL_P: ParameterSpec = float("TRANSIENT:BLEVEL", 3, Literal(0.0), Rated);
const T_AWIDTH_P: ParameterSpec = float("TRANSIENT:AWIDTH", 6, Literal(0.000_040), Literal(999.0));
const T_BWIDTH_P: ParameterSpec = float("TRANSIENT:BWIDTH", 6, Literal(0.000_040), Literal(999.0));

const T_ALEVEL_R: ParameterSpec = float("TRANSIENT:ALEVEL", 3, Literal(0.030), Literal(10000.0));
const T_BLEVEL_R: ParameterSpec = float("TRANSIENT:BLEVEL", 3, Literal(0.030), Literal(10000.0));
const T_AWIDTH_R: ParameterSpec = float("TRANSIENT:AWIDTH", 3, Literal(0.001), Literal(999.0));
const T_BWIDTH_R: ParameterSpec = float("TRANSIENT:BWIDTH", 3, Literal(0.001), Literal(999.0));

const BATTERY_STOPS: [ParameterSpec; 6] = [
    float("VOLTAGE", 3, Literal(0.0), VoltageRange).with_flag(DependentFlag::new("VOLTAGE:STATE")),
    int("CAP", 0.0, 999_999.0).with_flag(DependentFlag::new("CAP:STATE")),
    int("TIMER", 0.0, 86_400.0).with_flag(DependentFlag::new("TIMER:STATE")),
    flag("VOLTAGE:STATE"),
    flag("CAP:STATE"),
    flag("TIMER:STATE"),
];

const fn basic(constant: ConstMode, prefix: &'static str, params: &'static [ParameterSpec]) -> ModeDescriptor {
    ModeDescriptor {
        key: Some(ModeKey::constant(OverallMode::Basic, constant)),
        prefix,
        entry: BASIC_ENTRY,
        params,
    }
}

const fn dynamic(
    constant: ConstMode,
    sub: SubMode,
    prefix: &'static str,
    params: &'static [ParameterSpec],
) -> ModeDescriptor {
    ModeDescriptor {
        key: Some(ModeKey::dynamic(constant, sub)),
        prefix,
        entry: DYNAMIC_ENTRY,
        params,
    }
}

const fn battery(constant: ConstMode, params: &'static [ParameterSpec]) -> ModeDescriptor {
    ModeDescriptor {
        key: Some(ModeKey::constant(OverallMode::Battery, constant)),
        prefix: "BATTERY",
        entry: BATTERY_ENTRY,
        params,
    }
}

const fn list(constant: ConstMode) -> ModeDescriptor {
    ModeDescriptor {
        key: Some(ModeKey::constant(OverallMode::List, constant)),
        prefix: "LIST",
        entry: LIST_ENTRY,
        params: LIST_PARAMS,
    }
}

const LIST_PARAMS: &[ParameterSpec] = &[
    IRANGE,
    VRANGE,
    int("COUNT", 0.0, 65_535.0),
    int("STEP", 1.0, 100.0),
];

static DESCRIPTORS: &[ModeDescriptor] = &[
    ModeDescriptor {
        key: None,
        prefix: "",
        entry: EntryPolicy::ReadOnly,
        params: &[
            // Undocumented: locks the front panel and shows the remote icon.
            flag("SYST:REMOTE:STATE"),
            flag("INPUT:STATE"),
            flag("SHORT:STATE"),
            ParameterSpec::new("FUNCTION", ValueKind::RadioGroup(FUNCTIONS)).mode_select(),
            ParameterSpec::new("FUNCTION:TRANSIENT", ValueKind::RadioGroup(CONSTS)).mode_select(),
            ParameterSpec::new("FUNCTION:MODE", ValueKind::EnumString(&[])).read_only(),
            ParameterSpec::new("BATTERY:MODE", ValueKind::RadioGroup(BATTERY_CONSTS)).mode_select(),
            ParameterSpec::new("LIST:MODE", ValueKind::RadioGroup(CONSTS)).mode_select(),
            ParameterSpec::new("TRIGGER:SOURCE", ValueKind::EnumString(&["MANUAL", "EXTERNAL", "BUS"])),
        ],
    },
    basic(
        Voltage,
        "VOLTAGE",
        &[IRANGE, VRANGE, float("LEVEL:IMMEDIATE", 3, Literal(0.0), VoltageRange)],
    ),
    basic(
        Current,
        "CURRENT",
        &[
            IRANGE,
            VRANGE,
            float("LEVEL:IMMEDIATE", 3, Literal(0.0), CurrentRange),
            float("SLEW:POSITIVE", 3, Literal(0.001), Literal(2.5)),
            float("SLEW:NEGATIVE", 3, Literal(0.001), Literal(2.5)),
        ],
    ),
    basic(
        Power,
        "POWER",
        &[IRANGE, VRANGE, float("LEVEL:IMMEDIATE", 3, Literal(0.0), Rated)],
    ),
    basic(
        Resistance,
        "RESISTANCE",
        &[IRANGE, VRANGE, float("LEVEL:IMMEDIATE", 3, Literal(0.030), Literal(10000.0))],
    ),
    ModeDescriptor {
        key: Some(ModeKey::bare(OverallMode::Led)),
        prefix: "LED",
        entry: EntryPolicy::Settable {
            path: "FUNCTION",
            fixed: Some("LED"),
        },
        params: &[
            IRANGE,
            VRANGE,
            float("VOLTAGE", 3, Literal(0.010), VoltageRange),
            float("CURRENT", 3, Literal(0.0), CurrentRange),
            float("RCONF", 2, Literal(0.01), Literal(1.0)),
        ],
    },
    battery(
        Current,
        &[
            IRANGE,
            VRANGE,
            float("LEVEL", 3, Literal(0.0), CurrentRange),
            BATTERY_STOPS[0],
            BATTERY_STOPS[1],
            BATTERY_STOPS[2],
            BATTERY_STOPS[3],
            BATTERY_STOPS[4],
            BATTERY_STOPS[5],
        ],
    ),
    battery(
        Power,
        &[
            IRANGE,
            VRANGE,
            float("LEVEL", 3, Literal(0.0), Rated),
            BATTERY_STOPS[0],
            BATTERY_STOPS[1],
            BATTERY_STOPS[2],
            BATTERY_STOPS[3],
            BATTERY_STOPS[4],
            BATTERY_STOPS[5],
        ],
    ),
    battery(
        Resistance,
        &[
            IRANGE,
            VRANGE,
            float("LEVEL", 3, Literal(0.030), Literal(10000.0)),
            BATTERY_STOPS[0],
            BATTERY_STOPS[1],
            BATTERY_STOPS[2],
            BATTERY_STOPS[3],
            BATTERY_STOPS[4],
            BATTERY_STOPS[5],
        ],
    ),
    dynamic(
        Voltage,
        Continuous,
        "VOLTAGE",
        &[T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_V, T_BLEVEL_V, T_AWIDTH_V, T_BWIDTH_V],
    ),
    dynamic(
        Voltage,
        Pulse,
        "VOLTAGE",
        &[T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_V, T_BLEVEL_V, T_BWIDTH_V],
    ),
    dynamic(
        Voltage,
        Toggle,
        "VOLTAGE",
        &[T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_V, T_BLEVEL_V],
    ),
    dynamic(
        Current,
        Continuous,
        "CURRENT",
        &[
            T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_C, T_BLEVEL_C, T_AWIDTH_C, T_BWIDTH_C, T_SLEW_POS,
            T_SLEW_NEG,
        ],
    ),
    dynamic(
        Current,
        Pulse,
        "CURRENT",
        &[T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_C, T_BLEVEL_C, T_BWIDTH_C, T_SLEW_POS, T_SLEW_NEG],
    ),
    dynamic(
        Current,
        Toggle,
        "CURRENT",
        &[T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_C, T_BLEVEL_C, T_SLEW_POS, T_SLEW_NEG],
    ),
    dynamic(
        Power,
        Continuous,
        "POWER",
        &[T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_P, T_BLEVEL_P, T_AWIDTH_P, T_BWIDTH_P],
    ),
    dynamic(
        Power,
        Pulse,
        "POWER",
        &[T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_P, T_BLEVEL_P, T_BWIDTH_P],
    ),
    dynamic(
        Power,
        Toggle,
        "POWER",
        &[T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_P, T_BLEVEL_P],
    ),
    dynamic(
        Resistance,
        Continuous,
        "RESISTANCE",
        &[T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_R, T_BLEVEL_R, T_AWIDTH_R, T_BWIDTH_R],
    ),
    dynamic(
        Resistance,
        Pulse,
        "RESISTANCE",
        &[T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_R, T_BLEVEL_R, T_BWIDTH_R],
    ),
    dynamic(
        Resistance,
        Toggle,
        "RESISTANCE",
        &[T_IRANGE, T_VRANGE, T_MODE, T_ALEVEL_R, T_BLEVEL_R],
    ),
    ModeDescriptor {
        key: Some(ModeKey::bare(OverallMode::Ocpt)),
        prefix: "OCP",
        entry: EntryPolicy::Triggered { command: "OCP:FUNC" },
        params: &[
            IRANGE,
            VRANGE,
            float("VOLTAGE", 3, Literal(0.0), VoltageRange),
            float("START", 3, Literal(0.0), Paired("END")),
            float("END", 3, Paired("START"), CurrentRange),
            float("STEP", 3, Literal(0.0), CurrentRange),
            float("STEP:DELAY", 3, Literal(0.001), Literal(999.0)),
            float("MIN", 3, Literal(0.0), Paired("MAX")),
            float("MAX", 3, Paired("MIN"), CurrentRange),
        ],
    },
    ModeDescriptor {
        key: Some(ModeKey::bare(OverallMode::Oppt)),
        prefix: "OPP",
        entry: EntryPolicy::Triggered { command: "OPP:FUNC" },
        params: &[
            IRANGE,
            VRANGE,
            float("VOLTAGE", 3, Literal(0.0), VoltageRange),
            float("START", 2, Literal(0.0), Paired("END")),
            float("END", 2, Paired("START"), Rated),
            float("STEP", 2, Literal(0.0), Rated),
            float("STEP:DELAY", 3, Literal(0.001), Literal(999.0)),
            float("MIN", 3, Literal(0.0), Paired("MAX")),
            float("MAX", 3, Paired("MIN"), Rated),
        ],
    },
    list(Voltage),
    list(Current),
    list(Power),
    list(Resistance),
    ModeDescriptor {
        key: Some(ModeKey::bare(OverallMode::Program)),
        prefix: "PROGRAM",
        entry: EntryPolicy::Triggered {
            command: "PROGRAM:STATE:ON",
        },
        params: &[],
    },
];

const ALL_CONSTS: &[ConstMode] = &[Voltage, Current, Power, Resistance];
const ALL_SUBS: &[SubMode] = &[Continuous, Pulse, Toggle];

const fn bare(overall: OverallMode) -> OverallSpec {
    OverallSpec {
        overall,
        consts: &[],
        const_register: None,
        fallback_const: None,
        subs: &[],
        sub_register: None,
        fallback_sub: None,
    }
}

static OVERALL: &[OverallSpec] = &[
    OverallSpec {
        overall: OverallMode::Basic,
        consts: ALL_CONSTS,
        const_register: Some("FUNCTION"),
        // Leaving a mode without a constant mode (OCP, OPP, LED) loses the previous one.
        fallback_const: Some(Voltage),
        subs: &[],
        sub_register: None,
        fallback_sub: None,
    },
    OverallSpec {
        overall: OverallMode::Dynamic,
        consts: ALL_CONSTS,
        const_register: Some("FUNCTION:TRANSIENT"),
        fallback_const: Some(Current),
        subs: ALL_SUBS,
        sub_register: Some("TRANSIENT:MODE"),
        fallback_sub: Some(Continuous),
    },
    bare(OverallMode::Led),
    OverallSpec {
        overall: OverallMode::Battery,
        consts: &[Current, Power, Resistance],
        const_register: Some("BATTERY:MODE"),
        fallback_const: Some(Current),
        subs: &[],
        sub_register: None,
        fallback_sub: None,
    },
    OverallSpec {
        overall: OverallMode::List,
        consts: ALL_CONSTS,
        const_register: Some("LIST:MODE"),
        fallback_const: Some(Current),
        subs: &[],
        sub_register: None,
        fallback_sub: None,
    },
    bare(OverallMode::Program),
    bare(OverallMode::Ocpt),
    bare(OverallMode::Oppt),
];

static RULES: &[ModeRule] = &[
    ModeRule { register: "FUNCTION:MODE", keyword: "LIST", overall: OverallMode::List },
    ModeRule { register: "FUNCTION:MODE", keyword: "PROGRAM", overall: OverallMode::Program },
    ModeRule { register: "FUNCTION:MODE", keyword: "OCP", overall: OverallMode::Ocpt },
    ModeRule { register: "FUNCTION:MODE", keyword: "OPP", overall: OverallMode::Oppt },
    ModeRule { register: "FUNCTION:MODE", keyword: "BATTERY", overall: OverallMode::Battery },
    ModeRule { register: "FUNCTION:MODE", keyword: "TRAN", overall: OverallMode::Dynamic },
    ModeRule { register: "FUNCTION", keyword: "LED", overall: OverallMode::Led },
];
