//! Instrument identification and the models we have mode tables for.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{
    error::{Error, Result},
    sdl1000::{self, PowerRating},
    table::ModeTable,
};

/// The parsed reply to `*IDN?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identification {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl Identification {
    /// Parse `manufacturer,model,serial,firmware`.
    pub fn parse(reply: &str) -> Result<Self> {
        let invalid = || Error::InvalidIdentification(reply.to_owned());
        let fields: Vec<&str> = reply.trim().split(',').map(str::trim).collect();
        let [manufacturer, model, serial, firmware] = fields.as_slice() else {
            return Err(invalid());
        };
        if manufacturer.is_empty() || model.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            manufacturer: (*manufacturer).to_owned(),
            model: (*model).to_owned(),
            serial: (*serial).to_owned(),
            firmware: (*firmware).to_owned(),
        })
    }
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.manufacturer, self.model)
    }
}

struct Entry {
    manufacturer: String,
    model: String,
    build: fn() -> ModeTable,
}

/// Maps `(manufacturer, model)` to the mode table of that instrument.
///
/// Matching ignores ASCII case.
pub struct InstrumentRegistry {
    entries: Vec<Entry>,
}

impl InstrumentRegistry {
    /// A registry without any models.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, manufacturer: &str, model: &str, build: fn() -> ModeTable) {
        self.entries.push(Entry {
            manufacturer: manufacturer.to_owned(),
            model: model.to_owned(),
            build,
        });
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.manufacturer.as_str(), e.model.as_str()))
    }

    /// Build the mode table for an identified instrument.
    pub fn table_for(&self, id: &Identification) -> Result<ModeTable> {
        self.entries
            .iter()
            .find(|e| {
                e.manufacturer.eq_ignore_ascii_case(&id.manufacturer)
                    && e.model.eq_ignore_ascii_case(&id.model)
            })
            .map(|e| (e.build)())
            .ok_or_else(|| Error::UnknownInstrumentType {
                manufacturer: id.manufacturer.clone(),
                model: id.model.clone(),
            })
    }
}

impl Default for InstrumentRegistry {
    /// Every SDL1000X model.
    fn default() -> Self {
        let mut registry = Self::empty();
        for rating in PowerRating::iter() {
            let build: fn() -> ModeTable = match rating {
                PowerRating::W200 => || sdl1000::mode_table(PowerRating::W200),
                PowerRating::W300 => || sdl1000::mode_table(PowerRating::W300),
            };
            for model in sdl1000::models(rating) {
                registry.register(sdl1000::MANUFACTURER, model, build);
            }
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_identification() {
        let id = Identification::parse("Siglent Technologies,SDL1030X-E,SDL13GCX1R0456,1.1.1.21\n")
            .unwrap();
        assert_eq!(id.manufacturer, "Siglent Technologies");
        assert_eq!(id.model, "SDL1030X-E");
        assert_eq!(id.serial, "SDL13GCX1R0456");
        assert_eq!(id.firmware, "1.1.1.21");
        assert_eq!(id.to_string(), "Siglent Technologies SDL1030X-E");
    }

    #[test]
    fn malformed_identification() {
        for reply in ["", "Siglent Technologies,SDL1020X", "a,b,c,d,e", ",SDL1020X,1,2"] {
            assert_eq!(
                Identification::parse(reply),
                Err(Error::InvalidIdentification(reply.to_owned())),
                "{:?}",
                reply
            );
        }
    }

    #[test]
    fn every_sdl_model_is_registered() {
        let registry = InstrumentRegistry::default();
        assert_eq!(registry.models().count(), 4);

        let id = |model: &str| Identification {
            manufacturer: "SIGLENT TECHNOLOGIES".into(),
            model: model.into(),
            serial: String::new(),
            firmware: String::new(),
        };
        assert_eq!(registry.table_for(&id("SDL1020X-E")).unwrap().power_rating, 200.0);
        assert_eq!(registry.table_for(&id("sdl1030x")).unwrap().power_rating, 300.0);
        assert_eq!(
            registry.table_for(&id("SDS1104X-E")).map(|t| t.name),
            Err(Error::UnknownInstrumentType {
                manufacturer: "SIGLENT TECHNOLOGIES".into(),
                model: "SDS1104X-E".into()
            })
        );
    }
}
