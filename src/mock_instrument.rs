//! We use this mocking module in unit tests to emulate an SDL1000 at the SCPI command level.
//!
//! It keeps a register map, applies the mode side effects of the entry commands and records
//! every command in the order it was sent.

use std::collections::BTreeMap;

use crate::{
    error::TransportError,
    table::{BoundKind, Limit, ModeTable},
    transport::Transport,
    value::{TypedValue, ValueKind},
};

pub const IDN: &str = "Siglent Technologies,SDL1020X-E,SDL13GCX1R0123,1.1.1.21";

/// Our mock instrument.
pub struct MockInstrument {
    /// Reply text per query path (without the `?`)
    registers: BTreeMap<String, String>,
    /// Every successful write, in order
    sent: Vec<String>,
    /// Every query, in order
    queries: Vec<String>,
    /// Writes and queries interleaved, in order
    wire: Vec<String>,
    /// 1-based index of the write that fails with a lost connection
    fail_on_send: Option<usize>,
    send_count: usize,
    /// Set once the simulated connection dropped
    disconnected: bool,
}

impl MockInstrument {
    /// An instrument in Basic CV mode with every register of `table` at a harmless default.
    pub fn from_table(table: &ModeTable) -> Self {
        let mut registers = BTreeMap::new();
        for descriptor in table.all_descriptors() {
            for spec in descriptor.params {
                let value = match spec.kind {
                    ValueKind::Bool => TypedValue::Bool(false),
                    ValueKind::RadioGroup(choices) | ValueKind::EnumString(choices) => {
                        TypedValue::Text(choices.last().copied().unwrap_or_default().to_owned())
                    }
                    ValueKind::IntDecimal | ValueKind::Float(_) => match spec.bounds {
                        BoundKind::Range {
                            lo: Limit::Literal(lo),
                            ..
                        } => TypedValue::Float(lo),
                        _ => TypedValue::Float(0.0),
                    },
                };
                registers
                    .entry(descriptor.wire_path(spec.path))
                    .or_insert_with(|| spec.kind.format(&value));
            }
        }

        let mut mock = Self {
            registers,
            sent: Vec::new(),
            queries: Vec::new(),
            wire: Vec::new(),
            fail_on_send: None,
            send_count: 0,
            disconnected: false,
        };
        mock.set("*IDN", IDN);
        mock.set("FUNCTION", "VOLTAGE");
        mock.set("FUNCTION:TRANSIENT", "CURRENT");
        mock.set("FUNCTION:MODE", "BASIC");
        mock.set("BATTERY:MODE", "CURRENT");
        mock.set("LIST:MODE", "CURRENT");
        mock.set("TRIGGER:SOURCE", "MANUAL");
        mock
    }

    /// Set the reply to `path?`.
    pub fn set(&mut self, path: &str, reply: &str) {
        self.registers.insert(path.to_owned(), reply.to_owned());
    }

    pub fn register(&self, path: &str) -> Option<&str> {
        self.registers.get(path).map(String::as_str)
    }

    pub fn forget(&mut self, path: &str) {
        self.registers.remove(path);
    }

    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    /// Writes and queries in the order they reached the instrument.
    pub fn wire(&self) -> &[String] {
        &self.wire
    }

    /// How often `path?` was queried.
    pub fn request_count(&self, path: &str) -> usize {
        let query = format!("{}?", path);
        self.queries.iter().filter(|q| **q == query).count()
    }

    pub fn clear_log(&mut self) {
        self.sent.clear();
        self.queries.clear();
        self.wire.clear();
    }

    /// Drop the connection on the `n`-th write from now on (1-based).
    pub fn fail_on_send(&mut self, n: usize) {
        self.send_count = 0;
        self.fail_on_send = Some(n);
    }

    pub fn disconnect(&mut self) {
        self.disconnected = true;
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    fn lost() -> TransportError {
        TransportError::ConnectionLost(embedded_io::ErrorKind::BrokenPipe)
    }

    fn load_is_on(&self) -> bool {
        self.register("INPUT:STATE")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("ON"))
    }

    /// Apply a write to the register map, including mode side effects.
    fn apply(&mut self, command: &str) {
        let (path, value) = match command.split_once(' ') {
            Some((path, value)) => (path, Some(value.trim())),
            None => (command, None),
        };

        let mode = match (path, value) {
            ("FUNCTION", Some(_)) | ("FUNCTION:TRANSIENT", Some(_)) if self.load_is_on() => {
                // The real instrument turns the load off and drops the mode change.
                self.set("INPUT:STATE", "0");
                return;
            }
            ("FUNCTION", Some(_)) => Some("BASIC"),
            ("FUNCTION:TRANSIENT", Some(_)) => Some("TRAN"),
            ("BATTERY:FUNC", None) => Some("BATTERY"),
            ("OCP:FUNC", None) => Some("OCP"),
            ("OPP:FUNC", None) => Some("OPP"),
            ("LIST:STATE:ON", None) => Some("LIST"),
            ("PROGRAM:STATE:ON", None) => Some("PROGRAM"),
            _ => None,
        };
        if let Some(mode) = mode {
            self.set("FUNCTION:MODE", mode);
        }
        if let Some(value) = value {
            self.set(path, value);
        }
    }
}

impl Transport for MockInstrument {
    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        if self.disconnected {
            return Err(Self::lost());
        }
        self.send_count += 1;
        if self.fail_on_send == Some(self.send_count) {
            self.disconnected = true;
            return Err(Self::lost());
        }
        self.sent.push(command.to_owned());
        self.wire.push(command.to_owned());
        self.apply(command);
        Ok(())
    }

    fn request(&mut self, query: &str) -> Result<String, TransportError> {
        if self.disconnected {
            return Err(Self::lost());
        }
        self.queries.push(query.to_owned());
        self.wire.push(query.to_owned());
        let path = query.strip_suffix('?').unwrap_or(query);
        self.registers
            .get(path)
            .cloned()
            .ok_or(TransportError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdl1000::{self, PowerRating};

    fn mock() -> MockInstrument {
        MockInstrument::from_table(&sdl1000::mode_table(PowerRating::W200))
    }

    #[test]
    fn defaults_respect_literal_bounds() {
        let mock = mock();
        assert_eq!(mock.register("RESISTANCE:LEVEL:IMMEDIATE"), Some("0.030"));
        assert_eq!(mock.register("CURRENT:IRANGE"), Some("30"));
        assert_eq!(mock.register("BATTERY:TIMER"), Some("0"));
        assert_eq!(mock.register("INPUT:STATE"), Some("0"));
    }

    #[test]
    fn entry_commands_switch_mode() {
        let mut mock = mock();
        mock.send("BATTERY:FUNC").unwrap();
        assert_eq!(mock.request("FUNCTION:MODE?").unwrap(), "BATTERY");
        mock.send("FUNCTION:TRANSIENT POWER").unwrap();
        assert_eq!(mock.request("FUNCTION:MODE?").unwrap(), "TRAN");
        assert_eq!(mock.request("FUNCTION:TRANSIENT?").unwrap(), "POWER");
    }

    #[test]
    fn mode_change_ignored_while_load_on() {
        let mut mock = mock();
        mock.send("INPUT:STATE 1").unwrap();
        mock.send("FUNCTION:TRANSIENT CURRENT").unwrap();
        assert_eq!(mock.register("FUNCTION:MODE"), Some("BASIC"));
        assert_eq!(mock.register("INPUT:STATE"), Some("0"));
    }

    #[test]
    fn nth_send_drops_connection() {
        let mut mock = mock();
        mock.fail_on_send(2);
        assert!(mock.send("A 1").is_ok());
        assert!(mock.send("B 1").is_err());
        assert!(mock.is_disconnected());
        assert!(mock.request("A?").is_err());
        assert_eq!(mock.sent(), &["A 1".to_owned()]);
    }

    #[test]
    fn unknown_queries_time_out() {
        let mut mock = mock();
        assert_eq!(mock.request("NOPE?"), Err(TransportError::Timeout));
        assert_eq!(mock.request_count("NOPE"), 1);
    }
}
