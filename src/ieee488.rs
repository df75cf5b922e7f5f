//! IEEE 488.2 common commands and status registers.

use modular_bitfield::prelude::*;
use tracing::info;

use crate::{
    error::{Error, Result},
    mode::ActiveMode,
    sync::SyncEngine,
    transport::Transport,
};

/// Standard Event Status Register (`*ESR?`). Reading it clears it.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardEventStatus {
    pub operation_complete: bool,
    pub request_control: bool,
    pub query_error: bool,
    pub device_error: bool,
    pub execution_error: bool,
    pub command_error: bool,
    pub user_request: bool,
    pub power_on: bool,
}

impl StandardEventStatus {
    pub fn has_error(&self) -> bool {
        self.query_error() || self.device_error() || self.execution_error() || self.command_error()
    }
}

/// Status Byte (`*STB?`).
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusByte {
    #[skip]
    __: B2,
    pub error_available: bool,
    pub questionable: bool,
    pub message_available: bool,
    pub event_status: bool,
    pub request_service: bool,
    pub operation: bool,
}

impl<T: Transport> SyncEngine<T> {
    /// `*RST` followed by `*CLS`, then re-read everything.
    pub fn reset(&mut self) -> Result<ActiveMode> {
        info!("resetting instrument");
        self.send("*RST")?;
        self.send("*CLS")?;
        self.discharge = None;
        self.refresh()
    }

    pub fn clear_status(&mut self) -> Result<()> {
        self.send("*CLS")
    }

    pub fn event_status(&mut self) -> Result<StandardEventStatus> {
        Ok(StandardEventStatus::from_bytes([self.query_byte("*ESR?")?]))
    }

    pub fn status_byte(&mut self) -> Result<StatusByte> {
        Ok(StatusByte::from_bytes([self.query_byte("*STB?")?]))
    }

    /// Blocks until all pending operations have finished.
    pub fn operation_complete(&mut self) -> Result<bool> {
        Ok(self.query_byte("*OPC?")? == 1)
    }

    /// Software trigger, for `TRIGGER:SOURCE BUS`.
    pub fn trigger(&mut self) -> Result<()> {
        self.send("*TRG")
    }

    fn query_byte(&mut self, query: &str) -> Result<u8> {
        let reply = self.request(query)?;
        reply.trim().parse().map_err(|_| Error::InvalidReply {
            command: query.to_owned(),
            reply,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mock_instrument::MockInstrument,
        mode::{ConstMode, ModeKey, OverallMode},
        sdl1000::{self, PowerRating},
    };

    fn engine() -> SyncEngine<MockInstrument> {
        let table = sdl1000::mode_table(PowerRating::W200);
        let mut engine = SyncEngine::new(MockInstrument::from_table(&table), table);
        engine.refresh().unwrap();
        engine.transport_mut().clear_log();
        engine
    }

    #[test]
    fn event_status_bits() {
        let mut engine = engine();
        engine.transport_mut().set("*ESR", "33");
        let esr = engine.event_status().unwrap();
        assert!(esr.operation_complete());
        assert!(esr.command_error());
        assert!(!esr.power_on());
        assert!(esr.has_error());
    }

    #[test]
    fn status_byte_bits() {
        let mut engine = engine();
        engine.transport_mut().set("*STB", "48");
        let stb = engine.status_byte().unwrap();
        assert!(stb.message_available());
        assert!(stb.event_status());
        assert!(!stb.error_available());
        assert!(!stb.request_service());
    }

    #[test]
    fn out_of_range_byte_is_an_invalid_reply() {
        let mut engine = engine();
        engine.transport_mut().set("*STB", "300");
        assert_eq!(
            engine.status_byte(),
            Err(Error::InvalidReply {
                command: "*STB?".into(),
                reply: "300".into()
            })
        );
    }

    #[test]
    fn reset_clears_status_and_refreshes() {
        let mut engine = engine();
        engine.transport_mut().set("FUNCTION", "CURRENT");
        let mode = engine.reset().unwrap();
        assert_eq!(mode, ModeKey::constant(OverallMode::Basic, ConstMode::Current));
        assert_eq!(engine.transport().sent(), &["*RST".to_owned(), "*CLS".to_owned()]);
    }

    #[test]
    fn opc_and_trigger() {
        let mut engine = engine();
        engine.transport_mut().set("*OPC", "1");
        assert_eq!(engine.operation_complete(), Ok(true));
        engine.trigger().unwrap();
        assert_eq!(engine.transport().sent(), &["*TRG".to_owned()]);
    }
}
