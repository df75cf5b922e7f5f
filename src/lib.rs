//! This crate provides a session engine for controlling Siglent SDL1000X series programmable DC
//! electronic loads over SCPI.
//!
//! Models this should work with:
//! * SDL1020X
//! * SDL1020X-E
//! * SDL1030X
//! * SDL1030X-E
//!
//! The engine keeps a local mirror of every instrument register, moves the load between its
//! operating modes (Basic, Dynamic, LED, Battery, List, Program, OCP test, OPP test) and only
//! writes the registers whose values actually change. Values are clamped to the limits the
//! instrument would enforce, including limits that depend on the selected current or voltage
//! range.
//!
//! It talks SCPI over any byte interface implementing [`embedded_io`], e.g. a USB virtual
//! serial port or a raw TCP socket to port 5025. A serial link should be configured like so:
//! * Baud rate: 115200 (set on the instrument)
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! ```no_run
//! # use siglent_ctl::{config::SessionConfig, registry::InstrumentRegistry, session::Session};
//! # use siglent_ctl::{transport::Transport, value::TypedValue};
//! # fn demo<T: Transport>(transport: T) -> siglent_ctl::error::Result<()> {
//! let mut session = Session::open(transport, &InstrumentRegistry::default(), SessionConfig::default())?;
//! session.commit([("CURRENT:LEVEL:IMMEDIATE", TypedValue::Float(1.5))])?;
//! session.set_load(true)?;
//! # Ok(())
//! # }
//! ```

pub mod battery_log;
pub mod bounds;
pub mod cache;
pub mod config;
pub mod error;
pub mod ieee488;
pub mod measure;
pub mod mode;
pub mod registry;
pub mod sdl1000;
pub mod session;
pub mod sync;
pub mod table;
mod transition;
pub mod transport;
pub mod value;

#[cfg(test)]
mod mock_instrument;
#[cfg(test)]
mod mock_serial;
