//! The request/reply channel to one instrument.
//!
//! The session engine only ever talks to a [`Transport`]. [`LineTransport`] implements it for
//! any byte interface implementing [`embedded_io::Read`] & [`embedded_io::Write`], framing each
//! command and reply with a line terminator as SCPI over serial, USBTMC or raw TCP expects.

use tracing::{trace, warn};

use crate::{
    config::TransportConfig,
    error::{Error, TransportError},
};

/// Exclusive request/reply access to one instrument.
///
/// Implementations block until the reply arrives or the channel fails. There is never more
/// than one outstanding command.
pub trait Transport {
    /// Send a command which produces no reply.
    fn send(&mut self, command: &str) -> Result<(), TransportError>;

    /// Send a query and return its reply with surrounding whitespace removed.
    fn request(&mut self, query: &str) -> Result<String, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).send(command)
    }

    fn request(&mut self, query: &str) -> Result<String, TransportError> {
        (**self).request(query)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).send(command)
    }

    fn request(&mut self, query: &str) -> Result<String, TransportError> {
        (**self).request(query)
    }
}

/// Line-terminated SCPI framing over a byte interface.
///
/// `L` bounds the longest reply we are prepared to buffer.
pub struct LineTransport<S: embedded_io::Read + embedded_io::Write, const L: usize = 256> {
    interface: S,
    /// Appended to every command; its last byte ends every reply. Default `\n`.
    termination: heapless::Vec<u8, 2>,
    /// Bytes received but not yet returned as a reply.
    rx: heapless::Vec<u8, L>,
    /// Longest reply accepted, at most `L`.
    max_reply: usize,
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> LineTransport<S, L> {
    /// Create a new transport terminating lines with `\n`.
    pub fn new(interface: S) -> Self {
        let mut termination = heapless::Vec::new();
        // A one byte push into an empty two byte buffer can't fail.
        let _ = termination.push(b'\n');
        Self {
            interface,
            termination,
            rx: heapless::Vec::new(),
            max_reply: L,
        }
    }

    /// Create a new transport using the line termination and reply limit from `config`.
    ///
    /// The reply limit can only shrink the `L` byte buffer.
    pub fn from_config(interface: S, config: &TransportConfig) -> Result<Self, Error> {
        let invalid = || Error::InvalidValue {
            path: "transport.termination".into(),
            value: config.termination.clone(),
        };
        if config.termination.is_empty() {
            return Err(invalid());
        }
        let termination =
            heapless::Vec::from_slice(config.termination.as_bytes()).map_err(|_| invalid())?;
        if config.max_reply_len == 0 {
            return Err(Error::InvalidValue {
                path: "transport.max_reply_len".into(),
                value: "0".into(),
            });
        }
        Ok(Self {
            interface,
            termination,
            rx: heapless::Vec::new(),
            max_reply: config.max_reply_len.min(L),
        })
    }

    /// Give back the underlying byte interface.
    pub fn into_inner(self) -> S {
        self.interface
    }

    pub fn interface(&self) -> &S {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut S {
        &mut self.interface
    }

    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.interface
            .write_all(line.as_bytes())
            .map_err(TransportError::from_io)?;
        self.interface
            .write_all(&self.termination)
            .map_err(TransportError::from_io)?;
        self.interface.flush().map_err(TransportError::from_io)
    }

    /// Split the first complete line off the receive buffer, if there is one.
    fn take_line(&mut self) -> Option<Result<String, TransportError>> {
        let end = *self.termination.last()?;
        let pos = self.rx.iter().position(|&b| b == end)?;
        let line = core::str::from_utf8(&self.rx[..pos])
            .map(|s| s.trim().to_owned())
            .map_err(|_| TransportError::InvalidUtf8);
        let rest: heapless::Vec<u8, L> =
            heapless::Vec::from_slice(&self.rx[pos + 1..]).unwrap_or_default();
        self.rx = rest;
        Some(line)
    }

    /// Whether the first buffered line is already longer than `max_reply`.
    fn line_exceeds_limit(&self) -> bool {
        let end = self.termination.last().copied().unwrap_or(b'\n');
        match self.rx.iter().position(|&b| b == end) {
            Some(pos) => pos > self.max_reply,
            None => self.rx.len() > self.max_reply,
        }
    }

    fn read_line(&mut self) -> Result<String, TransportError> {
        let mut temp_buf = [0u8; 32];
        loop {
            if let Some(line) = self.take_line() {
                return line;
            }
            match self.interface.read(&mut temp_buf) {
                Ok(0) => {
                    return Err(TransportError::ConnectionLost(
                        embedded_io::ErrorKind::NotConnected,
                    ));
                }
                Ok(bytes_read) => {
                    if self.rx.extend_from_slice(&temp_buf[..bytes_read]).is_err()
                        || self.line_exceeds_limit()
                    {
                        self.rx.clear();
                        return Err(TransportError::ReplyTooLong(self.max_reply));
                    }
                }
                Err(e) => return Err(TransportError::from_io(e)),
            }
        }
    }
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> Transport for LineTransport<S, L> {
    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        trace!(command, "line out");
        self.write_line(command)
    }

    fn request(&mut self, query: &str) -> Result<String, TransportError> {
        if !self.rx.is_empty() {
            warn!(stale = self.rx.len(), "discarding unsolicited bytes before query");
            self.rx.clear();
        }
        trace!(query, "line out");
        self.write_line(query)?;
        let reply = self.read_line()?;
        trace!(reply = reply.as_str(), "line in");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_serial::MockSerial;

    #[test]
    fn send_appends_termination() {
        let mut transport: LineTransport<MockSerial> = LineTransport::new(MockSerial::new());
        transport.send("INPUT:STATE 0").unwrap();
        assert_eq!(transport.interface().written_data(), b"INPUT:STATE 0\n");
    }

    #[test]
    fn request_reads_one_line_and_trims() {
        let mut mock = MockSerial::new();
        mock.set_read_data(b"Siglent Technologies,SDL1020X-E,SDL13GCX1R0123,1.1.1.21\r\n")
            .unwrap();
        let mut transport: LineTransport<MockSerial> = LineTransport::new(mock);

        let reply = transport.request("*IDN?").unwrap();
        assert_eq!(reply, "Siglent Technologies,SDL1020X-E,SDL13GCX1R0123,1.1.1.21");
        assert_eq!(transport.interface().written_data(), b"*IDN?\n");
    }

    #[test]
    fn configured_termination_is_used() {
        let config = TransportConfig {
            termination: "\r\n".into(),
            ..TransportConfig::default()
        };
        let mut mock = MockSerial::new();
        mock.set_read_data(b"30\r\n").unwrap();
        let mut transport: LineTransport<MockSerial> =
            LineTransport::from_config(mock, &config).unwrap();

        assert_eq!(transport.request("CURRENT:IRANGE?").unwrap(), "30");
        assert_eq!(transport.interface().written_data(), b"CURRENT:IRANGE?\r\n");
    }

    #[test]
    fn empty_termination_is_rejected() {
        let config = TransportConfig {
            termination: String::new(),
            ..TransportConfig::default()
        };
        assert!(matches!(
            LineTransport::<MockSerial>::from_config(MockSerial::new(), &config),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn missing_reply_is_a_timeout() {
        let mut transport: LineTransport<MockSerial> = LineTransport::new(MockSerial::new());
        assert_eq!(transport.request("MEAS:VOLT?"), Err(TransportError::Timeout));
    }

    #[test]
    fn overlong_reply_is_rejected() {
        let mut mock = MockSerial::new();
        mock.set_read_data(&[b'9'; 40]).unwrap();
        let mut transport: LineTransport<MockSerial, 16> = LineTransport::new(mock);
        assert_eq!(transport.request("MEAS:VOLT?"), Err(TransportError::ReplyTooLong(16)));
    }

    #[test]
    fn configured_reply_limit_applies() {
        let config = TransportConfig {
            max_reply_len: 8,
            ..TransportConfig::default()
        };
        let mut mock = MockSerial::new();
        mock.set_read_data(b"0123456789\n").unwrap();
        let mut transport: LineTransport<MockSerial> =
            LineTransport::from_config(mock, &config).unwrap();
        assert_eq!(transport.request("*IDN?"), Err(TransportError::ReplyTooLong(8)));
    }

    #[test]
    fn write_failure_is_connection_lost() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);
        let mut transport: LineTransport<MockSerial> = LineTransport::new(mock);
        assert_eq!(
            transport.send("*CLS"),
            Err(TransportError::ConnectionLost(embedded_io::ErrorKind::Other))
        );
    }

    #[test]
    fn stale_bytes_are_discarded_before_a_query() {
        let mut mock = MockSerial::new();
        mock.set_read_data(b"1\n0\n").unwrap();
        let mut transport: LineTransport<MockSerial> = LineTransport::new(mock);

        // The first read pulls both lines into the receive buffer.
        assert_eq!(transport.request("INPUT:STATE?").unwrap(), "1");
        // The second line was never asked for, so it's dropped and the next query times out.
        assert_eq!(transport.request("SHORT:STATE?"), Err(TransportError::Timeout));
    }
}
