//! Command/response exchange with the WIM application
//!
//! [`Connection`] owns the transport. Commands are either passed in ready-made
//! (see [`crate::commands`]) or assembled in the connection's data buffer with
//! [`Connection::put_byte`] and friends, then sent with
//! [`Connection::send_command`]. The status word of the most recent exchange is
//! kept for callers that branch on it.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{Level, debug, info, trace, warn};
use wim_apdu_core::{CardTransport, Command, Response, StatusWord};

use crate::Result;
use crate::constants::cla;

#[derive(Debug)]
pub struct Connection<T: CardTransport> {
    transport: T,
    class: u8,
    data: BytesMut,
    last_status: Option<StatusWord>,
}

impl<T: CardTransport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            class: cla::ISO,
            data: BytesMut::new(),
            last_status: None,
        }
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Status word of the most recent exchange
    pub const fn last_status_word(&self) -> Option<StatusWord> {
        self.last_status
    }

    /// Start assembling a new command with the interindustry class
    pub fn reset_command(&mut self) -> &mut Self {
        self.class = cla::ISO;
        self.data.clear();
        self
    }

    /// Class byte of the command being assembled
    pub fn set_class(&mut self, class: u8) -> &mut Self {
        self.class = class;
        self
    }

    pub fn put_byte(&mut self, value: u8) -> &mut Self {
        self.data.put_u8(value);
        self
    }

    pub fn put_short(&mut self, value: u16) -> &mut Self {
        self.data.put_u16(value);
        self
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.data.put_slice(value);
        self
    }

    /// Send the assembled command, failing on any status other than 90 00
    pub fn send_command(
        &mut self,
        ins: u8,
        p1p2: u16,
        expected_len: Option<usize>,
        extended: bool,
    ) -> Result<Bytes> {
        let command = self.assembled(ins, p1p2, expected_len, extended);
        self.execute(&command)
    }

    /// Send the assembled command and return the response whatever its status
    pub fn transceive_command(
        &mut self,
        ins: u8,
        p1p2: u16,
        expected_len: Option<usize>,
    ) -> Result<Response> {
        let command = self.assembled(ins, p1p2, expected_len, false);
        self.transmit(&command)
    }

    fn assembled(
        &mut self,
        ins: u8,
        p1p2: u16,
        expected_len: Option<usize>,
        extended: bool,
    ) -> Command {
        let mut command = Command::with_p1p2(self.class, ins, p1p2).extended(extended);
        if !self.data.is_empty() {
            command = command.with_data(self.data.split().freeze());
        }
        if let Some(le) = expected_len {
            command = command.with_le(le);
        }
        command
    }

    /// Exchange `command` and fail on any status other than 90 00
    pub fn execute(&mut self, command: &Command) -> Result<Bytes> {
        let response = self.transmit(command)?;
        if response.is_success() {
            Ok(response.into_payload())
        } else {
            Err(response.status().into())
        }
    }

    /// Exchange `command` and return the response whatever its status
    pub fn transmit(&mut self, command: &Command) -> Result<Response> {
        let raw = command.to_bytes()?;
        trace!(
            cla = command.cla,
            ins = command.ins,
            p1p2 = command.p1p2(),
            lc = command.payload().len(),
            "Sending command"
        );

        let reply = self.transport.transmit_raw(&raw)?;
        let response = Response::from_bytes(&reply)?;
        let status = response.status();
        self.last_status = Some(status);

        let level = status.tracing_level();
        if level == Level::DEBUG {
            debug!(ins = command.ins, %status, "Command completed");
        } else if level == Level::INFO {
            info!(ins = command.ins, %status, description = status.description(), "Command warning");
        } else {
            warn!(ins = command.ins, %status, description = status.description(), "Command failed");
        }

        Ok(response)
    }
}
