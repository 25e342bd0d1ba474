//! Command APDU definitions
//!
//! Commands are encoded per ISO/IEC 7816-4, using short Lc/Le fields unless the
//! command is explicitly marked as extended.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Largest payload a short command APDU can carry
pub const MAX_SHORT_LC: usize = 255;

/// Largest payload an extended command APDU can carry
pub const MAX_EXTENDED_LC: usize = 65_535;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected response length (optional). `256` (short) or `65536`
    /// (extended) ask for as much as the card has.
    pub le: Option<usize>,
    /// Use extended Lc/Le encoding
    pub extended: bool,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
            extended: false,
        }
    }

    /// Create a command from a CLA/INS pair and a combined P1-P2 word
    pub const fn with_p1p2(cla: u8, ins: u8, p1p2: u16) -> Self {
        Self::new(cla, ins, (p1p2 >> 8) as u8, p1p2 as u8)
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: usize) -> Self {
        self.le = Some(le);
        self
    }

    /// Switch to extended length encoding
    pub const fn extended(mut self, extended: bool) -> Self {
        self.extended = extended;
        self
    }

    /// P1 and P2 as one big-endian word
    pub const fn p1p2(&self) -> u16 {
        ((self.p1 as u16) << 8) | self.p2 as u16
    }

    /// Command payload, empty when absent
    pub fn payload(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Serialize to raw APDU bytes
    pub fn to_bytes(&self) -> Result<Bytes> {
        let data = self.payload();
        let max = if self.extended {
            MAX_EXTENDED_LC
        } else {
            MAX_SHORT_LC
        };
        if data.len() > max {
            return Err(Error::PayloadTooLong {
                actual: data.len(),
                max,
            });
        }

        let mut buffer = BytesMut::with_capacity(4 + 3 + data.len() + 3);
        buffer.put_slice(&[self.cla, self.ins, self.p1, self.p2]);

        if !data.is_empty() {
            if self.extended {
                buffer.put_u8(0x00);
                buffer.put_u16(data.len() as u16);
            } else {
                buffer.put_u8(data.len() as u8);
            }
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            if self.extended {
                if data.is_empty() {
                    buffer.put_u8(0x00);
                }
                // 65536 wraps to 00 00
                buffer.put_u16(le as u16);
            } else {
                // 256 wraps to 00
                buffer.put_u8(le as u8);
            }
        }

        Ok(buffer.freeze())
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < 4 {
            return Err(crate::ResponseError::Malformed("command shorter than header").into());
        }

        let mut command = Self::new(raw[0], raw[1], raw[2], raw[3]);
        let body = &raw[4..];

        match body.len() {
            0 => {}
            1 => command.le = Some(short_le(body[0])),
            _ if body[0] == 0x00 && body.len() >= 3 => {
                command.extended = true;
                let n = u16::from_be_bytes([body[1], body[2]]) as usize;
                if body.len() == 3 {
                    command.le = Some(extended_le(n));
                } else if body.len() >= 3 + n {
                    command.data = Some(Bytes::copy_from_slice(&body[3..3 + n]));
                    match body.len() - 3 - n {
                        0 => {}
                        2 => {
                            let le = u16::from_be_bytes([body[3 + n], body[4 + n]]) as usize;
                            command.le = Some(extended_le(le));
                        }
                        _ => {
                            return Err(
                                crate::ResponseError::Malformed("bad extended command length")
                                    .into(),
                            );
                        }
                    }
                } else {
                    return Err(crate::ResponseError::Malformed("truncated command").into());
                }
            }
            _ => {
                let lc = body[0] as usize;
                if body.len() < 1 + lc {
                    return Err(crate::ResponseError::Malformed("truncated command").into());
                }
                command.data = Some(Bytes::copy_from_slice(&body[1..1 + lc]));
                match body.len() - 1 - lc {
                    0 => {}
                    1 => command.le = Some(short_le(body[1 + lc])),
                    _ => {
                        return Err(crate::ResponseError::Malformed("bad command length").into());
                    }
                }
            }
        }

        Ok(command)
    }
}

const fn short_le(byte: u8) -> usize {
    if byte == 0 { 256 } else { byte as usize }
}

const fn extended_le(value: usize) -> usize {
    if value == 0 { 65_536 } else { value }
}
