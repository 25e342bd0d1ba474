//! Response APDU definitions
//!
//! A response is a (possibly empty) payload followed by the two status bytes.

pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use status::StatusWord;

/// Error for response APDU processing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    /// Response shorter than a status word
    #[error("Incomplete response: {0} bytes")]
    Incomplete(usize),

    /// Raw bytes do not form a valid APDU
    #[error("Malformed APDU: {0}")]
    Malformed(&'static str),
}

/// Basic APDU response structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response payload data, empty when the card returned only a status word
    payload: Bytes,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with payload and status
    pub fn new(payload: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            payload: payload.into(),
            status: status.into(),
        }
    }

    /// Create a success response
    pub const fn success(payload: Bytes) -> Self {
        Self {
            payload,
            status: status::common::SUCCESS,
        }
    }

    /// Create a payload-less response carrying only a status word
    pub fn status_only(status: impl Into<StatusWord>) -> Self {
        Self {
            payload: Bytes::new(),
            status: status.into(),
        }
    }

    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(data: &Bytes) -> Result<Self, ResponseError> {
        if data.len() < 2 {
            return Err(ResponseError::Incomplete(data.len()));
        }

        let split = data.len() - 2;
        let status = StatusWord::new(data[split], data[split + 1]);
        let payload = data.slice(..split);

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            payload_len = payload.len(),
            "Parsed APDU response"
        );

        Ok(Self { payload, status })
    }

    /// Response payload
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Take ownership of the payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Whether the status word is 90 00
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        let mut buf = BytesMut::with_capacity(response.payload.len() + 2);
        buf.put_slice(&response.payload);
        buf.put_u8(response.status.sw1);
        buf.put_u8(response.status.sw2);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_from_bytes() {
        let data = Bytes::from_static(&[0x01, 0x02, 0x03, 0x90, 0x00]);
        let resp = Response::from_bytes(&data).unwrap();
        assert_eq!(resp.payload().as_ref(), &[0x01, 0x02, 0x03]);
        assert!(resp.is_success());

        let data = Bytes::from_static(&[0x69, 0x83]);
        let resp = Response::from_bytes(&data).unwrap();
        assert!(resp.payload().is_empty());
        assert!(resp.status().is_authentication_blocked());

        let data = Bytes::from_static(&[0x01]);
        assert_eq!(
            Response::from_bytes(&data),
            Err(ResponseError::Incomplete(1))
        );
    }

    #[test]
    fn test_response_into_bytes() {
        let resp = Response::new(Bytes::from_static(&[0xAA]), (0x90, 0x01));
        let raw: Bytes = resp.into();
        assert_eq!(raw.as_ref(), &[0xAA, 0x90, 0x01]);
    }
}
