//! Scripted transport for tests

use std::collections::VecDeque;

use bytes::Bytes;

use super::{CardTransport, TransportError};

/// Transport that replays queued responses and records every command
///
/// Responses are consumed in order. When the queue holds a single response it
/// is repeated for every further command; an empty queue fails the exchange.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    /// Responses still to be returned
    pub responses: VecDeque<Bytes>,
    /// Commands that were sent
    pub commands: Vec<Bytes>,
    /// Whether the transport is connected
    pub connected: bool,
}

impl MockTransport {
    /// Create a new mock transport with the given responses
    pub fn new<I, B>(responses: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            commands: Vec::new(),
            connected: true,
        }
    }

    /// Create a new mock transport that always returns the given response
    pub fn with_response(response: impl Into<Bytes>) -> Self {
        Self::new([response.into()])
    }

    /// Create a new mock transport that always returns success (90 00)
    pub fn with_success() -> Self {
        Self::with_response(Bytes::from_static(&[0x90, 0x00]))
    }

    /// Queue another response
    pub fn push_response(&mut self, response: impl Into<Bytes>) {
        self.responses.push_back(response.into());
    }
}

impl CardTransport for MockTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::Connection);
        }

        self.commands.push(Bytes::copy_from_slice(command));

        match self.responses.len() {
            0 => Err(TransportError::Transmission),
            1 => Ok(self.responses[0].clone()),
            _ => self.responses.pop_front().ok_or(TransportError::Transmission),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        self.commands.clear();
        Ok(())
    }
}
