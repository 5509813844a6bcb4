// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transport Trait
//!
//! The chat protocol client is external. The core hands it one envelope per
//! recipient and is told about acknowledgements and incoming envelopes
//! through the orchestrator's `handle_*` and `on_envelope_received` methods.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use thiserror::Error;

use crate::identity::Jid;

/// Transport errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Not connected; the message stays pending and is sent later.
    #[error("Not connected")]
    NotConnected,

    #[error("Rejected by transport: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// What goes over the wire for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Envelope bytes (the transport encodes them for the wire).
    Encrypted(Vec<u8>),
    /// Unencrypted text body.
    Plain(String),
}

/// An envelope addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEnvelope {
    pub xmpp_id: String,
    pub recipient: Jid,
    pub payload: Payload,
    /// Out-of-band attachment link of a plain message. Encrypted payloads
    /// carry the link inside the envelope.
    pub attachment_url: Option<String>,
}

/// An envelope received from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEnvelope {
    /// Full address of the sender.
    pub sender: Jid,
    pub xmpp_id: String,
    pub payload: Payload,
    /// Delay-delivery timestamp set by the server, in milliseconds.
    pub server_date: Option<i64>,
    pub attachment_url: Option<String>,
}

/// Outgoing side of the chat protocol client.
///
/// Implementations must not call back into the orchestrator from `send`.
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Hands one envelope to the network. Acceptance by the server is
    /// reported later through `handle_sent`.
    fn send(&self, envelope: &OutgoingEnvelope) -> TransportResult<()>;
}

/// Mock transport for testing.
///
/// Records sent envelopes and allows error injection.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    sent: Mutex<Vec<OutgoingEnvelope>>,
    /// Error returned once the given number of further sends succeeded.
    inject_error: Mutex<Option<(usize, TransportError)>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a connected mock transport.
    pub fn new() -> Self {
        MockTransport {
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            inject_error: Mutex::new(None),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns all envelopes that have been sent.
    pub fn sent_envelopes(&self) -> Vec<OutgoingEnvelope> {
        self.sent.lock().expect("mutex poisoned").clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().expect("mutex poisoned").clear();
    }

    /// Injects an error to be returned by the next `send`.
    pub fn inject_error(&self, error: TransportError) {
        self.inject_error_after(0, error);
    }

    /// Lets `accepted` more envelopes through, then fails one send with `error`.
    pub fn inject_error_after(&self, accepted: usize, error: TransportError) {
        *self.inject_error.lock().expect("mutex poisoned") = Some((accepted, error));
    }
}

impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, envelope: &OutgoingEnvelope) -> TransportResult<()> {
        {
            let mut injected = self.inject_error.lock().expect("mutex poisoned");
            match injected.as_mut() {
                Some((0, _)) => {
                    if let Some((_, err)) = injected.take() {
                        return Err(err);
                    }
                }
                Some((remaining, _)) => *remaining -= 1,
                None => {}
            }
        }
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().expect("mutex poisoned").push(envelope.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> OutgoingEnvelope {
        OutgoingEnvelope {
            xmpp_id: "Kon_abc".to_string(),
            recipient: Jid::parse("bob@example.org"),
            payload: Payload::Plain("hi".to_string()),
            attachment_url: None,
        }
    }

    #[test]
    fn test_mock_records_and_injects() {
        let transport = MockTransport::new();
        transport.send(&envelope()).unwrap();
        assert_eq!(transport.sent_envelopes().len(), 1);

        transport.inject_error(TransportError::Rejected("quota".to_string()));
        assert!(transport.send(&envelope()).is_err());
        transport.send(&envelope()).unwrap();
        assert_eq!(transport.sent_envelopes().len(), 2);

        transport.set_connected(false);
        assert_eq!(transport.send(&envelope()), Err(TransportError::NotConnected));
    }

    #[test]
    fn test_mock_fails_after_accepting() {
        let transport = MockTransport::new();
        transport.inject_error_after(2, TransportError::NotConnected);
        transport.send(&envelope()).unwrap();
        transport.send(&envelope()).unwrap();
        assert_eq!(transport.send(&envelope()), Err(TransportError::NotConnected));
        transport.send(&envelope()).unwrap();
        assert_eq!(transport.sent_envelopes().len(), 3);
    }
}
