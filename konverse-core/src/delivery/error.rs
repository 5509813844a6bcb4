// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Delivery error types.

use thiserror::Error;

use crate::envelope::EncodeError;
use crate::storage::StorageError;

use super::transport::TransportError;

/// Delivery error types.
///
/// Cryptographic verdicts are not errors here; they end up in the
/// message's coder status.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Personal key not loaded")]
    NoPersonalKey,

    #[error("Message has no attachment")]
    NoAttachment,

    #[error("Attachment not downloaded")]
    NotDownloaded,

    #[error("Chat has no valid recipients")]
    NoRecipients,

    #[error("Message already present")]
    DuplicateMessage,

    #[error("Background worker stopped")]
    WorkerStopped,
}
