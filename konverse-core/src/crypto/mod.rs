// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod kdf;
pub mod signing;
pub mod status;

pub use kdf::HKDF;
pub use signing::{PublicKey, Signature, SigningKeyPair, StreamingSigner};
pub use status::{
    errors_from_mask, errors_to_mask, CoderError, CoderStatus, Encryption, Signing,
    SigningTransitionError,
};
