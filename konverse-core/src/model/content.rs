// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message content.
//!
//! A message body is plaintext, an opaque ciphertext, or plaintext recovered
//! from a ciphertext. Decryption replaces the ciphertext; it is never kept
//! next to the plaintext.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crypto::CoderStatus;

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub mime_type: String,
    pub length: u64,
    /// Local file once downloaded; points to the decrypted copy after decryption.
    #[serde(default)]
    pub file_name: Option<PathBuf>,
    pub coder_status: CoderStatus,
    /// Percent, `None` when no download is running.
    #[serde(default)]
    pub download_progress: Option<u8>,
}

impl Attachment {
    /// A remote attachment that has not been downloaded yet.
    pub fn remote(url: &str, coder_status: CoderStatus) -> Self {
        Attachment {
            url: url.to_string(),
            mime_type: String::new(),
            length: 0,
            file_name: None,
            coder_status,
            download_progress: None,
        }
    }

    pub fn with_file(mut self, path: PathBuf, mime_type: &str, length: u64) -> Self {
        self.file_name = Some(path);
        self.mime_type = mime_type.to_string();
        self.length = length;
        self
    }

    pub fn is_downloaded(&self) -> bool {
        self.file_name.is_some()
    }
}

/// Plaintext payload: text and an optional attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub text: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

impl Body {
    pub fn text(text: &str) -> Self {
        Body {
            text: text.to_string(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Content of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum MessageContent {
    /// Sent or received without encryption (or not yet encrypted).
    Plain(Body),
    /// Received ciphertext, not decrypted yet.
    Encrypted(#[serde(with = "base64_blob")] Vec<u8>),
    /// Plaintext recovered from a ciphertext.
    Decrypted(Body),
}

impl MessageContent {
    pub fn plain(text: &str) -> Self {
        MessageContent::Plain(Body::text(text))
    }

    /// The readable body, if there is one.
    pub fn body(&self) -> Option<&Body> {
        match self {
            MessageContent::Plain(body) | MessageContent::Decrypted(body) => Some(body),
            MessageContent::Encrypted(_) => None,
        }
    }

    /// Body text; empty while encrypted.
    pub fn text(&self) -> &str {
        self.body().map(|b| b.text.as_str()).unwrap_or_default()
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.body().and_then(|b| b.attachment.as_ref())
    }

    pub fn attachment_mut(&mut self) -> Option<&mut Attachment> {
        match self {
            MessageContent::Plain(body) | MessageContent::Decrypted(body) => {
                body.attachment.as_mut()
            }
            MessageContent::Encrypted(_) => None,
        }
    }

    pub fn encrypted_data(&self) -> Option<&[u8]> {
        match self {
            MessageContent::Encrypted(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, MessageContent::Encrypted(_))
    }

    /// Replaces the ciphertext with its plaintext.
    ///
    /// Returns `false` (and leaves the content alone) unless the content is
    /// still encrypted.
    pub fn set_decrypted(&mut self, body: Body) -> bool {
        if !self.is_encrypted() {
            warn!("Content is not encrypted, ignoring decrypted body");
            return false;
        }
        *self = MessageContent::Decrypted(body);
        true
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

mod base64_blob {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decryption_replaces_ciphertext() {
        let mut content = MessageContent::Encrypted(vec![1, 2, 3]);
        assert_eq!(content.text(), "");
        assert!(content.set_decrypted(Body::text("hello")));
        assert_eq!(content.text(), "hello");
        assert!(content.encrypted_data().is_none());

        // only once
        assert!(!content.set_decrypted(Body::text("again")));
        assert_eq!(content.text(), "hello");
    }

    #[test]
    fn test_plain_content_not_decryptable() {
        let mut content = MessageContent::plain("hi");
        assert!(!content.set_decrypted(Body::text("x")));
        assert_eq!(content, MessageContent::plain("hi"));
    }

    #[test]
    fn test_json_keeps_ciphertext() {
        let content = MessageContent::Encrypted(vec![0, 255, 7]);
        let json = content.to_json().unwrap();
        assert!(json.contains("AP8H"));
        assert_eq!(MessageContent::from_json(&json).unwrap(), content);
    }

    #[test]
    fn test_json_with_attachment() {
        let attachment = Attachment::remote("https://files.example.org/a.png", CoderStatus::encrypted())
            .with_file(PathBuf::from("/tmp/a.png"), "image/png", 12);
        let content = MessageContent::Decrypted(Body::text("pic").with_attachment(attachment));
        let parsed = MessageContent::from_json(&content.to_json().unwrap()).unwrap();
        assert_eq!(parsed, content);
        assert!(parsed.attachment().unwrap().is_downloaded());
    }
}
