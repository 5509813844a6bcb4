// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Envelope Packet Framing
//!
//! Every layer of an envelope is a sequence of packets:
//! `tag (1 byte) || body_len (u32 BE) || body`.
//!
//! Outer layer: `[Marker] SessionKey+ (IntegrityProtectedData | EncryptedData)`.
//! Decrypted data: `Compressed [|| Mdc]`.
//! Decompressed data: `[OnePassSignature] Literal [Signature]`.

use thiserror::Error;

use crate::crypto::Signature;
use crate::identity::KeyId;

/// Size of a packet header.
pub const HEADER_SIZE: usize = 5;

/// Body of the marker packet some producers put in front of an envelope.
pub const MARKER_BODY: &[u8] = b"KON";

/// Packet framing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Truncated packet at offset {0}")]
    Truncated(usize),
    #[error("Unknown packet tag {0}")]
    UnknownTag(u8),
    #[error("Malformed {0:?} packet")]
    Malformed(Tag),
}

/// Packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    SessionKey = 1,
    Signature = 2,
    OnePassSignature = 4,
    Compressed = 8,
    EncryptedData = 9,
    Marker = 10,
    Literal = 11,
    IntegrityProtectedData = 18,
    Mdc = 19,
}

impl Tag {
    pub fn from_u8(value: u8) -> Option<Tag> {
        match value {
            1 => Some(Tag::SessionKey),
            2 => Some(Tag::Signature),
            4 => Some(Tag::OnePassSignature),
            8 => Some(Tag::Compressed),
            9 => Some(Tag::EncryptedData),
            10 => Some(Tag::Marker),
            11 => Some(Tag::Literal),
            18 => Some(Tag::IntegrityProtectedData),
            19 => Some(Tag::Mdc),
            _ => None,
        }
    }
}

/// A framed packet borrowed from its buffer.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub tag: Tag,
    pub body: &'a [u8],
}

/// Appends a framed packet to `out`.
pub fn write_packet(out: &mut Vec<u8>, tag: Tag, body: &[u8]) {
    out.push(tag as u8);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
}

/// Sequential reader over framed packets.
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PacketReader { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Tag of the next packet without consuming it.
    pub fn peek_tag(&self) -> Option<Tag> {
        self.data.get(self.pos).and_then(|b| Tag::from_u8(*b))
    }

    /// Reads the next packet; `Ok(None)` at end of input.
    pub fn next_packet(&mut self) -> Result<Option<Packet<'a>>, PacketError> {
        if self.is_empty() {
            return Ok(None);
        }

        let start = self.pos;
        let header = self
            .data
            .get(start..start + HEADER_SIZE)
            .ok_or(PacketError::Truncated(start))?;
        let tag = Tag::from_u8(header[0]).ok_or(PacketError::UnknownTag(header[0]))?;
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

        let body_start = start + HEADER_SIZE;
        let body = body_start
            .checked_add(len)
            .and_then(|end| self.data.get(body_start..end))
            .ok_or(PacketError::Truncated(start))?;

        self.pos = body_start + len;
        Ok(Some(Packet { tag, body }))
    }
}

/// Session key encrypted to one recipient.
///
/// Body: `key_id (8) || ephemeral_public (32) || nonce (24) || wrapped_key (48)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyPacket {
    pub key_id: KeyId,
    pub ephemeral_public: [u8; 32],
    pub nonce: [u8; 24],
    pub wrapped_key: Vec<u8>,
}

/// Session key (32) plus Poly1305 tag (16).
pub const WRAPPED_KEY_SIZE: usize = 48;

impl SessionKeyPacket {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(8 + 32 + 24 + self.wrapped_key.len());
        body.extend_from_slice(self.key_id.as_bytes());
        body.extend_from_slice(&self.ephemeral_public);
        body.extend_from_slice(&self.nonce);
        body.extend_from_slice(&self.wrapped_key);
        body
    }

    pub fn decode(body: &[u8]) -> Result<Self, PacketError> {
        if body.len() != 8 + 32 + 24 + WRAPPED_KEY_SIZE {
            return Err(PacketError::Malformed(Tag::SessionKey));
        }
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&body[..8]);
        let mut ephemeral_public = [0u8; 32];
        ephemeral_public.copy_from_slice(&body[8..40]);
        let mut nonce = [0u8; 24];
        nonce.copy_from_slice(&body[40..64]);

        Ok(SessionKeyPacket {
            key_id: KeyId::from_bytes(key_id),
            ephemeral_public,
            nonce,
            wrapped_key: body[64..].to_vec(),
        })
    }
}

const SIGNATURE_VERSION: u8 = 1;
const HASH_SHA256: u8 = 8;
const ALGORITHM_ED25519: u8 = 22;

/// Announces a signature trailing the literal data.
///
/// Body: `version || hash_algorithm || key_algorithm || issuer_key_id (8)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnePassSignaturePacket {
    pub issuer: KeyId,
}

impl OnePassSignaturePacket {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = vec![SIGNATURE_VERSION, HASH_SHA256, ALGORITHM_ED25519];
        body.extend_from_slice(self.issuer.as_bytes());
        body
    }

    pub fn decode(body: &[u8]) -> Result<Self, PacketError> {
        match body {
            [SIGNATURE_VERSION, HASH_SHA256, ALGORITHM_ED25519, issuer @ ..] if issuer.len() == 8 => {
                let mut id = [0u8; 8];
                id.copy_from_slice(issuer);
                Ok(OnePassSignaturePacket {
                    issuer: KeyId::from_bytes(id),
                })
            }
            _ => Err(PacketError::Malformed(Tag::OnePassSignature)),
        }
    }
}

/// Signature over the literal data.
///
/// Body: `version || issuer_key_id (8) || created_at (u64 BE) || signature (64)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignaturePacket {
    pub issuer: KeyId,
    pub created_at: u64,
    pub signature: Signature,
}

impl SignaturePacket {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(1 + 8 + 8 + 64);
        body.push(SIGNATURE_VERSION);
        body.extend_from_slice(self.issuer.as_bytes());
        body.extend_from_slice(&self.created_at.to_be_bytes());
        body.extend_from_slice(self.signature.as_bytes());
        body
    }

    pub fn decode(body: &[u8]) -> Result<Self, PacketError> {
        if body.len() != 1 + 8 + 8 + 64 || body[0] != SIGNATURE_VERSION {
            return Err(PacketError::Malformed(Tag::Signature));
        }
        let mut issuer = [0u8; 8];
        issuer.copy_from_slice(&body[1..9]);
        let mut created = [0u8; 8];
        created.copy_from_slice(&body[9..17]);
        let signature =
            Signature::from_slice(&body[17..]).ok_or(PacketError::Malformed(Tag::Signature))?;

        Ok(SignaturePacket {
            issuer: KeyId::from_bytes(issuer),
            created_at: u64::from_be_bytes(created),
            signature,
        })
    }
}

const LITERAL_BINARY: u8 = b'b';

/// Encodes a literal data body: `format || created_at (u64 BE) || data`.
pub fn encode_literal(created_at: u64, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(9 + data.len());
    body.push(LITERAL_BINARY);
    body.extend_from_slice(&created_at.to_be_bytes());
    body.extend_from_slice(data);
    body
}

/// Returns the data carried by a literal packet body.
pub fn decode_literal(body: &[u8]) -> Result<&[u8], PacketError> {
    match body.first() {
        Some(&LITERAL_BINARY) if body.len() >= 9 => Ok(&body[9..]),
        _ => Err(PacketError::Malformed(Tag::Literal)),
    }
}

/// Compression algorithm id for raw deflate.
pub const COMPRESSION_DEFLATE: u8 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_walks_packets() {
        let mut data = Vec::new();
        write_packet(&mut data, Tag::Marker, MARKER_BODY);
        write_packet(&mut data, Tag::Literal, &encode_literal(5, b"hi"));

        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.peek_tag(), Some(Tag::Marker));
        let marker = reader.next_packet().unwrap().unwrap();
        assert_eq!(marker.body, MARKER_BODY);
        let literal = reader.next_packet().unwrap().unwrap();
        assert_eq!(decode_literal(literal.body).unwrap(), b"hi");
        assert!(reader.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_reader_rejects_truncated_body() {
        let mut data = Vec::new();
        write_packet(&mut data, Tag::Literal, b"abcdef");
        data.truncate(data.len() - 1);

        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.next_packet().unwrap_err(), PacketError::Truncated(0));
    }

    #[test]
    fn test_reader_rejects_unknown_tag() {
        let data = [0x7f, 0, 0, 0, 0];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.next_packet().unwrap_err(), PacketError::UnknownTag(0x7f));
    }

    #[test]
    fn test_one_pass_signature_rejects_wrong_algorithm() {
        let mut body = OnePassSignaturePacket {
            issuer: KeyId::from_bytes([1; 8]),
        }
        .encode();
        body[2] = 1;
        assert!(OnePassSignaturePacket::decode(&body).is_err());
    }

    #[test]
    fn test_signature_packet_length_checked() {
        let packet = SignaturePacket {
            issuer: KeyId::from_bytes([2; 8]),
            created_at: 42,
            signature: Signature::from_bytes([3; 64]),
        };
        let body = packet.encode();
        assert_eq!(SignaturePacket::decode(&body).unwrap(), packet);
        assert!(SignaturePacket::decode(&body[..body.len() - 1]).is_err());
    }
}
