// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! CPIM Message Format (RFC 3862)
//!
//! The plaintext inside every message envelope is a CPIM document binding
//! sender and recipients to the content, which stops an envelope from being
//! replayed to a different recipient or under a different sender.
//!
//! ```text
//! From: <sender uid>
//! To: <uid>; <uid>;
//! DateTime: <RFC 3339>
//!
//! Content-Type: <mime>
//!
//! <body>
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// MIME type of plain text bodies.
pub const MIME_TEXT: &str = "text/plain";
/// MIME type of XMPP stanza bodies.
pub const MIME_XMPP: &str = "application/xmpp+xml";

const CRLF: &str = "\r\n";

/// CPIM parse errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CpimError {
    #[error("Missing header block separator")]
    MissingSeparator,
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),
    #[error("Malformed header line: {0}")]
    MalformedHeader(String),
}

/// A parsed or outgoing CPIM document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpimMessage {
    pub from: String,
    pub to: String,
    pub date: Option<DateTime<Utc>>,
    pub mime: String,
    pub body: String,
}

impl CpimMessage {
    /// Builds a document addressed to every uid in `to`.
    pub fn new(from: &str, to: &[&str], mime: &str, body: &str) -> Self {
        let to = to.iter().map(|uid| format!("{}; ", uid)).collect::<String>();
        CpimMessage {
            from: from.to_string(),
            to,
            date: Some(Utc::now()),
            mime: mime.to_string(),
            body: body.to_string(),
        }
    }

    /// Whether `uid` is among the recipients. Entries are compared whole.
    pub fn is_addressed_to(&self, uid: &str) -> bool {
        self.to
            .split(';')
            .map(str::trim)
            .any(|entry| !entry.is_empty() && entry == uid)
    }

    pub fn is_stanza(&self) -> bool {
        self.mime.eq_ignore_ascii_case(MIME_XMPP)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.body.len() + 128);
        out.push_str(&format!("From: {}{}", self.from, CRLF));
        out.push_str(&format!("To: {}{}", self.to, CRLF));
        if let Some(date) = self.date {
            out.push_str(&format!(
                "DateTime: {}{}",
                date.to_rfc3339_opts(SecondsFormat::Secs, true),
                CRLF
            ));
        }
        out.push_str(CRLF);
        out.push_str(&format!("Content-Type: {}; charset=utf-8{}", self.mime, CRLF));
        out.push_str(CRLF);
        out.push_str(&self.body);
        out
    }

    pub fn parse(text: &str) -> Result<Self, CpimError> {
        let (message_headers, rest) = split_block(text).ok_or(CpimError::MissingSeparator)?;
        let (content_headers, body) = split_block(rest).ok_or(CpimError::MissingSeparator)?;

        let mut from = None;
        let mut to = None;
        let mut date = None;
        for (name, value) in headers(message_headers)? {
            match name.to_ascii_lowercase().as_str() {
                "from" => from = Some(value.to_string()),
                "to" => to = Some(value.to_string()),
                "datetime" => date = DateTime::parse_from_rfc3339(value).ok().map(|d| d.with_timezone(&Utc)),
                _ => {}
            }
        }

        let mut mime = None;
        for (name, value) in headers(content_headers)? {
            if name.eq_ignore_ascii_case("content-type") {
                let media_type = value.split(';').next().unwrap_or_default().trim();
                mime = Some(media_type.to_string());
            }
        }

        Ok(CpimMessage {
            from: from.ok_or(CpimError::MissingHeader("From"))?,
            to: to.ok_or(CpimError::MissingHeader("To"))?,
            date,
            mime: mime.ok_or(CpimError::MissingHeader("Content-Type"))?,
            body: body.to_string(),
        })
    }
}

/// Splits at the first empty line, accepting CRLF or LF line endings.
fn split_block(text: &str) -> Option<(&str, &str)> {
    if let Some(rest) = text.strip_prefix(CRLF).or_else(|| text.strip_prefix('\n')) {
        return Some(("", rest));
    }
    let crlf = text.find("\r\n\r\n").map(|i| (i, 4));
    let lf = text.find("\n\n").map(|i| (i, 2));
    let (index, len) = match (crlf, lf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (a, b) => a.or(b)?,
    };
    Some((&text[..index], &text[index + len..]))
}

fn headers(block: &str) -> Result<Vec<(&str, &str)>, CpimError> {
    block
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.split_once(':')
                .map(|(name, value)| (name.trim(), value.trim()))
                .ok_or_else(|| CpimError::MalformedHeader(line.to_string()))
        })
        .collect()
}
