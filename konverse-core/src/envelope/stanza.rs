// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Stanza payloads (`application/xmpp+xml`).
//!
//! Messages carrying more than text (an attachment link) are encrypted as a
//! message stanza wrapped in `<xmpp xmlns='jabber:client'>`. Only the
//! elements the core understands are read: `<body>` and the out-of-band
//! `<x xmlns='jabber:x:oob'><url>` element.

use thiserror::Error;

const XMPP_OPEN: &str = "<xmpp xmlns='jabber:client'>";
const XMPP_CLOSE: &str = "</xmpp>";

/// Stanza parse errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StanzaError {
    #[error("Not an xmpp stanza wrapper")]
    NotWrapped,
    #[error("Unterminated element <{0}>")]
    Unterminated(&'static str),
}

/// Content extracted from a stanza.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StanzaContent {
    pub body: String,
    pub attachment_url: Option<String>,
}

impl StanzaContent {
    pub fn text(body: &str) -> Self {
        StanzaContent {
            body: body.to_string(),
            attachment_url: None,
        }
    }

    /// Serializes into the wrapped stanza form.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from(XMPP_OPEN);
        xml.push_str("<message>");
        if !self.body.is_empty() {
            xml.push_str(&format!("<body>{}</body>", escape(&self.body)));
        }
        if let Some(url) = &self.attachment_url {
            xml.push_str(&format!(
                "<x xmlns='jabber:x:oob'><url>{}</url></x>",
                escape(url)
            ));
        }
        xml.push_str("</message>");
        xml.push_str(XMPP_CLOSE);
        xml
    }

    pub fn parse(xml: &str) -> Result<Self, StanzaError> {
        let inner = xml
            .trim()
            .strip_prefix("<xmpp")
            .and_then(|s| s.strip_suffix(XMPP_CLOSE))
            .ok_or(StanzaError::NotWrapped)?;

        Ok(StanzaContent {
            body: element_text(inner, "body")?.unwrap_or_default(),
            attachment_url: element_text(inner, "url")?,
        })
    }
}

/// Text of the first `<name>` element, unescaped.
fn element_text(xml: &str, name: &'static str) -> Result<Option<String>, StanzaError> {
    let open = format!("<{}", name);
    let close = format!("</{}>", name);

    let Some(start) = find_tag(xml, &open) else {
        return Ok(None);
    };
    let after_open = &xml[start + open.len()..];
    let content_start = after_open.find('>').ok_or(StanzaError::Unterminated(name))?;
    if after_open[..content_start].ends_with('/') {
        return Ok(Some(String::new()));
    }
    let content = &after_open[content_start + 1..];
    let end = content.find(&close).ok_or(StanzaError::Unterminated(name))?;
    Ok(Some(unescape(&content[..end])))
}

/// Finds `<name` followed by `>`, `/` or whitespace, so `<body` doesn't match `<bodyx`.
fn find_tag(xml: &str, open: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(pos) = xml[offset..].find(open) {
        let index = offset + pos;
        match xml[index + open.len()..].chars().next() {
            Some('>') | Some('/') => return Some(index),
            Some(c) if c.is_whitespace() => return Some(index),
            _ => offset = index + open.len(),
        }
    }
    None
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}
