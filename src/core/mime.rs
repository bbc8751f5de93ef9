use chrono::{DateTime, Utc};
use mailparse::{MailHeaderMap, ParsedMail};

use crate::core::models::{BodyStructure, Envelope, Flags, MessageInfo, Uid};
use crate::error::{Error, Result};

/// Parse a raw RFC 5322 message into a `MessageInfo` snapshot.
pub fn parse_message_info(uid: Uid, flags: Flags, raw: &[u8]) -> Result<MessageInfo> {
    let parsed = mailparse::parse_mail(raw)?;
    let headers = parsed.get_headers();

    let date = match headers.get_first_value("Date") {
        Some(value) => parse_date(&value),
        None => None,
    };

    let envelope = Envelope {
        subject: headers.get_first_value("Subject").unwrap_or_default(),
        from: headers.get_first_value("From").unwrap_or_default(),
        to: headers.get_first_value("To").unwrap_or_default(),
        cc: headers.get_first_value("Cc").unwrap_or_default(),
        message_id: headers.get_first_value("Message-ID").unwrap_or_default(),
        date,
    };

    Ok(MessageInfo {
        uid,
        flags,
        envelope,
        headers: parsed
            .headers
            .iter()
            .map(|h| (h.get_key(), h.get_value()))
            .collect(),
        body_structure: body_structure(&parsed),
        size: raw.len(),
    })
}

/// Parse an RFC 2822 date header value. `None` when the value is not a date.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    match mailparse::dateparse(value) {
        Ok(ts) => DateTime::<Utc>::from_timestamp(ts, 0),
        Err(e) => {
            log::debug!("Unparsable date {:?}: {}", value, e);
            None
        }
    }
}

fn body_structure(part: &ParsedMail<'_>) -> BodyStructure {
    let (mime_type, mime_subtype) = match part.ctype.mimetype.split_once('/') {
        Some((t, s)) => (t.to_ascii_lowercase(), s.to_ascii_lowercase()),
        None => (part.ctype.mimetype.to_ascii_lowercase(), String::new()),
    };
    BodyStructure {
        mime_type,
        mime_subtype,
        parts: part.subparts.iter().map(body_structure).collect(),
    }
}

/// Path (1-based part indices) to the first leaf part, depth first.
///
/// An empty path means the message itself is not multipart. `None` for a multipart with
/// no leaves at all.
pub fn find_first_non_multipart(bs: &BodyStructure) -> Option<Vec<usize>> {
    if !bs.is_multipart() {
        return Some(Vec::new());
    }
    for (i, part) in bs.parts.iter().enumerate() {
        if let Some(mut rest) = find_first_non_multipart(part) {
            rest.insert(0, i + 1);
            return Some(rest);
        }
    }
    None
}

/// Decoded text of the part at `path` inside `raw`.
pub fn body_part(raw: &[u8], path: &[usize]) -> Result<String> {
    let parsed = mailparse::parse_mail(raw)?;
    let mut part = &parsed;
    for &idx in path {
        part = idx
            .checked_sub(1)
            .and_then(|i| part.subparts.get(i))
            .ok_or_else(|| Error::Parse(format!("no body part at {:?}", path)))?;
    }
    Ok(part.get_body()?)
}
