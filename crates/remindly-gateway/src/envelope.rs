//! Provider message envelope codec.
//!
//! Inbound messages arrive as a flat XML document:
//!
//! ```text
//! <xml>
//!   <ToUserName><![CDATA[gh_account]]></ToUserName>
//!   <FromUserName><![CDATA[user_openid]]></FromUserName>
//!   <CreateTime>1700000000</CreateTime>
//!   <MsgType><![CDATA[text]]></MsgType>
//!   <Content><![CDATA[hello]]></Content>
//!   <MsgId>1234567890123456</MsgId>
//! </xml>
//! ```
//!
//! Replies use the same shape with sender and recipient swapped. Only the
//! subset of XML the provider actually emits is understood: one root, scalar
//! children, CDATA sections, the five predefined entities and numeric
//! character references.

use std::collections::BTreeMap;

use crate::error::DecodeError;

/// Content type for reply documents.
pub const REPLY_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

const TAG_TO: &str = "ToUserName";
const TAG_FROM: &str = "FromUserName";
const TAG_CREATED: &str = "CreateTime";
const TAG_TYPE: &str = "MsgType";
const TAG_CONTENT: &str = "Content";
const TAG_MSG_ID: &str = "MsgId";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Text,
    /// image, voice, event, ... carried verbatim for logging.
    Other(String),
}

impl MessageType {
    fn parse(s: &str) -> Self {
        match s {
            "text" => Self::Text,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEnvelope {
    pub from_id: String,
    pub to_id: String,
    pub message_type: MessageType,
    pub content: Option<String>,
    /// Epoch seconds.
    pub created_at: i64,
    pub msg_id: Option<String>,
    /// Any other scalar fields (Event, EventKey, MediaId, ...).
    pub extra: BTreeMap<String, String>,
}

impl InboundEnvelope {
    pub fn decode(doc: &str) -> Result<Self, DecodeError> {
        let mut fields = parse_fields(doc)?;

        let mut required = |tag: &'static str| fields.remove(tag).ok_or(DecodeError::MissingField(tag));
        let to_id = required(TAG_TO)?;
        let from_id = required(TAG_FROM)?;
        let created_raw = required(TAG_CREATED)?;
        let message_type = MessageType::parse(required(TAG_TYPE)?.trim());

        let created_at = created_raw
            .trim()
            .parse::<i64>()
            .map_err(|_| DecodeError::InvalidField {
                tag: TAG_CREATED,
                value: created_raw.clone(),
            })?;

        let content = fields.remove(TAG_CONTENT);
        let msg_id = fields.remove(TAG_MSG_ID);

        Ok(Self {
            from_id,
            to_id,
            message_type,
            content,
            created_at,
            msg_id,
            extra: fields,
        })
    }

    /// The text to answer, if this is a text message with something in it.
    pub fn text(&self) -> Option<&str> {
        match (&self.message_type, self.content.as_deref()) {
            (MessageType::Text, Some(content)) if !content.trim().is_empty() => Some(content),
            _ => None,
        }
    }
}

/// A text reply addressed back to the sender of an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    pub from_id: String,
    pub to_id: String,
    pub content: String,
}

impl OutboundEnvelope {
    pub fn reply_to(inbound: &InboundEnvelope, content: impl Into<String>) -> Self {
        Self {
            from_id: inbound.to_id.clone(),
            to_id: inbound.from_id.clone(),
            content: content.into(),
        }
    }

    /// Serialize as a passive text reply stamped with `created_at` (epoch
    /// seconds). The provider's reply format carries no MsgId.
    pub fn encode(&self, created_at: i64) -> String {
        format!(
            "<xml>\n\
             <{TAG_TO}>{}</{TAG_TO}>\n\
             <{TAG_FROM}>{}</{TAG_FROM}>\n\
             <{TAG_CREATED}>{created_at}</{TAG_CREATED}>\n\
             <{TAG_TYPE}>{}</{TAG_TYPE}>\n\
             <{TAG_CONTENT}>{}</{TAG_CONTENT}>\n\
             </xml>",
            cdata(&self.to_id),
            cdata(&self.from_id),
            cdata(MessageType::Text.as_str()),
            cdata(&self.content),
        )
    }
}

/// Wrap `value` in CDATA. A literal `]]>` is split across two sections.
fn cdata(value: &str) -> String {
    format!("<![CDATA[{}]]>", value.replace("]]>", "]]]]><![CDATA[>"))
}

// -- Parsing --

struct Reader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, lit: &str) -> bool {
        if self.rest().starts_with(lit) {
            self.pos += lit.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, lit: &str) -> Result<(), DecodeError> {
        if self.eat(lit) {
            Ok(())
        } else {
            Err(DecodeError::Malformed(format!("expected '{lit}' at byte {}", self.pos)))
        }
    }

    /// Return everything up to `lit` and move past it.
    fn take_until(&mut self, lit: &str) -> Result<&'a str, DecodeError> {
        let rest = self.rest();
        let idx = rest
            .find(lit)
            .ok_or_else(|| DecodeError::Malformed(format!("unterminated, expected '{lit}'")))?;
        self.pos += idx + lit.len();
        Ok(&rest[..idx])
    }
}

fn parse_fields(doc: &str) -> Result<BTreeMap<String, String>, DecodeError> {
    let mut r = Reader { src: doc, pos: 0 };
    let mut fields = BTreeMap::new();

    r.skip_ws();
    if r.eat("<?") {
        r.take_until("?>")?;
        r.skip_ws();
    }
    r.expect("<xml>")?;

    loop {
        r.skip_ws();
        if r.eat("</xml>") {
            break;
        }
        if r.eat("<!--") {
            r.take_until("-->")?;
            continue;
        }
        r.expect("<")?;
        let raw_name = r.take_until(">")?;

        if let Some(name) = raw_name.strip_suffix('/') {
            let name = check_name(name.trim_end())?;
            fields.entry(name.to_string()).or_insert_with(String::new);
            continue;
        }

        let name = check_name(raw_name)?;
        if let Some(value) = read_value(&mut r, name)? {
            fields.entry(name.to_string()).or_insert(value);
        }
    }

    r.skip_ws();
    if !r.rest().is_empty() {
        return Err(DecodeError::Malformed("trailing content after </xml>".into()));
    }

    Ok(fields)
}

fn check_name(name: &str) -> Result<&str, DecodeError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if valid {
        Ok(name)
    } else {
        Err(DecodeError::Malformed(format!("bad element name '{name}'")))
    }
}

/// Read an element body up to its closing tag. Returns `None` for elements
/// with nested children, which are skipped.
fn read_value(r: &mut Reader<'_>, name: &str) -> Result<Option<String>, DecodeError> {
    let close = format!("</{name}>");
    let mut text_runs: Vec<String> = Vec::new();
    let mut value = String::new();
    let mut saw_cdata = false;

    loop {
        if r.eat("<![CDATA[") {
            saw_cdata = true;
            flush_runs(&mut value, &mut text_runs, saw_cdata);
            value.push_str(r.take_until("]]>")?);
            continue;
        }
        if r.eat(&close) {
            flush_runs(&mut value, &mut text_runs, saw_cdata);
            return Ok(Some(value));
        }
        if r.eat("<!--") {
            r.take_until("-->")?;
            continue;
        }
        if r.rest().starts_with('<') {
            r.take_until(&close)?;
            return Ok(None);
        }

        let rest = r.rest();
        let end = rest
            .find('<')
            .ok_or_else(|| DecodeError::Malformed(format!("unterminated <{name}>")))?;
        text_runs.push(unescape(&rest[..end])?);
        r.pos += end;
    }
}

// Whitespace-only text next to CDATA is layout, not content.
fn flush_runs(value: &mut String, runs: &mut Vec<String>, saw_cdata: bool) {
    for run in runs.drain(..) {
        if saw_cdata && run.trim().is_empty() {
            continue;
        }
        value.push_str(&run);
    }
}

fn unescape(text: &str) -> Result<String, DecodeError> {
    if !text.contains('&') {
        return Ok(text.to_string());
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| DecodeError::Malformed("unterminated entity".into()))?;
        let entity = &after[..semi];
        let ch = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            _ => numeric_entity(entity)
                .ok_or_else(|| DecodeError::Malformed(format!("unknown entity '&{entity};'")))?,
        };
        out.push(ch);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn numeric_entity(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    char::from_u32(code)
}
