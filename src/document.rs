//! Typed view of a structured (mobiledoc) content body.
//!
//! The wire format is loosely typed: cards are `[name, payload]` pairs and
//! sections are arrays whose first element is an integer kind. Everything is
//! validated here once; kinds we don't read map to `Ignored` variants.

use serde_json::Value;

/// Section kind carrying a run of formatted text.
pub const PARAGRAPH_SECTION: i64 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum Card {
    Toggle { heading: String, content: String },
    Html { html: String },
    Ignored { kind: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Paragraph { markers: Vec<Marker> },
    Ignored { kind: i64 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub cards: Vec<Card>,
    pub sections: Vec<Section>,
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("body is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected body shape: {0}")]
    Shape(String),
}

fn shape(message: impl Into<String>) -> DocumentError {
    DocumentError::Shape(message.into())
}

impl Document {
    pub fn parse(raw: &str) -> Result<Document, DocumentError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Document, DocumentError> {
        let root = value
            .as_object()
            .ok_or_else(|| shape("document root is not an object"))?;

        let cards = match root.get("cards") {
            None | Some(Value::Null) => vec![],
            Some(Value::Array(cards)) => cards.iter().map(parse_card).collect::<Result<_, _>>()?,
            Some(_) => return Err(shape("cards is not an array")),
        };

        let sections = match root.get("sections") {
            None | Some(Value::Null) => vec![],
            Some(Value::Array(sections)) => sections
                .iter()
                .map(parse_section)
                .collect::<Result<_, _>>()?,
            Some(_) => return Err(shape("sections is not an array")),
        };

        Ok(Document { cards, sections })
    }
}

fn str_field(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_card(card: &Value) -> Result<Card, DocumentError> {
    let parts = card
        .as_array()
        .ok_or_else(|| shape(format!("card is not an array: {card}")))?;
    let kind = parts
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| shape(format!("card without a name: {card}")))?;
    let payload = parts.get(1).unwrap_or(&Value::Null);

    Ok(match kind {
        "toggle" => Card::Toggle {
            heading: str_field(payload, "heading"),
            content: str_field(payload, "content"),
        },
        "html" => Card::Html {
            html: str_field(payload, "html"),
        },
        other => Card::Ignored {
            kind: other.to_string(),
        },
    })
}

fn section_kind(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_section(section: &Value) -> Result<Section, DocumentError> {
    let parts = section
        .as_array()
        .ok_or_else(|| shape(format!("section is not an array: {section}")))?;
    let kind = parts
        .first()
        .and_then(section_kind)
        .ok_or_else(|| shape(format!("section without an integer kind: {section}")))?;

    if kind != PARAGRAPH_SECTION {
        return Ok(Section::Ignored { kind });
    }

    let markers = parts
        .get(2)
        .and_then(Value::as_array)
        .map(|markers| {
            markers
                .iter()
                .map(|marker| Marker {
                    // [type, open markups, closed count, value]
                    text: marker
                        .as_array()
                        .and_then(|m| m.get(3))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Section::Paragraph { markers })
}
