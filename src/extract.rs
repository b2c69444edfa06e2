//! Flattens a structured content body into a plain text blob.
//!
//! Best-effort and lossy by intent:
//! 1. Cards first, in order: `toggle` cards contribute heading then content
//!    with paragraph markup stripped; `html` cards pass their markup through.
//! 2. Then paragraph sections, in order, contributing only their first text run.
//! 3. Anything else is skipped.

use crate::content::Body;
use crate::document::{Card, Document, Section};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("content body is missing")]
    MissingBody,

    #[error("content body flattens to empty text")]
    Empty,

    #[error("content body could not be parsed: {0}")]
    Malformed(String),
}

pub fn extract_body(body: &Body) -> Result<String, ExtractError> {
    match body {
        Body::Absent => Err(ExtractError::MissingBody),
        Body::Unparseable(reason) => Err(ExtractError::Malformed(reason.clone())),
        Body::Parsed(doc) => extract_text(doc),
    }
}

pub fn extract_text(doc: &Document) -> Result<String, ExtractError> {
    let mut text = String::new();

    for card in &doc.cards {
        match card {
            Card::Toggle { heading, content } => {
                text.push_str(&strip_paragraphs(heading));
                text.push('\n');
                text.push_str(&strip_paragraphs(content));
                text.push('\n');
            }
            Card::Html { html } => {
                text.push_str(html);
                text.push('\n');
            }
            Card::Ignored { .. } => {}
        }
    }

    for section in &doc.sections {
        if let Section::Paragraph { markers } = section {
            if let Some(run) = markers.first().and_then(|m| m.text.as_deref()) {
                text.push_str(run);
            }
        }
    }

    if text.is_empty() {
        return Err(ExtractError::Empty);
    }

    Ok(text)
}

fn strip_paragraphs(markup: &str) -> String {
    markup.replace("<p>", "").replace("</p>", "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Marker;

    fn paragraph(runs: &[&str]) -> Section {
        Section::Paragraph {
            markers: runs
                .iter()
                .map(|r| Marker {
                    text: Some(r.to_string()),
                })
                .collect(),
        }
    }

    #[test]
    fn test_missing_body() {
        assert_eq!(extract_body(&Body::Absent), Err(ExtractError::MissingBody));
    }

    #[test]
    fn test_unparseable_body() {
        let err = extract_body(&Body::Unparseable("bad".into())).unwrap_err();
        assert_eq!(err, ExtractError::Malformed("bad".into()));
    }

    #[test]
    fn test_empty_document() {
        let doc = Document::default();
        assert_eq!(extract_text(&doc), Err(ExtractError::Empty));

        let doc = Document {
            cards: vec![Card::Ignored {
                kind: "image".into(),
            }],
            sections: vec![Section::Ignored { kind: 10 }],
        };
        assert_eq!(extract_text(&doc), Err(ExtractError::Empty));
    }

    #[test]
    fn test_toggle_card_strips_paragraphs() {
        let doc = Document {
            cards: vec![Card::Toggle {
                heading: "<p>Question</p>".into(),
                content: "<p>Line one</p><p>Line two</p>".into(),
            }],
            sections: vec![],
        };
        assert_eq!(
            extract_text(&doc).unwrap(),
            "Question\n\nLine one\nLine two\n\n"
        );
    }

    #[test]
    fn test_html_card_is_verbatim() {
        let doc = Document {
            cards: vec![Card::Html {
                html: "<div><p>kept</p></div>".into(),
            }],
            sections: vec![],
        };
        assert_eq!(extract_text(&doc).unwrap(), "<div><p>kept</p></div>\n");
    }

    #[test]
    fn test_only_first_run_of_paragraph() {
        let doc = Document {
            cards: vec![],
            sections: vec![paragraph(&["first ", "ignored"]), paragraph(&["next"])],
        };
        assert_eq!(extract_text(&doc).unwrap(), "first next");
    }

    #[test]
    fn test_paragraph_without_text_run_contributes_nothing() {
        let doc = Document {
            cards: vec![],
            sections: vec![
                Section::Paragraph {
                    markers: vec![
                        Marker { text: None },
                        Marker {
                            text: Some("second".into()),
                        },
                    ],
                },
                Section::Paragraph { markers: vec![] },
            ],
        };
        assert_eq!(extract_text(&doc), Err(ExtractError::Empty));
    }

    #[test]
    fn test_cards_before_sections() {
        let doc = Document {
            cards: vec![
                Card::Html { html: "A".into() },
                Card::Ignored {
                    kind: "gallery".into(),
                },
                Card::Toggle {
                    heading: "B".into(),
                    content: "C".into(),
                },
            ],
            sections: vec![paragraph(&["D"]), Section::Ignored { kind: 3 }, paragraph(&["E"])],
        };
        assert_eq!(extract_text(&doc).unwrap(), "A\nB\nC\nDE");
    }
}
