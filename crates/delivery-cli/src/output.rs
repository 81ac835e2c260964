//! Text rendering of items and rich-text documents.

use std::fmt::Write as _;

use colored::Colorize;
use delivery_core::{Block, ContentItem, InlineStyle, RichTextDocument, TextKind};

/// Element summary of an item, one element per line.
pub fn render_item(item: &ContentItem) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({}, {})",
        item.system.name.bold(),
        item.codename(),
        item.content_type().dimmed()
    );
    if let Some(modified) = item.system.last_modified {
        let _ = writeln!(out, "last modified {}", modified.to_rfc3339());
    }
    for (codename, element) in &item.elements {
        let value = match element.value.as_str() {
            Some(text) => preview(text, 60),
            None => element.value.to_string(),
        };
        let _ = writeln!(
            out,
            "  {:<24} {:<12} {}",
            codename.cyan(),
            element.element_type,
            value
        );
    }
    out
}

/// One line per block, prefixed with the block kind.
pub fn render_document(doc: &RichTextDocument) -> String {
    let mut out = String::new();
    for block in doc {
        let (label, body) = describe(block);
        let _ = writeln!(out, "{} {body}", format!("[{label}]").cyan());
    }
    out
}

fn describe(block: &Block) -> (String, String) {
    match block {
        Block::TextRun(run) => {
            let label = match run.kind {
                TextKind::Paragraph => "p".to_string(),
                TextKind::Heading { level } => format!("h{level}"),
                TextKind::ListItem { ordered, depth } => {
                    format!("{}{depth}", if ordered { "ol" } else { "ul" })
                },
                TextKind::Preformatted => "pre".to_string(),
                TextKind::Quote => "quote".to_string(),
                TextKind::Plain => "text".to_string(),
            };
            let links = run
                .spans
                .iter()
                .filter_map(|span| match &span.style {
                    InlineStyle::Link(target) if !target.href.is_empty() => {
                        Some(target.href.as_str())
                    },
                    _ => None,
                })
                .collect::<Vec<_>>();
            let mut body = run.text.replace('\n', " ");
            if !links.is_empty() {
                let _ = write!(body, " {}", format!("<{}>", links.join(", ")).dimmed());
            }
            (label, body)
        },
        Block::Image(image) => ("image".to_string(), format!("{} {}", image.url, image.alt.dimmed())),
        Block::Link(link) => ("link".to_string(), format!("{} -> {}", link.text, link.target.href)),
        Block::Table(table) => {
            let rows = table
                .rows
                .iter()
                .map(|row| row.join(" | "))
                .collect::<Vec<_>>()
                .join(" / ");
            ("table".to_string(), rows)
        },
        Block::EmbeddedItem(item) => (
            format!("embedded {}", item.content_type),
            format!("{} {}", item.content, format!("({})", item.codename).dimmed()),
        ),
        Block::UnresolvedReference(reference) => (
            "unresolved".to_string(),
            format!("{} {}", reference.content.yellow(), format!("({})", reference.codename).dimmed()),
        ),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use delivery_core::{
        ContentItemReference, EmbeddedItem, EmbeddedRelation, InlineSpan, LinkTarget, TextRun,
        UnresolvedReference,
    };

    #[test]
    fn test_render_document_lines() {
        colored::control::set_override(false);
        let doc = RichTextDocument::new(
            ContentItemReference::new("a", "body"),
            vec![
                Block::TextRun(TextRun {
                    kind: TextKind::Heading { level: 2 },
                    text: "Title".into(),
                    spans: Vec::new(),
                }),
                Block::TextRun(TextRun {
                    kind: TextKind::Paragraph,
                    text: "See docs".into(),
                    spans: vec![InlineSpan {
                        style: InlineStyle::Link(LinkTarget {
                            href: "https://example.com".into(),
                            item_id: None,
                        }),
                        range: 4..8,
                    }],
                }),
                Block::EmbeddedItem(EmbeddedItem {
                    codename: "t1".into(),
                    content_type: "tweet".into(),
                    relation: EmbeddedRelation::Component,
                    content: "https://x.com/1".into(),
                }),
                Block::UnresolvedReference(UnresolvedReference {
                    codename: "gone".into(),
                    content: "missing".into(),
                }),
            ],
        );

        let text = render_document(&doc);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "[h2] Title",
                "[p] See docs <https://example.com>",
                "[embedded tweet] https://x.com/1 (t1)",
                "[unresolved] missing (gone)",
            ]
        );
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 3), "ééé...");
    }
}
