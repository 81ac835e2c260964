//! Rich-text parsing and embedded item resolution.
//!
//! Parsing happens in two steps. The markup is first tokenized into a flat
//! list of text runs, open/close markers, void elements and embedded
//! references, each tagged with its byte offset. The token list is then walked
//! once with a stack of open elements; a block is emitted when its closing
//! marker is reached.
//!
//! Block-producing elements are `p`, `h1`..`h6`, `li`, `pre`, `blockquote`,
//! `figure`, `img`, `table`, block-level `a` and embedded objects. Containers
//! such as `ul`, `div` or `tr` produce nothing on their own. When a block
//! element interrupts an open text block (an embedded item inside a
//! paragraph, a nested list item), the text gathered so far is emitted first
//! and the rest continues in a new block, so blocks always come out in
//! document order.
//!
//! Embedded references are looked up in the linked items that came with the
//! response. A codename that is not there is never dereferenced: it becomes an
//! [`UnresolvedReference`] holding the registry's fallback diagnostic.
//!
//! ```rust
//! use delivery_core::{Block, ContentItemReference, LinkedItems, ResolverRegistry, RichTextParser};
//!
//! let registry = ResolverRegistry::new();
//! let parser = RichTextParser::new(&registry);
//! let doc = parser.parse(
//!     ContentItemReference::new("article", "body"),
//!     r#"<p>Intro</p><object type="application/kenticocloud" data-type="item" data-codename="gone"></object>"#,
//!     &LinkedItems::new(),
//! )?;
//!
//! assert_eq!(doc.len(), 2);
//! assert!(matches!(doc.blocks()[1], Block::UnresolvedReference(_)));
//! # Ok::<(), delivery_core::ParseError>(())
//! ```

use std::mem;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, instrument, warn};

use crate::blocks::{
    Block, ContentItemReference, EmbeddedItem, EmbeddedRelation, Image, InlineSpan, InlineStyle,
    Link, LinkTarget, RichTextDocument, Table, TextKind, TextRun, UnresolvedReference,
};
use crate::error::{ParseError, ParseErrorKind};
use crate::resolver::{ResolverRegistry, UnknownItemMarker};
use crate::types::LinkedItems;

/// `type` attribute value marking an `<object>` as an embedded item.
const EMBEDDED_OBJECT_TYPE: &str = "application/kenticocloud";

/// HTML void elements; they never have a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Parses rich-text markup into a [`RichTextDocument`].
///
/// The parser only borrows the registry and keeps no state between calls.
#[derive(Debug, Clone, Copy)]
pub struct RichTextParser<'r> {
    registry: &'r ResolverRegistry,
}

impl<'r> RichTextParser<'r> {
    /// Parser resolving embedded items through `registry`.
    pub const fn new(registry: &'r ResolverRegistry) -> Self {
        Self { registry }
    }

    /// Parse `markup`, the value of the element identified by `source`.
    ///
    /// `linked` must contain every item the markup may embed; the parser never
    /// fetches missing ones.
    #[instrument(skip_all, fields(source = %source, markup_len = markup.len()))]
    pub fn parse(
        &self,
        source: ContentItemReference,
        markup: &str,
        linked: &LinkedItems,
    ) -> Result<RichTextDocument, ParseError> {
        let tokens = tokenize(markup)?;
        let token_count = tokens.len();

        let mut walker = Walker::new(self.registry, linked);
        for token in tokens {
            walker.step(token)?;
        }
        let blocks = walker.finish()?;

        debug!(tokens = token_count, blocks = blocks.len(), "Parsed rich text");
        Ok(RichTextDocument::new(source, blocks))
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open {
        name: String,
        attrs: Attrs,
        offset: usize,
    },
    Close {
        name: String,
        offset: usize,
    },
    Void {
        name: String,
        attrs: Attrs,
        offset: usize,
    },
    Text {
        text: String,
        offset: usize,
    },
    Embedded {
        marker: EmbeddedMarker,
        offset: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EmbeddedMarker {
    codename: Option<String>,
    relation: EmbeddedRelation,
}

impl EmbeddedMarker {
    fn from_attrs(attrs: &Attrs) -> Self {
        let relation = match attrs.get("data-rel") {
            Some("component") => EmbeddedRelation::Component,
            _ => EmbeddedRelation::LinkedItem,
        };
        Self {
            codename: attrs.get("data-codename").map(str::to_string),
            relation,
        }
    }
}

fn is_embedded_object(name: &str, attrs: &Attrs) -> bool {
    name == "object" && attrs.get("type") == Some(EMBEDDED_OBJECT_TYPE)
}

fn tokenize(markup: &str) -> Result<Vec<Token>, ParseError> {
    let mut reader = Reader::from_str(markup);
    {
        let config = reader.config_mut();
        // Balance is checked by the walker so errors carry our offsets.
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.expand_empty_elements = false;
        config.trim_text(false);
    }

    let mut tokens = Vec::new();
    // Offset of an embedded `<object>` whose content is being skipped.
    let mut skipping_object: Option<usize> = None;

    loop {
        let position = usize::try_from(reader.buffer_position()).unwrap_or(usize::MAX);
        let event = reader.read_event().map_err(|e| {
            ParseError::new(position, ParseErrorKind::Markup(e.to_string()))
        })?;

        if let Some(object_offset) = skipping_object {
            match event {
                Event::End(end) if element_name(end.name().as_ref()) == "object" => {
                    skipping_object = None;
                },
                Event::Eof => {
                    return Err(ParseError::new(
                        object_offset,
                        ParseErrorKind::Unclosed {
                            name: "object".to_string(),
                        },
                    ));
                },
                _ => {},
            }
            continue;
        }

        match event {
            Event::Start(start) => {
                let offset = tag_offset(markup, position);
                let name = element_name(start.name().as_ref());
                let attrs = attributes(&start, offset)?;
                if is_embedded_object(&name, &attrs) {
                    tokens.push(Token::Embedded {
                        marker: EmbeddedMarker::from_attrs(&attrs),
                        offset,
                    });
                    skipping_object = Some(offset);
                } else if VOID_ELEMENTS.contains(&name.as_str()) {
                    tokens.push(Token::Void {
                        name,
                        attrs,
                        offset,
                    });
                } else {
                    tokens.push(Token::Open {
                        name,
                        attrs,
                        offset,
                    });
                }
            },
            Event::Empty(start) => {
                let offset = tag_offset(markup, position);
                let name = element_name(start.name().as_ref());
                let attrs = attributes(&start, offset)?;
                if is_embedded_object(&name, &attrs) {
                    tokens.push(Token::Embedded {
                        marker: EmbeddedMarker::from_attrs(&attrs),
                        offset,
                    });
                } else if VOID_ELEMENTS.contains(&name.as_str()) {
                    tokens.push(Token::Void {
                        name,
                        attrs,
                        offset,
                    });
                } else {
                    tokens.push(Token::Open {
                        name: name.clone(),
                        attrs,
                        offset,
                    });
                    tokens.push(Token::Close { name, offset });
                }
            },
            Event::End(end) => {
                tokens.push(Token::Close {
                    name: element_name(end.name().as_ref()),
                    offset: tag_offset(markup, position),
                });
            },
            Event::Text(text) => {
                let raw = String::from_utf8_lossy(&text);
                let decoded = html_escape::decode_html_entities(&raw);
                if !decoded.is_empty() {
                    tokens.push(Token::Text {
                        text: decoded.into_owned(),
                        offset: position,
                    });
                }
            },
            Event::CData(data) => {
                tokens.push(Token::Text {
                    text: String::from_utf8_lossy(&data).into_owned(),
                    offset: tag_offset(markup, position),
                });
            },
            Event::Eof => break,
            _ => {},
        }
    }

    Ok(tokens)
}

/// Offset of the `<` opening a tag that starts at or right after `position`.
fn tag_offset(markup: &str, position: usize) -> usize {
    let bytes = markup.as_bytes();
    match bytes.get(position) {
        Some(b'<') => position,
        _ if position > 0 && bytes.get(position - 1) == Some(&b'<') => position - 1,
        _ => position,
    }
}

fn element_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

fn attributes(start: &BytesStart<'_>, offset: usize) -> Result<Attrs, ParseError> {
    let mut attrs = Vec::new();
    for attr in start.html_attributes() {
        let attr =
            attr.map_err(|e| ParseError::new(offset, ParseErrorKind::Markup(e.to_string())))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
        let raw = String::from_utf8_lossy(&attr.value);
        attrs.push((key, html_escape::decode_html_entities(&raw).into_owned()));
    }
    Ok(Attrs(attrs))
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

enum ElementClass {
    Text(TextKind),
    Inline(InlineStyle),
    Anchor,
    List { ordered: bool },
    Table,
    Row,
    Cell,
    Figure,
    Container,
}

fn classify(name: &str) -> ElementClass {
    match name {
        "p" => ElementClass::Text(TextKind::Paragraph),
        "li" => ElementClass::Text(TextKind::ListItem {
            ordered: false,
            depth: 1,
        }),
        "pre" => ElementClass::Text(TextKind::Preformatted),
        "blockquote" => ElementClass::Text(TextKind::Quote),
        "strong" | "b" => ElementClass::Inline(InlineStyle::Bold),
        "em" | "i" => ElementClass::Inline(InlineStyle::Italic),
        "sup" => ElementClass::Inline(InlineStyle::Superscript),
        "sub" => ElementClass::Inline(InlineStyle::Subscript),
        "code" => ElementClass::Inline(InlineStyle::Code),
        "a" => ElementClass::Anchor,
        "ul" => ElementClass::List { ordered: false },
        "ol" => ElementClass::List { ordered: true },
        "table" => ElementClass::Table,
        "tr" => ElementClass::Row,
        "td" | "th" => ElementClass::Cell,
        "figure" => ElementClass::Figure,
        _ => heading_level(name).map_or(ElementClass::Container, |level| {
            ElementClass::Text(TextKind::Heading { level })
        }),
    }
}

fn heading_level(name: &str) -> Option<u8> {
    name.strip_prefix('h')
        .and_then(|level| level.parse::<u8>().ok())
        .filter(|level| (1..=6).contains(level))
}

enum Frame {
    Text {
        run: TextRun,
        split: bool,
        implicit: bool,
    },
    Inline {
        style: InlineStyle,
        start: usize,
    },
    Table(TableBuilder),
    Figure(Image),
    Link(Link),
    List {
        ordered: bool,
    },
    Container,
}

impl Frame {
    const fn text(kind: TextKind, implicit: bool) -> Self {
        Self::Text {
            run: TextRun {
                kind,
                text: String::new(),
                spans: Vec::new(),
            },
            split: false,
            implicit,
        }
    }

    /// Frames that receive text nested inside them.
    const fn is_sink(&self) -> bool {
        matches!(
            self,
            Self::Text { .. } | Self::Table(_) | Self::Figure(_) | Self::Link(_)
        )
    }

    /// Frames whose nested block elements are folded into them.
    const fn is_absorbing(&self) -> bool {
        matches!(self, Self::Table(_) | Self::Figure(_) | Self::Link(_))
    }
}

struct OpenElement {
    name: String,
    offset: usize,
    frame: Frame,
}

impl OpenElement {
    const fn is_implicit(&self) -> bool {
        matches!(self.frame, Frame::Text { implicit: true, .. })
    }
}

#[derive(Default)]
struct TableBuilder {
    rows: Vec<Vec<String>>,
}

impl TableBuilder {
    fn start_row(&mut self) {
        self.rows.push(Vec::new());
    }

    fn start_cell(&mut self) {
        if self.rows.is_empty() {
            self.start_row();
        }
        if let Some(row) = self.rows.last_mut() {
            row.push(String::new());
        }
    }

    fn current_cell(&mut self) -> Option<&mut String> {
        self.rows.last_mut().and_then(|row| row.last_mut())
    }

    fn push_text(&mut self, text: &str) {
        if let Some(cell) = self.current_cell() {
            cell.push_str(text);
        }
    }

    fn break_line(&mut self) {
        if let Some(cell) = self.current_cell() {
            if !cell.trim().is_empty() {
                cell.push('\n');
            }
        }
    }

    fn finish(self) -> Table {
        Table {
            rows: self
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(|cell| cell.trim().to_string()).collect())
                .collect(),
        }
    }
}

struct Walker<'a> {
    registry: &'a ResolverRegistry,
    linked: &'a LinkedItems,
    stack: Vec<OpenElement>,
    blocks: Vec<Block>,
}

impl<'a> Walker<'a> {
    const fn new(registry: &'a ResolverRegistry, linked: &'a LinkedItems) -> Self {
        Self {
            registry,
            linked,
            stack: Vec::new(),
            blocks: Vec::new(),
        }
    }

    fn step(&mut self, token: Token) -> Result<(), ParseError> {
        match token {
            Token::Text { text, offset } => {
                self.push_text(&text, offset);
                Ok(())
            },
            Token::Open {
                name,
                attrs,
                offset,
            } => {
                self.open(name, &attrs, offset);
                Ok(())
            },
            Token::Void { name, attrs, .. } => {
                self.void(&name, &attrs);
                Ok(())
            },
            Token::Close { name, offset } => self.close(&name, offset),
            Token::Embedded { marker, offset } => self.embedded(marker, offset),
        }
    }

    fn finish(mut self) -> Result<Vec<Block>, ParseError> {
        self.close_implicit();
        if let Some(open) = self.stack.last() {
            return Err(ParseError::new(
                open.offset,
                ParseErrorKind::Unclosed {
                    name: open.name.clone(),
                },
            ));
        }
        Ok(self.blocks)
    }

    fn sink_index(&self) -> Option<usize> {
        self.stack.iter().rposition(|open| open.frame.is_sink())
    }

    fn inside_absorbing(&self) -> bool {
        self.stack.iter().any(|open| open.frame.is_absorbing())
    }

    fn nearest_table(&mut self) -> Option<&mut TableBuilder> {
        self.stack.iter_mut().rev().find_map(|open| match &mut open.frame {
            Frame::Table(table) => Some(table),
            _ => None,
        })
    }

    /// Byte length of the text run that inline styles opened now would cover.
    fn sink_len(&self) -> usize {
        match self.sink_index().map(|i| &self.stack[i].frame) {
            Some(Frame::Text { run, .. }) => run.text.len(),
            _ => 0,
        }
    }

    fn ensure_sink(&mut self, offset: usize) {
        if self.sink_index().is_none() {
            self.stack.push(OpenElement {
                name: String::new(),
                offset,
                frame: Frame::text(TextKind::Plain, true),
            });
        }
    }

    fn push_text(&mut self, text: &str, offset: usize) {
        if self.sink_index().is_none() {
            if text.trim().is_empty() {
                return;
            }
            self.ensure_sink(offset);
        }
        let Some(index) = self.sink_index() else {
            return;
        };
        match &mut self.stack[index].frame {
            Frame::Text { run, .. } => run.text.push_str(text),
            Frame::Table(table) => table.push_text(text),
            Frame::Link(link) => link.text.push_str(text),
            _ => {},
        }
    }

    fn text_kind(&self, kind: TextKind) -> TextKind {
        match kind {
            TextKind::ListItem { .. } => {
                let mut lists = self.stack.iter().filter_map(|open| match open.frame {
                    Frame::List { ordered } => Some(ordered),
                    _ => None,
                });
                let ordered = lists.next_back().unwrap_or(false);
                let depth = self
                    .stack
                    .iter()
                    .filter(|open| matches!(open.frame, Frame::List { .. }))
                    .count();
                TextKind::ListItem {
                    ordered,
                    depth: u8::try_from(depth.max(1)).unwrap_or(u8::MAX),
                }
            },
            TextKind::Paragraph => {
                let in_quote = self.stack.iter().rev().find_map(|open| match &open.frame {
                    Frame::Text { run, .. } => Some(run.kind == TextKind::Quote),
                    _ => None,
                });
                if in_quote == Some(true) {
                    TextKind::Quote
                } else {
                    TextKind::Paragraph
                }
            },
            other => other,
        }
    }

    fn open(&mut self, name: String, attrs: &Attrs, offset: usize) {
        let frame = match classify(&name) {
            ElementClass::Text(kind) => {
                if self.inside_absorbing() {
                    if let Some(table) = self.nearest_table() {
                        table.break_line();
                    }
                    Frame::Container
                } else {
                    let kind = self.text_kind(kind);
                    self.flush_text();
                    Frame::text(kind, false)
                }
            },
            ElementClass::Inline(style) => {
                self.ensure_sink(offset);
                Frame::Inline {
                    style,
                    start: self.sink_len(),
                }
            },
            ElementClass::Anchor => {
                let target = LinkTarget {
                    href: attrs.get("href").unwrap_or_default().to_string(),
                    item_id: attrs.get("data-item-id").map(str::to_string),
                };
                if self.sink_index().is_some() {
                    Frame::Inline {
                        style: InlineStyle::Link(target),
                        start: self.sink_len(),
                    }
                } else {
                    Frame::Link(Link {
                        target,
                        text: String::new(),
                    })
                }
            },
            ElementClass::List { ordered } => Frame::List { ordered },
            ElementClass::Table if !self.inside_absorbing() => {
                self.flush_text();
                Frame::Table(TableBuilder::default())
            },
            ElementClass::Row => {
                if let Some(table) = self.nearest_table() {
                    table.start_row();
                }
                Frame::Container
            },
            ElementClass::Cell => {
                if let Some(table) = self.nearest_table() {
                    table.start_cell();
                }
                Frame::Container
            },
            ElementClass::Figure if !self.inside_absorbing() => {
                self.flush_text();
                Frame::Figure(Image {
                    asset_id: attrs.get("data-asset-id").map(str::to_string),
                    ..Image::default()
                })
            },
            ElementClass::Table | ElementClass::Figure | ElementClass::Container => {
                Frame::Container
            },
        };

        self.stack.push(OpenElement {
            name,
            offset,
            frame,
        });
    }

    fn void(&mut self, name: &str, attrs: &Attrs) {
        match name {
            "br" => {
                if let Some(index) = self.sink_index() {
                    match &mut self.stack[index].frame {
                        Frame::Text { run, .. } => run.text.push('\n'),
                        Frame::Table(table) => table.push_text("\n"),
                        _ => {},
                    }
                }
            },
            "img" => {
                let url = attrs.get("src").unwrap_or_default().to_string();
                let alt = attrs.get("alt").unwrap_or_default().to_string();
                let asset_id = attrs.get("data-asset-id").map(str::to_string);

                let figure = self.stack.iter_mut().rev().find_map(|open| match &mut open.frame {
                    Frame::Figure(image) => Some(image),
                    _ => None,
                });
                if let Some(image) = figure {
                    image.url = url;
                    image.alt = alt;
                    if image.asset_id.is_none() {
                        image.asset_id = asset_id;
                    }
                } else if !self.inside_absorbing() {
                    self.flush_text();
                    self.blocks.push(Block::Image(Image { url, alt, asset_id }));
                }
            },
            _ => {},
        }
    }

    fn close(&mut self, name: &str, offset: usize) -> Result<(), ParseError> {
        self.close_implicit();

        let Some(open) = self.stack.pop() else {
            return Err(ParseError::new(
                offset,
                ParseErrorKind::UnmatchedClose {
                    name: name.to_string(),
                },
            ));
        };

        if open.name != name {
            return Err(ParseError::new(
                offset,
                ParseErrorKind::MismatchedClose {
                    expected: open.name,
                    found: name.to_string(),
                },
            ));
        }

        self.complete(open.frame);
        Ok(())
    }

    /// Close implicit text frames sitting on top of the stack.
    fn close_implicit(&mut self) {
        while self.stack.last().is_some_and(OpenElement::is_implicit) {
            if let Some(open) = self.stack.pop() {
                self.complete(open.frame);
            }
        }
    }

    fn complete(&mut self, frame: Frame) {
        match frame {
            Frame::Text {
                run,
                split,
                implicit,
            } => {
                let whole = !split && !implicit;
                if whole || !run.text.trim().is_empty() {
                    self.blocks.push(Block::TextRun(run));
                }
            },
            Frame::Inline { style, start } => {
                if let Some(index) = self.sink_index() {
                    if let Frame::Text { run, .. } = &mut self.stack[index].frame {
                        let end = run.text.len();
                        if end > start {
                            run.spans.push(InlineSpan {
                                style,
                                range: start..end,
                            });
                        }
                    }
                }
            },
            Frame::Table(table) => self.blocks.push(Block::Table(table.finish())),
            Frame::Figure(image) => self.blocks.push(Block::Image(image)),
            Frame::Link(link) => self.blocks.push(Block::Link(link)),
            Frame::List { .. } | Frame::Container => {},
        }
    }

    /// Emit the text gathered so far by every open text frame, ahead of a
    /// block element that is about to start inside them.
    fn flush_text(&mut self) {
        self.close_implicit();

        for index in 0..self.stack.len() {
            let len = match &self.stack[index].frame {
                Frame::Text { run, .. } => run.text.len(),
                _ => continue,
            };

            // Inline styles still open over this run end here and restart at
            // the beginning of the continuation.
            let mut cut_spans = Vec::new();
            for open in &mut self.stack[index + 1..] {
                match &mut open.frame {
                    Frame::Inline { style, start } => {
                        if len > *start {
                            cut_spans.push(InlineSpan {
                                style: style.clone(),
                                range: *start..len,
                            });
                        }
                        *start = 0;
                    },
                    frame if frame.is_sink() => break,
                    _ => {},
                }
            }

            if let Frame::Text { run, split, .. } = &mut self.stack[index].frame {
                let mut part = TextRun {
                    kind: run.kind,
                    text: mem::take(&mut run.text),
                    spans: mem::take(&mut run.spans),
                };
                part.spans.extend(cut_spans);
                *split = true;
                if !part.text.trim().is_empty() {
                    self.blocks.push(Block::TextRun(part));
                }
            }
        }
    }

    fn embedded(&mut self, marker: EmbeddedMarker, offset: usize) -> Result<(), ParseError> {
        let block = self.resolve(marker, offset)?;

        if self.inside_absorbing() {
            let content = match &block {
                Block::EmbeddedItem(item) => item.content.clone(),
                Block::UnresolvedReference(reference) => reference.content.clone(),
                _ => String::new(),
            };
            self.push_text(&content, offset);
        } else {
            self.flush_text();
            self.blocks.push(block);
        }
        Ok(())
    }

    fn resolve(&self, marker: EmbeddedMarker, offset: usize) -> Result<Block, ParseError> {
        let codename = marker
            .codename
            .ok_or_else(|| ParseError::new(offset, ParseErrorKind::MissingCodename))?;

        let Some(item) = self.linked.get(&codename) else {
            warn!(codename = %codename, "Embedded item missing from linked items");
            let content = self
                .registry
                .resolve_unknown(&UnknownItemMarker::unretrieved(codename.as_str()));
            return Ok(Block::UnresolvedReference(UnresolvedReference {
                codename,
                content,
            }));
        };

        let content = self.registry.resolve(item).map_err(|source| {
            ParseError::new(
                offset,
                ParseErrorKind::Strategy {
                    codename: codename.clone(),
                    content_type: item.content_type().to_string(),
                    source,
                },
            )
        })?;

        Ok(Block::EmbeddedItem(EmbeddedItem {
            codename,
            content_type: item.content_type().to_string(),
            relation: marker.relation,
            content,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::disallowed_macros)]
mod tests {
    use super::*;
    use crate::ContentItem;
    use crate::StrategyFailure;
    use crate::resolver::tests::item;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source() -> ContentItemReference {
        ContentItemReference::new("article", "body")
    }

    fn object(codename: &str) -> String {
        format!(
            r#"<object type="application/kenticocloud" data-type="item" data-rel="component" data-codename="{codename}"></object>"#
        )
    }

    fn parse(markup: &str) -> Result<RichTextDocument, ParseError> {
        let registry = ResolverRegistry::new();
        RichTextParser::new(&registry).parse(source(), markup, &LinkedItems::new())
    }

    fn text_of(block: &Block) -> &str {
        &block.as_text().unwrap().text
    }

    fn linked(items: Vec<ContentItem>) -> LinkedItems {
        items
            .into_iter()
            .map(|item| (item.codename().to_string(), item))
            .collect()
    }

    #[test]
    fn test_empty_markup_is_empty_document() {
        let doc = parse("").unwrap();
        assert!(doc.is_empty());
        assert_eq!(doc.source(), &source());
    }

    #[test]
    fn test_paragraphs_and_headings_in_order() {
        let doc = parse("<h1>Title</h1>\n<p>First</p>\n<h3>Sub</h3><p>Second</p>").unwrap();
        let kinds: Vec<_> = doc.iter().map(|b| b.as_text().unwrap().kind).collect();
        assert_eq!(
            kinds,
            [
                TextKind::Heading { level: 1 },
                TextKind::Paragraph,
                TextKind::Heading { level: 3 },
                TextKind::Paragraph,
            ]
        );
        assert_eq!(text_of(&doc.blocks()[3]), "Second");
    }

    #[test]
    fn test_empty_paragraph_still_yields_block() {
        let doc = parse("<p></p><p>x</p>").unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(text_of(&doc.blocks()[0]), "");
    }

    #[test]
    fn test_inline_spans() {
        let doc = parse("<p>Make <strong>good <em>coffee</em></strong> daily</p>").unwrap();
        let run = doc.blocks()[0].as_text().unwrap();
        assert_eq!(run.text, "Make good coffee daily");

        let styled: Vec<_> = run
            .spans
            .iter()
            .map(|span| (span.style.clone(), run.span_text(span).unwrap()))
            .collect();
        assert_eq!(
            styled,
            [
                (InlineStyle::Italic, "coffee"),
                (InlineStyle::Bold, "good coffee"),
            ]
        );
    }

    #[test]
    fn test_entities_are_decoded() {
        let doc = parse("<p>Tom &amp; Jerry&nbsp;&lt;3 &#233;</p>").unwrap();
        assert_eq!(text_of(&doc.blocks()[0]), "Tom & Jerry\u{a0}<3 é");
    }

    #[test]
    fn test_inline_link_and_item_link() {
        let doc = parse(
            r#"<p>See <a href="https://example.com/brew">brewing</a> and <a data-item-id="42" href="">espresso</a></p>"#,
        )
        .unwrap();
        let run = doc.blocks()[0].as_text().unwrap();
        let targets: Vec<_> = run
            .spans
            .iter()
            .map(|span| match &span.style {
                InlineStyle::Link(target) => (target.href.as_str(), target.item_id.as_deref()),
                other => panic!("unexpected style {other:?}"),
            })
            .collect();
        assert_eq!(
            targets,
            [("https://example.com/brew", None), ("", Some("42"))]
        );
    }

    #[test]
    fn test_block_level_link() {
        let doc = parse(r#"<a href="https://example.com">Home</a><p>after</p>"#).unwrap();
        match &doc.blocks()[0] {
            Block::Link(link) => {
                assert_eq!(link.text, "Home");
                assert_eq!(link.target.href, "https://example.com");
            },
            other => panic!("expected link, got {other:?}"),
        }
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_lists_with_depth() {
        let doc = parse("<ul><li>one</li><li>two<ol><li>nested</li></ol></li></ul>").unwrap();
        let items: Vec<_> = doc
            .iter()
            .map(|b| {
                let run = b.as_text().unwrap();
                (run.text.as_str(), run.kind)
            })
            .collect();
        assert_eq!(
            items,
            [
                ("one", TextKind::ListItem { ordered: false, depth: 1 }),
                ("two", TextKind::ListItem { ordered: false, depth: 1 }),
                ("nested", TextKind::ListItem { ordered: true, depth: 2 }),
            ]
        );
    }

    #[test]
    fn test_figure_image() {
        let doc = parse(
            r#"<figure data-asset-id="a-1" data-image-id="a-1"><img src="https://assets.example.com/cup.jpg" data-asset-id="a-1" data-image-id="a-1" alt="A cup"></figure>"#,
        )
        .unwrap();
        assert_eq!(
            doc.blocks(),
            [Block::Image(Image {
                url: "https://assets.example.com/cup.jpg".into(),
                alt: "A cup".into(),
                asset_id: Some("a-1".into()),
            })]
        );
    }

    #[test]
    fn test_bare_img_and_br() {
        let doc = parse(r#"<p>line<br>break</p><img src="x.png" alt="">"#).unwrap();
        assert_eq!(text_of(&doc.blocks()[0]), "line\nbreak");
        assert!(matches!(&doc.blocks()[1], Block::Image(image) if image.url == "x.png"));
    }

    #[test]
    fn test_table_cells() {
        let doc = parse(
            "<table><tbody>\n<tr><td>Origin</td><td><p>Ethiopia</p><p>Kenya</p></td></tr>\n<tr><td>Roast</td><td>Light</td></tr>\n</tbody></table>",
        )
        .unwrap();
        assert_eq!(
            doc.blocks(),
            [Block::Table(Table {
                rows: vec![
                    vec!["Origin".into(), "Ethiopia\nKenya".into()],
                    vec!["Roast".into(), "Light".into()],
                ],
            })]
        );
    }

    #[test]
    fn test_embedded_item_uses_registered_strategy() {
        let mut registry = ResolverRegistry::new();
        registry.register_fn("tweet", |item| Ok(format!("[tweet:{}]", item.codename())));
        let side_table = linked(vec![item("t1", "tweet", &[])]);

        let markup = format!("<p>Before</p>{}<p>After</p>", object("t1"));
        let doc = RichTextParser::new(&registry)
            .parse(source(), &markup, &side_table)
            .unwrap();

        assert_eq!(doc.len(), 3);
        assert_eq!(
            doc.blocks()[1],
            Block::EmbeddedItem(EmbeddedItem {
                codename: "t1".into(),
                content_type: "tweet".into(),
                relation: EmbeddedRelation::Component,
                content: "[tweet:t1]".into(),
            })
        );
    }

    #[test]
    fn test_self_closing_object_marker() {
        let registry = ResolverRegistry::new();
        let side_table = linked(vec![item("v1", "video", &[])]);
        let markup = r#"<object type="application/kenticocloud" data-type="item" data-codename="v1"/>"#;
        let doc = RichTextParser::new(&registry)
            .parse(source(), markup, &side_table)
            .unwrap();

        match &doc.blocks()[0] {
            Block::EmbeddedItem(embedded) => {
                assert_eq!(embedded.relation, EmbeddedRelation::LinkedItem);
                assert_eq!(
                    embedded.content,
                    "Content type 'video' has no corresponding model."
                );
            },
            other => panic!("expected embedded item, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_item_uses_fallback_regardless_of_type() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ResolverRegistry::new();
        for content_type in ["item", "component", "unknown", "tweet"] {
            let calls = Arc::clone(&calls);
            registry.register_fn(content_type, move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("strategy".to_string())
            });
        }

        let markup = format!("<p>a</p>{}<p>b</p>{}", object("ghost"), object("ghost"));
        let parser = RichTextParser::new(&registry);
        let first = parser.parse(source(), &markup, &LinkedItems::new()).unwrap();
        let second = parser.parse(source(), &markup, &LinkedItems::new()).unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let unresolved: Vec<_> = first
            .iter()
            .filter_map(|b| match b {
                Block::UnresolvedReference(r) => Some(r.content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            unresolved,
            ["Content type 'unknown' has no corresponding model."; 2]
        );
        assert_eq!(first.embedded_codenames().collect::<Vec<_>>(), ["ghost", "ghost"]);
    }

    #[test]
    fn test_embedded_item_splits_paragraph_in_order() {
        let markup = format!("<p>Before <strong>bold {} tail</strong> end</p>", object("x"));
        let doc = parse(&markup).unwrap();

        assert_eq!(doc.len(), 3);
        assert_eq!(text_of(&doc.blocks()[0]), "Before bold ");
        assert!(matches!(doc.blocks()[1], Block::UnresolvedReference(_)));
        let tail = doc.blocks()[2].as_text().unwrap();
        assert_eq!(tail.text, " tail end");
        assert_eq!(tail.spans[0].style, InlineStyle::Bold);
        assert_eq!(tail.span_text(&tail.spans[0]), Some(" tail"));

        let head = doc.blocks()[0].as_text().unwrap();
        assert_eq!(head.span_text(&head.spans[0]), Some("bold "));
    }

    #[test]
    fn test_embedded_item_in_table_cell_is_inlined() {
        let markup = format!("<table><tr><td>x {}</td></tr></table>", object("gone"));
        let doc = parse(&markup).unwrap();
        match &doc.blocks()[0] {
            Block::Table(table) => assert_eq!(
                table.rows[0][0],
                "x Content type 'unknown' has no corresponding model."
            ),
            other => panic!("expected table, got {other:?}"),
        }
    }

    #[test]
    fn test_strategy_failure_becomes_parse_error() {
        let mut registry = ResolverRegistry::new();
        registry.register_fn("quote", |_| Err(StrategyFailure::new("quote has no text")));
        let side_table = linked(vec![item("q1", "quote", &[])]);

        let markup = format!("<p>x</p>{}", object("q1"));
        let err = RichTextParser::new(&registry)
            .parse(source(), &markup, &side_table)
            .unwrap_err();

        assert_eq!(err.offset, 8);
        assert!(err.is_strategy_failure());
        assert!(err.to_string().contains("quote has no text"));
    }

    #[test]
    fn test_missing_codename_is_error() {
        let err = parse(r#"<p>x</p><object type="application/kenticocloud" data-type="item"></object>"#)
            .unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::MissingCodename));
        assert_eq!(err.offset, 8);
    }

    #[test]
    fn test_unmatched_close_reports_offset() {
        let err = parse("<p>Hello</p></p>").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnmatchedClose { ref name } if name == "p"));
        assert_eq!(err.offset, 12);
    }

    #[test]
    fn test_mismatched_close_reports_offset() {
        let err = parse("<p><em>x</em></strong></p>").unwrap_err();
        match err.kind {
            ParseErrorKind::MismatchedClose { expected, found } => {
                assert_eq!(expected, "p");
                assert_eq!(found, "strong");
            },
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.offset, 13);
    }

    #[test]
    fn test_unclosed_element_reports_open_offset() {
        let err = parse("<p>fine</p><h2>never closed").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Unclosed { ref name } if name == "h2"));
        assert_eq!(err.offset, 11);
    }

    #[test]
    fn test_unclosed_embedded_object() {
        let err = parse(r#"<object type="application/kenticocloud" data-codename="a">"#).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Unclosed { ref name } if name == "object"));
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn test_extra_close_after_void_element() {
        let err = parse("<p>a<br></p></p>").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnmatchedClose { ref name } if name == "p"));
        assert_eq!(err.offset, 12);

        let err = parse("<p>a<br/><img src=\"x.png\"></p></p>").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnmatchedClose { ref name } if name == "p"));
        assert_eq!(err.offset, 30);
    }

    #[test]
    fn test_mismatched_close_after_void_element() {
        let err = parse("<p>a<br></em></p>").unwrap_err();
        match err.kind {
            ParseErrorKind::MismatchedClose { expected, found } => {
                assert_eq!(expected, "p");
                assert_eq!(found, "em");
            },
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.offset, 8);
    }

    #[test]
    fn test_extra_close_after_embedded_object() {
        let embedded = object("x");
        let err = parse(&format!("{embedded}</p>")).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnmatchedClose { ref name } if name == "p"));
        assert_eq!(err.offset, embedded.len());

        let markup = format!("<p>x{embedded}</p></div>");
        let err = parse(&markup).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnmatchedClose { ref name } if name == "div"));
        assert_eq!(err.offset, markup.len() - "</div>".len());
    }

    #[test]
    fn test_plain_text_outside_blocks() {
        let doc = parse("loose <b>text</b><p>para</p>").unwrap();
        assert_eq!(doc.len(), 2);
        let loose = doc.blocks()[0].as_text().unwrap();
        assert_eq!(loose.kind, TextKind::Plain);
        assert_eq!(loose.text, "loose text");
        assert_eq!(loose.span_text(&loose.spans[0]), Some("text"));
    }

    #[test]
    fn test_blockquote_paragraph_is_quote() {
        let doc = parse("<blockquote><p>Said</p></blockquote>").unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.blocks()[0].as_text().unwrap().kind, TextKind::Quote);
    }

    fn structural_element() -> impl Strategy<Value = (String, String)> {
        (
            prop::sample::select(vec!["p", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote"]),
            "[a-zA-Z0-9 ]{0,12}",
        )
            .prop_map(|(tag, text)| (tag.to_string(), text))
    }

    proptest! {
        #[test]
        fn prop_balanced_elements_yield_one_block_each(elements in prop::collection::vec(structural_element(), 0..24)) {
            let calls = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&calls);
            let mut registry = ResolverRegistry::new();
            registry.register_fn("any", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            });

            let markup: String = elements
                .iter()
                .map(|(tag, text)| format!("<{tag}>{text}</{tag}>\n"))
                .collect();
            let doc = RichTextParser::new(&registry)
                .parse(source(), &markup, &LinkedItems::new())
                .unwrap();

            prop_assert_eq!(doc.len(), elements.len());
            for (block, (_, text)) in doc.iter().zip(&elements) {
                prop_assert_eq!(&block.as_text().unwrap().text, text);
            }
            prop_assert_eq!(calls.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn prop_extra_closing_marker_is_rejected(elements in prop::collection::vec(structural_element(), 1..8), cut in 0usize..8) {
            let cut = cut % elements.len();
            let mut markup = String::new();
            for (index, (tag, text)) in elements.iter().enumerate() {
                markup.push_str(&format!("<{tag}>{text}</{tag}>"));
                if index == cut {
                    let offset = markup.len();
                    markup.push_str(&format!("</{tag}>"));
                    let err = parse(&markup).unwrap_err();
                    prop_assert_eq!(err.offset, offset);
                    let is_unmatched = matches!(err.kind, ParseErrorKind::UnmatchedClose { .. });
                    prop_assert!(is_unmatched);
                    break;
                }
            }
        }
    }
}
