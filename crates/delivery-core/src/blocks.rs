//! Typed block model for parsed rich-text elements.
//!
//! A [`RichTextDocument`] is a flat, ordered list of [`Block`]s. Nested markup
//! is flattened: list items carry their depth, table cells their text, and a
//! paragraph interrupted by an embedded item is split around it so that the
//! block order always equals document order.
//!
//! Documents are plain data. They can be iterated any number of times and no
//! operation on them can fail.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Identifies the rich-text element a document was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentItemReference {
    /// Codename of the content item owning the element.
    pub item_codename: String,
    /// Codename of the rich-text element.
    pub element_codename: String,
}

impl ContentItemReference {
    /// Create a reference to `item_codename`'s `element_codename` element.
    pub fn new(item_codename: impl Into<String>, element_codename: impl Into<String>) -> Self {
        Self {
            item_codename: item_codename.into(),
            element_codename: element_codename.into(),
        }
    }
}

impl fmt::Display for ContentItemReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.item_codename, self.element_codename)
    }
}

/// A parsed rich-text element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichTextDocument {
    source: ContentItemReference,
    blocks: Vec<Block>,
}

impl RichTextDocument {
    /// Wrap already-parsed blocks.
    pub const fn new(source: ContentItemReference, blocks: Vec<Block>) -> Self {
        Self { source, blocks }
    }

    /// The element this document was parsed from.
    pub const fn source(&self) -> &ContentItemReference {
        &self.source
    }

    /// Blocks in document order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Iterate over the blocks in document order.
    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.blocks.iter()
    }

    /// Number of blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the document has no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Codenames of every embedded reference, resolved or not, in order.
    pub fn embedded_codenames(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|block| match block {
            Block::EmbeddedItem(item) => Some(item.codename.as_str()),
            Block::UnresolvedReference(reference) => Some(reference.codename.as_str()),
            _ => None,
        })
    }

    /// Consume the document, returning its blocks.
    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }
}

impl<'a> IntoIterator for &'a RichTextDocument {
    type Item = &'a Block;
    type IntoIter = std::slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}

/// One block of a rich-text document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// Paragraph, heading, list item or other run of formatted text.
    TextRun(TextRun),
    /// Inline image or asset figure.
    Image(Image),
    /// Anchor that appeared outside any text block.
    Link(Link),
    /// Table with plain-text cells.
    Table(Table),
    /// Embedded content item or component, resolved by a strategy.
    EmbeddedItem(EmbeddedItem),
    /// Embedded reference whose item was not delivered with the response.
    UnresolvedReference(UnresolvedReference),
}

impl Block {
    /// Short lowercase name of the variant.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::TextRun(_) => "text",
            Self::Image(_) => "image",
            Self::Link(_) => "link",
            Self::Table(_) => "table",
            Self::EmbeddedItem(_) => "embedded",
            Self::UnresolvedReference(_) => "unresolved",
        }
    }

    /// The text run, if this is one.
    pub const fn as_text(&self) -> Option<&TextRun> {
        match self {
            Self::TextRun(run) => Some(run),
            _ => None,
        }
    }
}

/// Kind of element a text run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TextKind {
    /// `<p>`
    Paragraph,
    /// `<h1>`..`<h6>`
    Heading {
        /// 1 through 6.
        level: u8,
    },
    /// `<li>`
    ListItem {
        /// Whether the nearest enclosing list is `<ol>`.
        ordered: bool,
        /// Nesting depth, 1 for a top-level list.
        depth: u8,
    },
    /// `<pre>`
    Preformatted,
    /// `<blockquote>`
    Quote,
    /// Text found outside any block element.
    Plain,
}

/// Formatted text with inline style spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRun {
    /// Source element kind.
    pub kind: TextKind,
    /// Text with all markup removed and entities decoded.
    pub text: String,
    /// Inline styles, ordered by the position their element closed.
    pub spans: Vec<InlineSpan>,
}

impl TextRun {
    /// Text covered by `span`, or `None` if the span does not belong to
    /// this run.
    pub fn span_text(&self, span: &InlineSpan) -> Option<&str> {
        self.text.get(span.range.clone())
    }
}

/// An inline style applied to a byte range of a [`TextRun`]'s text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineSpan {
    /// Style applied.
    pub style: InlineStyle,
    /// Byte range into [`TextRun::text`].
    pub range: Range<usize>,
}

/// Inline formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum InlineStyle {
    /// `<strong>`, `<b>`
    Bold,
    /// `<em>`, `<i>`
    Italic,
    /// `<sup>`
    Superscript,
    /// `<sub>`
    Subscript,
    /// `<code>`
    Code,
    /// `<a>`
    Link(LinkTarget),
}

/// Destination of a hyperlink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTarget {
    /// `href`, empty for item links that the server left unresolved.
    pub href: String,
    /// `data-item-id` when the link points at another content item.
    pub item_id: Option<String>,
}

/// Image block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// `src` of the image.
    pub url: String,
    /// Alternative text.
    pub alt: String,
    /// `data-asset-id` when the image is an asset.
    pub asset_id: Option<String>,
}

/// Anchor found at block level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Where the link points.
    pub target: LinkTarget,
    /// Link text.
    pub text: String,
}

/// Table block; every row holds the text of its cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Rows in document order.
    pub rows: Vec<Vec<String>>,
}

/// How an embedded item relates to the element containing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddedRelation {
    /// A component that only exists inside this element (`data-rel="component"`).
    Component,
    /// A standalone content item linked into the element.
    LinkedItem,
}

/// Embedded item replaced by the output of its resolution strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedItem {
    /// Codename of the embedded item.
    pub codename: String,
    /// Content type of the embedded item.
    pub content_type: String,
    /// Component or linked item.
    pub relation: EmbeddedRelation,
    /// Resolved substitution string.
    pub content: String,
}

/// Embedded reference to an item missing from the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    /// Codename named by the markup.
    pub codename: String,
    /// Fallback diagnostic produced for the reference.
    pub content: String,
}
