//! Wire types of the delivery API.
//!
//! Only the fields the SDK needs are modelled; unknown fields are ignored so
//! new server-side additions do not break deserialization.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ContentItemReference, Error, Result};

/// Element type string of rich-text elements.
pub const RICH_TEXT_ELEMENT: &str = "rich_text";

/// Side-table of items delivered alongside a response, keyed by codename.
pub type LinkedItems = HashMap<String, ContentItem>;

/// A content item with its system metadata and element values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// System metadata.
    pub system: ItemSystem,
    /// Element values keyed by element codename.
    #[serde(default)]
    pub elements: BTreeMap<String, Element>,
}

/// System metadata of a content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSystem {
    /// Item id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Codename, unique per environment.
    pub codename: String,
    /// Language codename.
    #[serde(default)]
    pub language: String,
    /// Content type codename.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Collection codename.
    #[serde(default)]
    pub collection: Option<String>,
    /// Last modification time.
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

/// One element value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Element type, for example `text` or `rich_text`.
    #[serde(rename = "type")]
    pub element_type: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Raw value; a string for text and rich-text elements.
    #[serde(default)]
    pub value: serde_json::Value,
    /// Codenames of items embedded in a rich-text element.
    #[serde(default)]
    pub modular_content: Vec<String>,
}

impl ContentItem {
    /// Codename of the item.
    pub fn codename(&self) -> &str {
        &self.system.codename
    }

    /// Content type codename of the item.
    pub fn content_type(&self) -> &str {
        &self.system.content_type
    }

    /// Element by codename.
    pub fn element(&self, codename: &str) -> Option<&Element> {
        self.elements.get(codename)
    }

    /// String value of an element, if it exists and holds a string.
    pub fn text(&self, codename: &str) -> Option<&str> {
        self.element(codename).and_then(|e| e.value.as_str())
    }

    /// Markup of a rich-text element together with the reference identifying
    /// it.
    pub fn rich_text_markup(&self, element: &str) -> Result<(&str, ContentItemReference)> {
        let value = self.element(element).ok_or_else(|| {
            Error::NotFound(format!(
                "Item '{}' has no element '{element}'",
                self.codename()
            ))
        })?;

        if value.element_type != RICH_TEXT_ELEMENT {
            return Err(Error::Other(format!(
                "Element '{element}' of item '{}' is {}, not {RICH_TEXT_ELEMENT}",
                self.codename(),
                value.element_type
            )));
        }

        let markup = value.value.as_str().ok_or_else(|| {
            Error::Serialization(format!(
                "Rich-text element '{element}' of item '{}' has a non-string value",
                self.codename()
            ))
        })?;

        Ok((markup, ContentItemReference::new(self.codename(), element)))
    }
}

/// Response of a single-item request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResponse {
    /// The requested item.
    pub item: ContentItem,
    /// Items referenced by the requested item, up to the requested depth.
    #[serde(default)]
    pub modular_content: LinkedItems,
}

/// Response of an item listing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemListingResponse {
    /// Items on this page.
    pub items: Vec<ContentItem>,
    /// Items referenced by any item on this page.
    #[serde(default)]
    pub modular_content: LinkedItems,
    /// Paging information.
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Paging information of a listing response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Items skipped.
    pub skip: u64,
    /// Page size limit, 0 when unlimited.
    pub limit: u64,
    /// Items on this page.
    pub count: u64,
    /// Total matching items, when requested.
    #[serde(default)]
    pub total_count: Option<u64>,
    /// URL of the next page, empty on the last page.
    #[serde(default)]
    pub next_page: String,
}
