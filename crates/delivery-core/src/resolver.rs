//! Resolution strategies for items embedded in rich text.
//!
//! A [`ResolverRegistry`] maps content type codenames to
//! [`ResolutionStrategy`] values. Types without a strategy, and references to
//! items that were not delivered at all, go through the registry's
//! [`FallbackStrategy`], which cannot fail. The registry is built once and
//! then shared read-only, typically behind an `Arc`.
//!
//! ```rust
//! use delivery_core::{ElementValueStrategy, ResolverRegistry};
//!
//! let mut registry = ResolverRegistry::new();
//! registry
//!     .register("quote", ElementValueStrategy::new("text"))
//!     .register_fn("tweet", |item| Ok(format!("[tweet {}]", item.codename())));
//! assert!(registry.contains("tweet"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::{ContentItem, StrategyFailure};

/// Content type recorded for references whose item is missing from the
/// response, since the markup does not carry the real type.
pub const UNRETRIEVED_CONTENT_TYPE: &str = "unknown";

/// Placeholder for an embedded reference that has no model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnknownItemMarker {
    /// Codename of the referenced item.
    pub codename: String,
    /// Content type codename, or [`UNRETRIEVED_CONTENT_TYPE`].
    pub content_type: String,
}

impl UnknownItemMarker {
    /// Marker for an item that was delivered but whose type has no strategy.
    pub fn for_item(item: &ContentItem) -> Self {
        Self {
            codename: item.codename().to_string(),
            content_type: item.content_type().to_string(),
        }
    }

    /// Marker for a codename that is absent from the linked items.
    pub fn unretrieved(codename: impl Into<String>) -> Self {
        Self {
            codename: codename.into(),
            content_type: UNRETRIEVED_CONTENT_TYPE.to_string(),
        }
    }
}

/// Converts an embedded item into its substitution string.
pub trait ResolutionStrategy: Send + Sync {
    /// Resolve `item`. A failure aborts the parse that requested it.
    fn resolve(&self, item: &ContentItem) -> Result<String, StrategyFailure>;
}

impl<F> ResolutionStrategy for F
where
    F: Fn(&ContentItem) -> Result<String, StrategyFailure> + Send + Sync,
{
    fn resolve(&self, item: &ContentItem) -> Result<String, StrategyFailure> {
        self(item)
    }
}

/// Resolves references that have no registered strategy. Must be total.
pub trait FallbackStrategy: Send + Sync {
    /// Produce a diagnostic for `marker`.
    fn resolve(&self, marker: &UnknownItemMarker) -> String;
}

/// Default fallback: a readable warning naming the missing content type.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingModelWarning;

impl FallbackStrategy for MissingModelWarning {
    fn resolve(&self, marker: &UnknownItemMarker) -> String {
        format!(
            "Content type '{}' has no corresponding model.",
            marker.content_type
        )
    }
}

/// Resolves an item to the string value of one of its elements.
#[derive(Debug, Clone)]
pub struct ElementValueStrategy {
    element: String,
}

impl ElementValueStrategy {
    /// Strategy reading the `element` element.
    pub fn new(element: impl Into<String>) -> Self {
        Self {
            element: element.into(),
        }
    }
}

impl ResolutionStrategy for ElementValueStrategy {
    fn resolve(&self, item: &ContentItem) -> Result<String, StrategyFailure> {
        item.text(&self.element).map(str::to_string).ok_or_else(|| {
            StrategyFailure::new(format!(
                "item '{}' has no text element '{}'",
                item.codename(),
                self.element
            ))
        })
    }
}

/// Lookup table from content type codename to resolution strategy.
#[derive(Clone)]
pub struct ResolverRegistry {
    strategies: HashMap<String, Arc<dyn ResolutionStrategy>>,
    fallback: Arc<dyn FallbackStrategy>,
}

impl ResolverRegistry {
    /// Empty registry using [`MissingModelWarning`] as fallback.
    pub fn new() -> Self {
        Self {
            strategies: HashMap::new(),
            fallback: Arc::new(MissingModelWarning),
        }
    }

    /// Replace the fallback strategy.
    #[must_use]
    pub fn with_fallback(mut self, fallback: impl FallbackStrategy + 'static) -> Self {
        self.fallback = Arc::new(fallback);
        self
    }

    /// Register `strategy` for `content_type`, replacing any earlier one.
    pub fn register(
        &mut self,
        content_type: impl Into<String>,
        strategy: impl ResolutionStrategy + 'static,
    ) -> &mut Self {
        let content_type = content_type.into();
        if self
            .strategies
            .insert(content_type.clone(), Arc::new(strategy))
            .is_some()
        {
            debug!(content_type = %content_type, "Replaced resolution strategy");
        }
        self
    }

    /// Register a closure for `content_type`, replacing any earlier strategy.
    pub fn register_fn<F>(&mut self, content_type: impl Into<String>, strategy: F) -> &mut Self
    where
        F: Fn(&ContentItem) -> Result<String, StrategyFailure> + Send + Sync + 'static,
    {
        self.register(content_type, strategy)
    }

    /// Whether a strategy is registered for `content_type`.
    pub fn contains(&self, content_type: &str) -> bool {
        self.strategies.contains_key(content_type)
    }

    /// Number of registered strategies.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether no strategy is registered.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Resolve a delivered item through the strategy for its content type,
    /// or through the fallback if there is none.
    pub fn resolve(&self, item: &ContentItem) -> Result<String, StrategyFailure> {
        match self.strategies.get(item.content_type()) {
            Some(strategy) => strategy.resolve(item),
            None => {
                debug!(
                    codename = item.codename(),
                    content_type = item.content_type(),
                    "No resolution strategy registered, using fallback"
                );
                Ok(self.fallback.resolve(&UnknownItemMarker::for_item(item)))
            },
        }
    }

    /// Resolve a marker through the fallback.
    pub fn resolve_unknown(&self, marker: &UnknownItemMarker) -> String {
        self.fallback.resolve(marker)
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.strategies.keys().collect();
        types.sort();
        f.debug_struct("ResolverRegistry")
            .field("content_types", &types)
            .finish_non_exhaustive()
    }
}
