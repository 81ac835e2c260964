//! # delivery-core
//!
//! Typed client for a headless CMS content delivery API, with rich-text
//! parsing and resilient request execution.
//!
//! Rich-text element values arrive as HTML-like markup in which other content
//! items are embedded by reference. This crate turns that markup into an
//! ordered list of typed blocks, replacing each embedded reference with the
//! output of a per-content-type resolution strategy, and fetches the content
//! itself under a configurable retry policy.
//!
//! ## Architecture
//!
//! - **Block model**: [`RichTextDocument`] and [`Block`], the immutable parse
//!   output
//! - **Resolver registry**: [`ResolverRegistry`] maps content types to
//!   [`ResolutionStrategy`] values, with a fallback for unknown types
//! - **Rich-text parser**: [`RichTextParser`] tokenizes markup and builds
//!   blocks in one pass over the tokens
//! - **Retry policy**: [`RetryPolicy`] and the default [`ExponentialBackoff`]
//! - **Resilient invoker**: [`Invoker`] runs a call under a policy with
//!   cancellation
//! - **Client**: [`DeliveryClient`] fetches items over HTTP and parses their
//!   rich-text elements
//!
//! ## Quick Start
//!
//! ```rust
//! use delivery_core::{
//!     ContentItemReference, ElementValueStrategy, LinkedItems, ResolverRegistry, RichTextParser,
//! };
//!
//! let mut registry = ResolverRegistry::new();
//! registry.register("quote", ElementValueStrategy::new("text"));
//!
//! let parser = RichTextParser::new(&registry);
//! let doc = parser.parse(
//!     ContentItemReference::new("article", "body"),
//!     "<h1>Brewing</h1><p>Use <strong>fresh</strong> beans.</p>",
//!     &LinkedItems::new(),
//! )?;
//!
//! for block in &doc {
//!     println!("{}", block.kind_name());
//! }
//! # Ok::<(), delivery_core::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Operations return [`Result<T, Error>`]. Remote failures keep enough context
//! to tell a rejected request from an unreachable server:
//!
//! ```rust,no_run
//! use delivery_core::{DeliveryClient, DeliveryConfig, Error, ResolverRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> delivery_core::Result<()> {
//! let client = DeliveryClient::new(DeliveryConfig::load()?, ResolverRegistry::new())?;
//! match client.get_item("home", &CancellationToken::new()).await {
//!     Ok(response) => println!("{}", response.item.system.name),
//!     Err(Error::NotFound(msg)) => eprintln!("{msg}"),
//!     Err(e) if e.is_recoverable() => eprintln!("Try again later: {e}"),
//!     Err(e) => eprintln!("Failed ({}): {e}", e.category()),
//! }
//! # Ok(())
//! # }
//! ```

/// Typed block model of parsed rich text
pub mod blocks;
/// Delivery API client
pub mod client;
/// Client configuration
pub mod config;
/// Error types and result aliases
pub mod error;
/// Retrying execution of remote calls
pub mod invoker;
/// Resolution strategies for embedded items
pub mod resolver;
/// Retry policies
pub mod retry;
/// Rich-text markup parser
pub mod rich_text;
/// HTTP transport
pub mod transport;
/// Delivery API wire types
pub mod types;

// Re-export commonly used types
pub use blocks::{
    Block, ContentItemReference, EmbeddedItem, EmbeddedRelation, Image, InlineSpan, InlineStyle,
    Link, LinkTarget, RichTextDocument, Table, TextKind, TextRun, UnresolvedReference,
};
pub use client::DeliveryClient;
pub use config::DeliveryConfig;
pub use error::{
    AttemptFailure, CancellationFailure, Error, FailureKind, InvokeError, ParseError,
    ParseErrorKind, Result, StrategyFailure, TerminalFailure, TransportError, classify_status,
};
pub use invoker::{Invoker, StatusClassifier};
pub use resolver::{
    ElementValueStrategy, FallbackStrategy, MissingModelWarning, ResolutionStrategy,
    ResolverRegistry, UnknownItemMarker,
};
pub use retry::{
    ExponentialBackoff, JitterSource, NoJitter, RetryAttemptContext, RetryConfig, RetryDecision,
    RetryPolicy, SeededJitter,
};
pub use rich_text::RichTextParser;
pub use transport::{DeliveryRequest, RawResponse, ReqwestTransport, Transport};
pub use types::*;
