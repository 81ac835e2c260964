//! Delivery API client.
//!
//! [`DeliveryClient`] ties the pieces together: requests go out through a
//! [`Transport`] under the [`Invoker`]'s retry policy, responses are
//! deserialized into the wire types, and rich-text elements are parsed with
//! the client's [`ResolverRegistry`] using the response's linked items.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use url::Url;

use crate::config::DeliveryConfig;
use crate::error::{InvokeError, TerminalFailure};
use crate::invoker::Invoker;
use crate::resolver::ResolverRegistry;
use crate::rich_text::RichTextParser;
use crate::transport::{DeliveryRequest, ReqwestTransport, Transport};
use crate::types::{ItemListingResponse, ItemResponse};
use crate::{Error, Result, RichTextDocument};

/// SDK tracking header sent with every request.
pub const SDK_ID_HEADER: &str = "X-KC-SDKID";
/// Header asking the API to wait for freshly published content.
pub const WAIT_FOR_NEW_CONTENT_HEADER: &str = "X-KC-Wait-For-Loading-New-Content";

const SDK_ID: &str = concat!("crates.io;delivery-core;", env!("CARGO_PKG_VERSION"));

/// Client for the delivery API.
///
/// Cheap to clone; clones share the transport, retry policy and registry.
#[derive(Clone)]
pub struct DeliveryClient {
    config: Arc<DeliveryConfig>,
    transport: Arc<dyn Transport>,
    invoker: Invoker,
    registry: Arc<ResolverRegistry>,
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("environment_id", &self.config.environment_id)
            .field("base_url", &self.config.active_base_url())
            .field("invoker", &self.invoker)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl DeliveryClient {
    /// Client using a `reqwest` transport and the retry settings of `config`.
    pub fn new(config: DeliveryConfig, registry: ResolverRegistry) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::with_timeout(config.timeout())?;
        let invoker = Invoker::from_config(config.retry.clone());
        Ok(Self::with_transport(config, registry, Arc::new(transport), invoker))
    }

    /// Client with an explicit transport and invoker.
    pub fn with_transport(
        config: DeliveryConfig,
        registry: ResolverRegistry,
        transport: Arc<dyn Transport>,
        invoker: Invoker,
    ) -> Self {
        Self {
            config: Arc::new(config),
            transport,
            invoker,
            registry: Arc::new(registry),
        }
    }

    /// The client's configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// The registry used for rich-text resolution.
    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    /// Fetch one item with its linked items.
    #[instrument(skip(self, cancel), fields(environment = %self.config.environment_id))]
    pub async fn get_item(&self, codename: &str, cancel: &CancellationToken) -> Result<ItemResponse> {
        let mut url = self.endpoint(&["items", codename])?;
        if let Some(depth) = self.config.depth {
            url.query_pairs_mut().append_pair("depth", &depth.to_string());
        }
        self.fetch_json(url, cancel).await
    }

    /// Fetch a page of items. `query` pairs are passed through unchanged.
    #[instrument(skip(self, cancel), fields(environment = %self.config.environment_id))]
    pub async fn get_items(
        &self,
        query: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<ItemListingResponse> {
        let mut url = self.endpoint(&["items"])?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(depth) = self.config.depth {
                pairs.append_pair("depth", &depth.to_string());
            }
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        self.fetch_json(url, cancel).await
    }

    /// Parse rich-text `element` of the response's item.
    pub fn rich_text(&self, response: &ItemResponse, element: &str) -> Result<RichTextDocument> {
        let (markup, source) = response.item.rich_text_markup(element)?;
        let document =
            RichTextParser::new(&self.registry).parse(source, markup, &response.modular_content)?;
        Ok(document)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(self.config.active_base_url())?;
        url.path_segments_mut()
            .map_err(|()| {
                Error::InvalidUrl(format!(
                    "{} cannot be a base URL",
                    self.config.active_base_url()
                ))
            })?
            .pop_if_empty()
            .push(&self.config.environment_id)
            .extend(segments);
        Ok(url)
    }

    fn request(&self, url: &Url) -> DeliveryRequest {
        let mut request = DeliveryRequest::get(url.as_str()).header(SDK_ID_HEADER, SDK_ID);
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        if self.config.wait_for_loading_new_content {
            request = request.header(WAIT_FOR_NEW_CONTENT_HEADER, "true");
        }
        request
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: Url, cancel: &CancellationToken) -> Result<T> {
        let request = self.request(&url);

        let response = self
            .invoker
            .execute(|| self.transport.send(&request), cancel)
            .await
            .map_err(|err| not_found_or(err, &url))?;

        info!("Fetched {} bytes from {}", response.body.len(), url);
        serde_json::from_str(&response.body).map_err(|e| {
            Error::Serialization(format!("Unexpected response from {url}: {e}"))
        })
    }
}

fn not_found_or(err: InvokeError, url: &Url) -> Error {
    match err {
        InvokeError::Terminal(TerminalFailure { last, .. }) if last.status() == Some(404) => {
            Error::NotFound(format!("Nothing found at '{url}'. Check the codename and environment id"))
        },
        other => other.into(),
    }
}
