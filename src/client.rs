//! The caller-facing client: non-streaming and streaming pipelines.
//!
//! `generate` runs encode → build/sign → HTTP round trip → decode under the
//! retry middleware; `stream` attaches the provider's frame codec to an open
//! response and hands back a chunk sequence plus a concurrently resolvable
//! metadata future. Each call resolves its model snapshot and credentials up
//! front and shares no mutable state with any other call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{AdapterRegistry, ChatRequest, ProviderAdapter, ProviderRequest};
use crate::auth::{Credentials, resolve_credentials};
use crate::catalog::ModelCatalog;
use crate::error::LlmError;
use crate::params;
use crate::retry::{RetryPolicy, run_with_retry};
use crate::streaming::{StreamHandle, run_stream};
use crate::types::{ChatContext, ChatResponse, GenerationOptions, ProviderId};

/// Transport timeouts, caller-configurable per client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    /// Whole-request ceiling for non-streaming calls, per attempt.
    pub request_timeout: Duration,
    /// Ceiling on the gap between two reads of an open stream.
    pub stream_read_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
            stream_read_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    catalog: Option<Arc<dyn ModelCatalog>>,
    registry: AdapterRegistry,
    retry: RetryPolicy,
    credentials: HashMap<ProviderId, Credentials>,
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            catalog: None,
            registry: AdapterRegistry::with_defaults(),
            retry: RetryPolicy::default(),
            credentials: HashMap::new(),
            config: ClientConfig::default(),
        }
    }

    pub fn catalog(mut self, catalog: Arc<dyn ModelCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Replaces the default adapter registry.
    pub fn registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers one additional adapter.
    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.registry.register(adapter);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Default credential for a provider, used when neither the call nor the
    /// environment supplies one.
    pub fn credentials(mut self, provider: ProviderId, credentials: Credentials) -> Self {
        self.credentials.insert(provider, credentials);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Client, LlmError> {
        let catalog = self.catalog.ok_or_else(|| {
            LlmError::ConfigurationError("a model catalog is required".to_string())
        })?;
        let http = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .build()
            .map_err(|e| LlmError::ConfigurationError(format!("HTTP client: {e}")))?;
        Ok(Client {
            http,
            catalog,
            registry: self.registry,
            retry: self.retry,
            credentials: self.credentials,
            config: self.config,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Provider-agnostic LLM client.
pub struct Client {
    http: reqwest::Client,
    catalog: Arc<dyn ModelCatalog>,
    registry: AdapterRegistry,
    retry: RetryPolicy,
    credentials: HashMap<ProviderId, Credentials>,
    config: ClientConfig,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Resolves model, options, adapter, and credentials for one call.
    fn prepare(
        &self,
        provider: ProviderId,
        model_id: &str,
        context: ChatContext,
        options: &GenerationOptions,
        credentials: Option<&Credentials>,
        stream: bool,
    ) -> Result<(ChatRequest, Arc<dyn ProviderAdapter>, Credentials), LlmError> {
        if !self.catalog.is_allowed(provider, model_id) {
            return Err(LlmError::ModelNotAllowed(format!("{provider}/{model_id}")));
        }
        let model = self
            .catalog
            .resolve(provider, model_id)
            .ok_or_else(|| LlmError::ModelNotFound(format!("{provider}/{model_id}")))?;

        let (translated, warnings) = params::translate(&model, &context, options, stream)?;
        for warning in &warnings {
            tracing::warn!(provider = %provider, model = %model_id, ?warning, "option translation warning");
        }

        let adapter = self.registry.get(provider)?;
        let resolved = resolve_credentials(&model, credentials, self.credentials.get(&provider))?;

        Ok((
            ChatRequest {
                model,
                context,
                options: translated,
                stream,
            },
            adapter,
            resolved,
        ))
    }

    async fn send(
        http: &reqwest::Client,
        request: ProviderRequest,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, LlmError> {
        let mut builder = http
            .request(request.method, request.url)
            .headers(request.headers)
            .body(request.body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.send().await?)
    }

    /// Non-streaming call: one HTTP round trip per attempt, a fully
    /// populated [`ChatResponse`] on success.
    pub async fn generate(
        &self,
        provider: ProviderId,
        model_id: &str,
        context: ChatContext,
        options: GenerationOptions,
    ) -> Result<ChatResponse, LlmError> {
        self.generate_with(provider, model_id, context, options, None)
            .await
    }

    /// As [`Client::generate`], with an explicit per-call credential.
    pub async fn generate_with(
        &self,
        provider: ProviderId,
        model_id: &str,
        context: ChatContext,
        options: GenerationOptions,
        credentials: Option<&Credentials>,
    ) -> Result<ChatResponse, LlmError> {
        let (request, adapter, resolved) =
            self.prepare(provider, model_id, context, &options, credentials, false)?;
        let trace_id = uuid::Uuid::new_v4();
        tracing::debug!(%trace_id, provider = %provider, model = %model_id, "generate");

        let response = run_with_retry(
            || {
                let adapter = adapter.clone();
                let request = request.clone();
                let resolved = resolved.clone();
                let http = self.http.clone();
                let timeout = self.config.request_timeout;
                async move {
                    // Rebuilt per attempt so signed requests stay inside
                    // their signature validity window.
                    let body = adapter.encode(&request)?;
                    let transport_request = adapter.build_request(&request, body, &resolved)?;
                    let response = Self::send(&http, transport_request, Some(timeout)).await?;
                    let status = response.status().as_u16();
                    let headers = response.headers().clone();
                    let bytes = response.bytes().await?;
                    adapter.decode(&request, status, &headers, &bytes)
                }
            },
            |error, attempt| adapter.classify_retry(error, attempt, &self.retry),
        )
        .await?;

        tracing::debug!(
            %trace_id,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "generate complete"
        );
        Ok(response)
    }

    /// Streaming call: returns the chunk sequence and the metadata future.
    ///
    /// Fails before returning the handle on setup problems (translation,
    /// signing, connect errors, non-2xx status); once the handle exists,
    /// failures arrive as a terminal error element on the chunk sequence.
    pub async fn stream(
        &self,
        provider: ProviderId,
        model_id: &str,
        context: ChatContext,
        options: GenerationOptions,
    ) -> Result<StreamHandle, LlmError> {
        self.stream_with(provider, model_id, context, options, None)
            .await
    }

    /// As [`Client::stream`], with an explicit per-call credential.
    pub async fn stream_with(
        &self,
        provider: ProviderId,
        model_id: &str,
        context: ChatContext,
        options: GenerationOptions,
        credentials: Option<&Credentials>,
    ) -> Result<StreamHandle, LlmError> {
        let (request, adapter, resolved) =
            self.prepare(provider, model_id, context, &options, credentials, true)?;
        let trace_id = uuid::Uuid::new_v4();
        tracing::debug!(%trace_id, provider = %provider, model = %model_id, "stream");

        let response = run_with_retry(
            || {
                let adapter = adapter.clone();
                let request = request.clone();
                let resolved = resolved.clone();
                let http = self.http.clone();
                async move {
                    let transport_request = adapter.attach_stream(&request, &resolved)?;
                    let response = Self::send(&http, transport_request, None).await?;
                    let status = response.status().as_u16();
                    if !response.status().is_success() {
                        let headers = response.headers().clone();
                        let bytes = response.bytes().await?;
                        // decode classifies the non-2xx status and body.
                        return match adapter.decode(&request, status, &headers, &bytes) {
                            Ok(_) => Err(LlmError::InternalError(
                                "adapter decoded a failed status as success".to_string(),
                            )),
                            Err(error) => Err(error),
                        };
                    }
                    Ok(response)
                }
            },
            |error, attempt| adapter.classify_retry(error, attempt, &self.retry),
        )
        .await?;

        Ok(run_stream(
            response,
            adapter.event_decoder(),
            adapter.frame_protocol(),
            self.config.stream_read_timeout,
        ))
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
