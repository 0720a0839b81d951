//! Backend -> transducer -> emitter composition.
//!
//! One [`ResponseStream`] serves one response. It owns the backend stream,
//! the transducer and the emitter, and pulls a delta only when the consumer
//! asks for more events. Dropping it drops the backend stream, which cancels
//! the upstream request.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::response::Response;
use futures_util::{Stream, StreamExt};

use crate::backend::ChatBackend;
use crate::budget::{check_context_budget, ContextBudget};
use crate::config::{AppConfig, ContextBudgetConfig};
use crate::dialect::{DialectMarker, DialectRegistry};
use crate::emitter::{CollectedResponse, Emitter, OutputEvent, ResponseCollector};
use crate::observability::log_response_complete;
use crate::protocol::canonical::{CanonicalRequest, CanonicalUsage, IngressApi};
use crate::stream::{Decision, Decisions, DeltaStream, Transducer};

/// Response header carrying the context budget status, when it warns.
pub const CONTEXT_BUDGET_HEADER: &str = "x-context-budget";

/// Per-request settings resolved before the backend is contacted.
struct Prepared {
    marker: Option<&'static DialectMarker>,
    budget: Option<ContextBudget>,
}

/// Serves requests against one backend.
#[derive(Debug)]
pub struct Pipeline<B> {
    backend: B,
    registry: DialectRegistry,
    budget: ContextBudgetConfig,
    default_max_tokens: u64,
}

impl<B: ChatBackend> Pipeline<B> {
    #[must_use]
    pub fn new(backend: B, config: &AppConfig) -> Self {
        Self {
            backend,
            registry: DialectRegistry::from_config(&config.dialects),
            budget: config.context_budget,
            default_max_tokens: config.backend.max_tokens,
        }
    }

    #[must_use]
    pub fn with_registry(
        backend: B,
        registry: DialectRegistry,
        budget: ContextBudgetConfig,
        default_max_tokens: u64,
    ) -> Self {
        Self {
            backend,
            registry,
            budget,
            default_max_tokens,
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn prepare(&self, request: &CanonicalRequest) -> Prepared {
        let dialect = self.registry.select(&request.model);
        tracing::debug!(
            model = %request.model,
            dialect = dialect.map_or("none", |d| d.label()),
            "dialect selected"
        );
        let budget = self
            .budget
            .enabled
            .then(|| check_context_budget(request, &self.budget, self.default_max_tokens));
        Prepared {
            marker: dialect.map(|dialect| self.registry.marker(dialect)),
            budget,
        }
    }

    /// Open the backend and return the response as a lazy event stream.
    ///
    /// Never fails: a backend that cannot be opened yields a response made of
    /// one error notice with normal framing.
    pub async fn stream(&self, request: &CanonicalRequest, protocol: IngressApi) -> ResponseStream {
        let started = Instant::now();
        let prepared = self.prepare(request);
        let mut emitter = Emitter::new(protocol, request.model.clone());
        let mut pending = Vec::new();

        let warning = prepared.budget.as_ref().and_then(ContextBudget::warning_message);
        if let Some(warning) = &warning {
            emitter.advisory_into(warning, &mut pending);
        }

        let deltas = match self.backend.open(request).await {
            Ok(deltas) => Some(deltas),
            Err(err) => {
                tracing::error!(error = %err, model = %request.model, "failed to open backend stream");
                emitter.backend_error_into(&err, &mut pending);
                log_response_complete(&request.model, &CanonicalUsage::default(), started);
                None
            }
        };

        ResponseStream {
            deltas,
            transducer: Transducer::new(prepared.marker),
            emitter,
            pending: pending.into(),
            scratch: Vec::new(),
            model: request.model.clone(),
            started,
            budget_status: prepared.budget.as_ref().and_then(ContextBudget::status),
        }
    }

    /// Run the whole pipeline and materialize one response.
    pub async fn complete(
        &self,
        request: &CanonicalRequest,
        protocol: IngressApi,
    ) -> CollectedResponse {
        let started = Instant::now();
        let prepared = self.prepare(request);
        let mut collector = ResponseCollector::new(protocol, request.model.clone());

        if let Some(warning) = prepared.budget.as_ref().and_then(ContextBudget::warning_message) {
            collector.advisory(&warning);
        }

        let mut deltas = match self.backend.open(request).await {
            Ok(deltas) => deltas,
            Err(err) => {
                tracing::error!(error = %err, model = %request.model, "failed to open backend stream");
                collector.backend_error(&err);
                log_response_complete(&request.model, &CanonicalUsage::default(), started);
                return collector.into_response();
            }
        };

        let mut transducer = Transducer::new(prepared.marker);
        let usage = loop {
            let decisions = match deltas.next().await {
                Some(Ok(delta)) => transducer.consume(delta),
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "backend stream interrupted");
                    transducer.interrupt(&err)
                }
                None => transducer.finish(),
            };
            let mut terminal = None;
            for decision in decisions {
                if let Some(usage) = terminal_usage(&decision) {
                    terminal = Some(usage);
                }
                collector.apply(decision);
            }
            if let Some(usage) = terminal {
                break usage;
            }
        };
        log_response_complete(&request.model, &usage, started);
        collector.into_response()
    }
}

fn terminal_usage(decision: &Decision) -> Option<CanonicalUsage> {
    match decision {
        Decision::Finish { usage, .. } | Decision::Interrupted { usage, .. } => Some(*usage),
        Decision::Emit(_) | Decision::EmitToolCalls(_) => None,
    }
}

// ---------------------------------------------------------------------------
// Streaming response
// ---------------------------------------------------------------------------

/// Protocol events of one response, produced on demand.
pub struct ResponseStream {
    /// `None` once the backend stream has ended, failed or never opened.
    deltas: Option<DeltaStream>,
    transducer: Transducer,
    emitter: Emitter,
    pending: VecDeque<OutputEvent>,
    scratch: Vec<OutputEvent>,
    model: String,
    started: Instant,
    budget_status: Option<String>,
}

impl ResponseStream {
    /// Response id shared by every event.
    #[must_use]
    pub fn id(&self) -> &str {
        self.emitter.id()
    }

    /// Compact context budget status, present only when it warns.
    #[must_use]
    pub fn budget_status(&self) -> Option<&str> {
        self.budget_status.as_deref()
    }

    fn render(&mut self, decisions: Decisions) {
        for decision in decisions {
            if let Some(usage) = terminal_usage(&decision) {
                log_response_complete(&self.model, &usage, self.started);
            }
            self.emitter.apply_into(decision, &mut self.scratch);
        }
        self.pending.extend(self.scratch.drain(..));
    }
}

impl Stream for ResponseStream {
    type Item = OutputEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            let Some(deltas) = this.deltas.as_mut() else {
                return Poll::Ready(None);
            };
            let decisions = match deltas.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(delta))) => this.transducer.consume(delta),
                Poll::Ready(Some(Err(err))) => {
                    tracing::warn!(error = %err, model = %this.model, "backend stream interrupted");
                    this.deltas = None;
                    this.transducer.interrupt(&err)
                }
                Poll::Ready(None) => {
                    this.deltas = None;
                    this.transducer.finish()
                }
            };
            this.render(decisions);
        }
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        if self.deltas.is_some() {
            tracing::debug!(model = %self.model, "response dropped before completion, backend stream cancelled");
        }
    }
}

/// `text/event-stream` response over `events`.
#[must_use]
pub fn sse_response(events: ResponseStream) -> Response {
    let budget_status = events
        .budget_status()
        .and_then(|status| http::HeaderValue::from_str(status).ok());
    let body = Body::from_stream(
        events.map(|event| Ok::<_, Infallible>(bytes::Bytes::from(event.to_sse()))),
    );

    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    if let Some(status) = budget_status {
        headers.insert(CONTEXT_BUDGET_HEADER, status);
    }
    response
}
