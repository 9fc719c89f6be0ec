//! Endpoint dispatch: one HTTP handler per simulated endpoint.

use crate::chain::{RouteChain, SimulatedEndpoint};
use crate::config::SimulatorConfig;
use crate::counter::TriggerCounter;
use crate::logging::LogTemplates;
use crate::propagation::{span_name, ActiveSpan, NoopPropagator, TracePropagator};
use crate::template::{MessageContext, MessageRenderer};
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Owns the simulated endpoints and their error counters, and turns
/// inbound requests into simulated responses.
pub struct Dispatcher {
    service_name: String,
    env: BTreeMap<String, String>,
    startup_logging: LogTemplates,
    endpoints: HashMap<String, SimulatedEndpoint>,
    error_counters: HashMap<String, TriggerCounter>,
    renderer: MessageRenderer,
    propagator: Arc<dyn TracePropagator>,
    client: reqwest::Client,
}

impl Dispatcher {
    /// Build a dispatcher with tracing disabled.
    pub fn new(config: &SimulatorConfig) -> anyhow::Result<Self> {
        Self::with_propagator(config, Arc::new(NoopPropagator))
    }

    /// Build a dispatcher using the given trace propagator.
    ///
    /// The configuration is validated first, so every endpoint URI is a
    /// routable path. Delays are parsed and message templates compiled here,
    /// once.
    pub fn with_propagator(
        config: &SimulatorConfig,
        propagator: Arc<dyn TracePropagator>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let mut renderer = MessageRenderer::new();
        let startup_logging = LogTemplates::new(&config.logging, &mut renderer);
        let endpoints: HashMap<_, _> = config
            .endpoints
            .iter()
            .map(|e| (e.uri.clone(), SimulatedEndpoint::new(e, &mut renderer)))
            .collect();
        let error_counters = config
            .endpoints
            .iter()
            .map(|e| (e.uri.clone(), TriggerCounter::every(e.error_on_call)))
            .collect();

        info!(
            service = %config.service_name,
            endpoints = endpoints.len(),
            tracing = propagator.is_active(),
            "Dispatcher initialized"
        );

        Ok(Self {
            service_name: config.service_name.clone(),
            env: std::env::vars().collect(),
            startup_logging,
            endpoints,
            error_counters,
            renderer,
            propagator,
            client: reqwest::Client::new(),
        })
    }

    /// URIs served by this dispatcher.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// Error counter of an endpoint.
    pub fn error_counter(&self, uri: &str) -> Option<&TriggerCounter> {
        self.error_counters.get(uri)
    }

    /// Build the router with one handler per endpoint.
    pub fn router(self: Arc<Self>) -> Router {
        let mut router = Router::new();
        for path in self.endpoints.keys() {
            let dispatcher = Arc::clone(&self);
            let uri = path.clone();
            router = router.route(
                path,
                any(move |request: Request| async move { dispatcher.handle(&uri, request).await }),
            );
        }
        router
    }

    /// Emit the startup log messages.
    pub fn log_startup(&self) {
        let ctx = self.message_context();
        self.startup_logging.log_before(&self.renderer, &ctx);
        self.startup_logging.log_after(&self.renderer, &ctx);
    }

    fn message_context(&self) -> MessageContext<'_> {
        MessageContext::new(&self.service_name, &self.env)
    }

    /// Handle one request for the endpoint registered at `uri`.
    pub async fn handle(&self, uri: &str, request: Request) -> Response {
        let Some(endpoint) = self.endpoints.get(uri) else {
            return StatusCode::NOT_FOUND.into_response();
        };

        let parent = self.propagator.extract(request.headers());
        let span = self
            .propagator
            .start_span(&parent, span_name(&self.service_name, uri));

        if request.method() != Method::GET {
            debug!(method = %request.method(), uri, "Method not allowed");
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }
        debug!(method = %request.method(), path = %request.uri().path(), "Handling request");

        let ctx = self.message_context().with_endpoint(&endpoint.config);

        if let Some(response) = self.simulate_error(endpoint, &ctx, &span) {
            return response;
        }

        endpoint.logging.log_before(&self.renderer, &ctx);
        let chain = RouteChain {
            service_name: &self.service_name,
            client: &self.client,
            propagator: self.propagator.as_ref(),
            renderer: &self.renderer,
        };
        let response = chain.run(endpoint, &ctx, &span).await;
        endpoint.logging.log_after(&self.renderer, &ctx);

        response
    }

    /// Fail the call when the endpoint's error counter fires.
    fn simulate_error(
        &self,
        endpoint: &SimulatedEndpoint,
        ctx: &MessageContext<'_>,
        span: &ActiveSpan,
    ) -> Option<Response> {
        let counter = self.error_counters.get(&endpoint.config.uri)?;
        if !counter.is_active() {
            return None;
        }

        counter.increment();
        if !counter.should_trigger() {
            return None;
        }

        let mut message = endpoint.error_logging.before_message(&self.renderer, ctx);
        if message.is_empty() {
            message = format!("error while processing: {}", endpoint.config.uri);
        }
        span.record_message(&message);
        counter.reset();

        error!("{}", message);
        debug!(triggered_nth_call = counter.trigger_on(), "Error simulation");

        Some(
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": message })),
            )
                .into_response(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::OtelPropagator;
    use axum::body::Body;
    use opentelemetry::trace::{Status, TracerProvider as _};
    use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider};

    fn test_config() -> SimulatorConfig {
        let yaml = r#"
service_name: sim
endpoints:
  - uri: /ping
    body:
      ping: pong
  - uri: /flaky
    error_on_call: 3
  - uri: /custom-error
    error_on_call: 1
    error_logging:
      before: "{{service_name}} lost {{endpoint.uri}}"
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    fn get(uri: &str) -> Request {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_dispatcher_creation() {
        let dispatcher = Dispatcher::new(&test_config()).unwrap();
        let mut uris: Vec<_> = dispatcher.uris().collect();
        uris.sort();
        assert_eq!(uris, vec!["/custom-error", "/flaky", "/ping"]);
        assert!(!dispatcher.error_counter("/ping").unwrap().is_active());
        assert!(dispatcher.error_counter("/flaky").unwrap().is_active());
    }

    #[tokio::test]
    async fn test_success_response() {
        let dispatcher = Dispatcher::new(&test_config()).unwrap();
        let response = dispatcher.handle("/ping", get("/ping")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "application/json"
        );

        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({"success": true, "ping": "pong"}));
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let dispatcher = Dispatcher::new(&test_config()).unwrap();
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/flaky")
            .body(Body::empty())
            .unwrap();
        let response = dispatcher.handle("/flaky", request).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        // rejected calls do not count towards error injection
        assert_eq!(dispatcher.error_counter("/flaky").unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_error_every_third_call() {
        let dispatcher = Dispatcher::new(&test_config()).unwrap();
        let mut statuses = Vec::new();
        for _ in 0..6 {
            statuses.push(dispatcher.handle("/flaky", get("/flaky")).await.status());
        }
        assert_eq!(
            statuses,
            vec![
                StatusCode::OK,
                StatusCode::OK,
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::OK,
                StatusCode::OK,
                StatusCode::INTERNAL_SERVER_ERROR,
            ]
        );
    }

    #[tokio::test]
    async fn test_default_error_message() {
        let mut config = test_config();
        config.endpoints[1].error_on_call = 1;
        let dispatcher = Dispatcher::new(&config).unwrap();

        let response = dispatcher.handle("/flaky", get("/flaky")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "error while processing: /flaky");
    }

    #[tokio::test]
    async fn test_rendered_error_message() {
        let dispatcher = Dispatcher::new(&test_config()).unwrap();
        let response = dispatcher.handle("/custom-error", get("/custom-error")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "sim lost /custom-error");
    }

    #[tokio::test]
    async fn test_injected_error_marks_span() {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let propagator = Arc::new(OtelPropagator::new(provider.tracer("test")));
        let dispatcher = Dispatcher::with_propagator(&test_config(), propagator).unwrap();

        let response = dispatcher.handle("/custom-error", get("/custom-error")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let spans = exporter.get_finished_spans().unwrap();
        let span = spans
            .iter()
            .find(|s| s.name == "sim.custom-error")
            .expect("request span exported");
        assert!(matches!(span.status, Status::Error { .. }));
        assert!(span.events.events.iter().any(|e| e.name == "exception"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config: SimulatorConfig =
            serde_yaml::from_str(r#"endpoints: [{uri: "/users/:id"}]"#).unwrap();
        assert!(Dispatcher::new(&config).is_err());

        let config: SimulatorConfig =
            serde_yaml::from_str("endpoints: [{uri: /a}, {uri: /a}]").unwrap();
        assert!(Dispatcher::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_unknown_uri() {
        let dispatcher = Dispatcher::new(&test_config()).unwrap();
        let response = dispatcher.handle("/missing", get("/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
