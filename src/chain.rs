//! Execution of one endpoint invocation: delays, downstream route calls and
//! the response body.

use crate::config::{Endpoint, Route};
use crate::delay::ParsedDelay;
use crate::error::SimError;
use crate::logging::LogTemplates;
use crate::propagation::{span_name, ActiveSpan, TracePropagator};
use crate::template::{MessageContext, MessageRenderer};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use opentelemetry::Context;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

/// A route with its latency parsed and log templates compiled.
#[derive(Debug)]
pub struct SimulatedRoute {
    pub config: Route,
    pub delay: ParsedDelay,
    pub logging: LogTemplates,
}

impl SimulatedRoute {
    pub fn new(config: &Route, renderer: &mut MessageRenderer) -> Self {
        Self {
            delay: ParsedDelay::parse(&config.delay),
            logging: LogTemplates::new(&config.logging, renderer),
            config: config.clone(),
        }
    }
}

/// An endpoint with its latency parsed and log templates compiled.
#[derive(Debug)]
pub struct SimulatedEndpoint {
    pub config: Endpoint,
    pub delay: ParsedDelay,
    pub logging: LogTemplates,
    pub error_logging: LogTemplates,
    pub routes: Vec<SimulatedRoute>,
}

impl SimulatedEndpoint {
    pub fn new(config: &Endpoint, renderer: &mut MessageRenderer) -> Self {
        Self {
            delay: ParsedDelay::parse(&config.delay),
            logging: LogTemplates::new(&config.logging, renderer),
            error_logging: LogTemplates::new(&config.error_logging, renderer),
            routes: config
                .routes
                .iter()
                .map(|route| SimulatedRoute::new(route, renderer))
                .collect(),
            config: config.clone(),
        }
    }
}

/// How a chain of route calls ended.
#[derive(Debug)]
pub enum ChainOutcome {
    /// Every route was attempted; `failures` counts the tolerated errors.
    Completed { failures: usize },
    /// A `stop_on_fail` route failed; later routes were skipped.
    Aborted(SimError),
}

/// Runs endpoint invocations against shared collaborators.
#[derive(Clone, Copy)]
pub struct RouteChain<'a> {
    pub service_name: &'a str,
    pub client: &'a reqwest::Client,
    pub propagator: &'a dyn TracePropagator,
    pub renderer: &'a MessageRenderer,
}

impl RouteChain<'_> {
    /// Run the endpoint: before-delay, routes, after-delay, response body.
    pub async fn run(
        &self,
        endpoint: &SimulatedEndpoint,
        ctx: &MessageContext<'_>,
        span: &ActiveSpan,
    ) -> Response {
        endpoint.delay.apply_before("routing", "self").await;

        if endpoint.routes.is_empty() {
            debug!(uri = %endpoint.config.uri, "No routes defined");
        }
        if let ChainOutcome::Aborted(err) = self.call_routes(endpoint, ctx, span.context()).await {
            error!(error = %err, "Route chain aborted");
            span.record_message(&err.to_string());
            return err.into_response();
        }

        endpoint.delay.apply_after("routing", "self").await;

        match success_body(&endpoint.config.body) {
            Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
            Err(err) => {
                error!(error = %err, "Failed to write response body");
                span.record_error(&err);
                err.into_response()
            }
        }
    }

    /// Call every route in declaration order, one at a time, stopping at the
    /// first failure of a `stop_on_fail` route.
    pub async fn call_routes(
        &self,
        endpoint: &SimulatedEndpoint,
        ctx: &MessageContext<'_>,
        parent: &Context,
    ) -> ChainOutcome {
        let mut failures = 0;
        for route in &endpoint.routes {
            let route_ctx = ctx.clone().with_route(&route.config);
            route.logging.log_before(self.renderer, &route_ctx);

            if let Err(err) = self.call_route(route, parent).await {
                if route.config.stop_on_fail {
                    return ChainOutcome::Aborted(err);
                }
                warn!(target_uri = %route.config.uri, error = %err, "Route call failed, continuing");
                failures += 1;
            }

            route.logging.log_after(self.renderer, &route_ctx);
        }
        ChainOutcome::Completed { failures }
    }

    async fn call_route(&self, route: &SimulatedRoute, parent: &Context) -> Result<(), SimError> {
        let uri = &route.config.uri;
        let span = self
            .propagator
            .start_span(parent, span_name(self.service_name, uri));

        let mut request = self.client.get(format!("http://{}", uri));
        for (name, value) in self.propagator.inject(span.context()) {
            request = request.header(name, value);
        }

        route.delay.apply_before("route-call", uri).await;
        debug!(target_uri = %uri, "Calling");
        let result = request.send().await;
        debug!(target_uri = %uri, ok = result.is_ok(), "Returned");
        route.delay.apply_after("route-call", uri).await;

        match result {
            Ok(_) => Ok(()),
            Err(source) => {
                span.record_error(&source);
                Err(SimError::Route {
                    target: uri.clone(),
                    source,
                })
            }
        }
    }
}

/// `{"success": true}` overlaid with the configured body.
pub fn success_body(body: &Map<String, Value>) -> Result<Vec<u8>, SimError> {
    let mut merged = Map::new();
    merged.insert("success".to_string(), Value::Bool(true));
    for (key, value) in body {
        merged.insert(key.clone(), value.clone());
    }
    Ok(serde_json::to_vec(&Value::Object(merged))?)
}
