//! Configuration for the simulator.
//!
//! Defines the simulated endpoints, their downstream routes, log templates,
//! and telemetry settings.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Main configuration for the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatorConfig {
    /// Name reported in spans and message templates
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Listen address
    #[serde(default = "default_address")]
    pub address: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Messages logged once at startup
    #[serde(default)]
    pub logging: LogConfig,

    /// Distributed tracing
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Simulated endpoints
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

fn default_service_name() -> String {
    "SimService".to_string()
}

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            address: default_address(),
            port: default_port(),
            log_level: default_log_level(),
            logging: LogConfig::default(),
            telemetry: TelemetryConfig::default(),
            endpoints: Vec::new(),
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from a YAML file, apply environment overrides and
    /// validate.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string, apply environment overrides
    /// and validate.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override telemetry settings from the standard OTLP variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = lookup("OTEL_EXPORTER_OTLP_TRACES_ENABLED") {
            self.telemetry.enabled = matches!(enabled.to_lowercase().as_str(), "1" | "true");
        }
        if let Some(endpoint) = lookup("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT") {
            self.telemetry.endpoint = endpoint;
        }
        if let Some(name) = lookup("OTEL_EXPORTER_OTLP_TRACES_TRACER_NAME") {
            self.telemetry.tracer_name = Some(name);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }
        if self.telemetry.enabled && self.telemetry.endpoint.is_empty() {
            anyhow::bail!("A collector endpoint is required when tracing is enabled");
        }

        let mut seen = HashSet::new();
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            endpoint
                .validate()
                .map_err(|e| anyhow::anyhow!("Endpoint {}: {}", i, e))?;
            if !seen.insert(endpoint.uri.as_str()) {
                anyhow::bail!("Endpoint {}: duplicate uri {}", i, endpoint.uri);
            }
        }
        Ok(())
    }
}

/// A simulated endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Endpoint {
    /// Path served by this endpoint
    pub uri: String,

    /// Latency specification (e.g. `<100ms>`, `10ms<>50ms`)
    #[serde(default)]
    pub delay: String,

    /// Fail every Nth call (0 = never)
    #[serde(default)]
    pub error_on_call: u32,

    /// Template for the injected error message (`before`)
    #[serde(default)]
    pub error_logging: LogConfig,

    /// Messages logged around each call
    #[serde(default)]
    pub logging: LogConfig,

    /// Fields merged into the `{"success": true}` response
    #[serde(default)]
    pub body: serde_json::Map<String, serde_json::Value>,

    /// Downstream calls, in order
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl Endpoint {
    /// Validate the endpoint definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.uri.is_empty() {
            anyhow::bail!("Endpoint uri cannot be empty");
        }
        if !self.uri.starts_with('/') {
            anyhow::bail!("Endpoint uri must start with '/': {}", self.uri);
        }
        if self
            .uri
            .split('/')
            .any(|segment| {
                segment.starts_with(':') || segment.starts_with('*') || segment.contains(['{', '}'])
            })
        {
            anyhow::bail!(
                "Endpoint uri segments cannot be captures or wildcards: {}",
                self.uri
            );
        }
        for (i, route) in self.routes.iter().enumerate() {
            route
                .validate()
                .map_err(|e| anyhow::anyhow!("Route {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// A downstream call made by an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Route {
    /// Target as `host:port/path`, called over plain HTTP
    pub uri: String,

    /// Latency specification applied around the call
    #[serde(default)]
    pub delay: String,

    /// Abort the chain with a 500 when this call fails
    #[serde(default)]
    pub stop_on_fail: bool,

    /// Messages logged around the call
    #[serde(default)]
    pub logging: LogConfig,
}

impl Route {
    /// Validate the route definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.uri.is_empty() {
            anyhow::bail!("Route uri cannot be empty");
        }
        Ok(())
    }
}

/// Before/after message templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Template logged before the work
    #[serde(default)]
    pub before: String,

    /// Template logged after the work
    #[serde(default)]
    pub after: String,

    /// Level of the before message
    #[serde(default = "default_log_level")]
    pub before_level: String,

    /// Level of the after message
    #[serde(default = "default_log_level")]
    pub after_level: String,

    /// Log on every Nth call (0 = never, 1 = always)
    #[serde(default = "default_log_on_call")]
    pub log_on_call: u32,
}

fn default_log_on_call() -> u32 {
    1
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            before: String::new(),
            after: String::new(),
            before_level: default_log_level(),
            after_level: default_log_level(),
            log_on_call: default_log_on_call(),
        }
    }
}

/// OpenTelemetry trace export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Whether spans are exported and trace headers propagated
    #[serde(default)]
    pub enabled: bool,

    /// OTLP gRPC collector endpoint
    #[serde(default = "default_otlp_endpoint")]
    pub endpoint: String,

    /// Tracer name (defaults to the service name)
    #[serde(default)]
    pub tracer_name: Option<String>,
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otlp_endpoint(),
            tracer_name: None,
        }
    }
}
