//! Template engine for log and error messages.
//!
//! Uses Handlebars for template rendering against the simulated service's
//! data context (service name, environment, current endpoint and route).

use crate::config::{Endpoint, Route};
use chrono::{SecondsFormat, Utc};
use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Renders message templates. Templates are compiled once with
/// [`MessageRenderer::compile`]; rendering never fails, errors produce an
/// empty message.
pub struct MessageRenderer {
    handlebars: Handlebars<'static>,
    compiled: usize,
}

/// Handle to a compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateId(String);

/// Data available to message templates.
#[derive(Debug, Clone, Serialize)]
pub struct MessageContext<'a> {
    /// Configured service name
    pub service_name: &'a str,
    /// Process environment captured at startup
    pub env: &'a BTreeMap<String, String>,
    /// Endpoint being handled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<&'a Endpoint>,
    /// Route being called
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<&'a Route>,
}

impl<'a> MessageContext<'a> {
    pub fn new(service_name: &'a str, env: &'a BTreeMap<String, String>) -> Self {
        Self {
            service_name,
            env,
            endpoint: None,
            route: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &'a Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_route(mut self, route: &'a Route) -> Self {
        self.route = Some(route);
        self
    }
}

impl MessageRenderer {
    /// Create a new renderer.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("pick", Box::new(pick_helper));
        handlebars.register_helper("default", Box::new(or_default));
        handlebars.register_helper("upper", Box::new(upper));
        handlebars.register_helper("lower", Box::new(lower));

        // Log lines, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self {
            handlebars,
            compiled: 0,
        }
    }

    /// Compile a template. Empty or invalid sources yield `None` and render
    /// as nothing.
    pub fn compile(&mut self, source: &str) -> Option<TemplateId> {
        if source.is_empty() {
            return None;
        }
        let id = TemplateId(format!("message-{}", self.compiled));
        match self.handlebars.register_template_string(&id.0, source) {
            Ok(()) => {
                self.compiled += 1;
                Some(id)
            }
            Err(e) => {
                warn!(template = source, error = %e, "Failed to compile message template");
                None
            }
        }
    }

    /// Render a compiled template, trimming surrounding whitespace.
    pub fn render(&self, template: Option<&TemplateId>, ctx: &MessageContext<'_>) -> String {
        let Some(id) = template else {
            return String::new();
        };
        match self.handlebars.render(&id.0, ctx) {
            Ok(rendered) => rendered.trim().to_string(),
            Err(e) => {
                warn!(template = %id.0, error = %e, "Failed to render message template");
                String::new()
            }
        }
    }
}

impl Default for MessageRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRenderer").finish_non_exhaustive()
    }
}

// Helpers available to message templates

handlebars_helper!(upper: |value: Json| value.as_str().unwrap_or_default().to_uppercase());
handlebars_helper!(lower: |value: Json| value.as_str().unwrap_or_default().to_lowercase());

// `{{default value "fallback"}}`: fallback when the value is missing or empty.
handlebars_helper!(or_default: |value: Json, fallback: str| match value {
    Value::Null => fallback.to_string(),
    Value::String(s) if s.is_empty() => fallback.to_string(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
});

/// `{{uuid}}`: random version 4 UUID.
fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let mut bytes: [u8; 16] = rand::random();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    out.write(&format!(
        "{}-{}-{}-{}-{}",
        &hex[..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..]
    ))?;
    Ok(())
}

/// `{{now}}` as RFC 3339 UTC, or `{{now "%H:%M"}}` with a strftime format.
fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let now = Utc::now();
    let text = match h.param(0).and_then(|p| p.value().as_str()) {
        Some(format) => now.format(format).to_string(),
        None => now.to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    out.write(&text)?;
    Ok(())
}

/// `{{random min max}}`: integer in `[min, max)`.
fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let min = h.param(0).and_then(|v| v.value().as_i64()).unwrap_or(0);
    let max = h.param(1).and_then(|v| v.value().as_i64()).unwrap_or(100);

    let value = if max > min {
        rand::thread_rng().gen_range(min..max)
    } else {
        min
    };
    out.write(&value.to_string())?;
    Ok(())
}

/// `{{pick "a" "b" "c"}}`: one of the parameters at random.
fn pick_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::seq::SliceRandom;

    let options: Vec<String> = h
        .params()
        .iter()
        .map(|p| match p.value().as_str() {
            Some(s) => s.to_string(),
            None => p.value().to_string(),
        })
        .collect();

    if let Some(choice) = options.choose(&mut rand::thread_rng()) {
        out.write(choice)?;
    }
    Ok(())
}
