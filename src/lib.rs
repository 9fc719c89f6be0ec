//! Microservice Simulator
//!
//! Simulates a topology of interdependent microservices inside one process.
//! Every configured endpoint answers HTTP GET requests, can call downstream
//! routes to mimic service-to-service fan-out, and injects latency and
//! periodic failures. Logs and trace spans look like those of a real
//! distributed system, which makes the simulator handy for demos and for
//! exercising observability tooling.
//!
//! # Features
//!
//! - **Latency Simulation**: `<100ms>`, `10ms<>2s`, `50ms`, `>1s` delay specs
//! - **Failure Injection**: fail every Nth call of an endpoint
//! - **Fan-out**: sequential downstream calls with per-route `stop_on_fail`
//! - **Trace Propagation**: W3C `traceparent`/`tracestate` via OpenTelemetry
//! - **Log Templates**: Handlebars messages with per-call sampling
//!
//! # Example Configuration
//!
//! ```yaml
//! service_name: frontend
//! port: 8080
//! endpoints:
//!   - uri: /checkout
//!     delay: "<20ms>"
//!     error_on_call: 10
//!     body:
//!       order: accepted
//!     routes:
//!       - uri: inventory:8080/reserve
//!         stop_on_fail: true
//!       - uri: email:8080/notify
//!         delay: ">5ms"
//! ```

pub mod chain;
pub mod config;
pub mod counter;
pub mod delay;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod propagation;
pub mod server;
pub mod telemetry;
pub mod template;

pub use config::SimulatorConfig;
pub use dispatcher::Dispatcher;
