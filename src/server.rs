//! HTTP listener for the simulated service.

use crate::dispatcher::Dispatcher;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Serve the dispatcher's endpoints on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, dispatcher: Arc<Dispatcher>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "Listening");
    }
    dispatcher.log_startup();
    let router = dispatcher.router();
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Bind `address:port` and serve until Ctrl-C.
pub async fn run(address: &str, port: u16, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let listener = TcpListener::bind((address, port)).await?;
    serve(listener, dispatcher, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatorConfig;
    use crate::propagation::OtelPropagator;
    use opentelemetry::trace::TracerProvider;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};
    use tokio::sync::oneshot;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct TestServer {
        addr: SocketAddr,
        client: reqwest::Client,
        _stop: oneshot::Sender<()>,
    }

    impl TestServer {
        async fn start(dispatcher: Dispatcher) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (stop, stopped) = oneshot::channel::<()>();
            tokio::spawn(serve(listener, Arc::new(dispatcher), async {
                let _ = stopped.await;
            }));
            Self {
                addr,
                client: reqwest::Client::new(),
                _stop: stop,
            }
        }

        async fn get(&self, uri: &str) -> reqwest::Response {
            self.client
                .get(format!("http://{}{}", self.addr, uri))
                .send()
                .await
                .unwrap()
        }
    }

    fn dispatcher(yaml: &str) -> Dispatcher {
        Dispatcher::new(&SimulatorConfig::from_yaml(yaml).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_ping_with_delay() {
        let server = TestServer::start(dispatcher(
            r#"
endpoints:
  - uri: /ping
    delay: "<5ms>"
    body:
      ping: pong
"#,
        ))
        .await;

        let started = Instant::now();
        let response = server.get("/ping").await;
        assert!(started.elapsed() >= Duration::from_millis(5));
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-type"],
            "application/json"
        );
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body, serde_json::json!({"success": true, "ping": "pong"}));
    }

    #[tokio::test]
    async fn test_every_fifth_call_fails() {
        let server = TestServer::start(dispatcher(
            r#"
endpoints:
  - uri: /flaky
    error_on_call: 5
"#,
        ))
        .await;

        for call in 1..=10 {
            let response = server.get("/flaky").await;
            if call % 5 == 0 {
                assert_eq!(response.status(), 500, "call {call}");
                let body: serde_json::Value = response.json().await.unwrap();
                assert!(body["message"].is_string());
            } else {
                assert_eq!(response.status(), 200, "call {call}");
            }
        }
    }

    #[tokio::test]
    async fn test_stop_on_fail_aborts_chain() {
        let downstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/y"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&downstream)
            .await;

        let yaml = format!(
            r#"
endpoints:
  - uri: /chain
    routes:
      - uri: 127.0.0.1:1/x
        stop_on_fail: true
      - uri: {}/y
"#,
            downstream.address()
        );
        let server = TestServer::start(dispatcher(&yaml)).await;

        let response = server.get("/chain").await;
        assert_eq!(response.status(), 500);
        let text = response.text().await.unwrap();
        assert!(text.contains("127.0.0.1:1/x"));
    }

    #[tokio::test]
    async fn test_trace_context_reaches_downstream() {
        let downstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/inventory"))
            .and(header_exists("traceparent"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&downstream)
            .await;

        let yaml = format!(
            r#"
service_name: frontend
endpoints:
  - uri: /checkout
    routes:
      - uri: {}/inventory
"#,
            downstream.address()
        );
        let config = SimulatorConfig::from_yaml(&yaml).unwrap();
        let provider = SdkTracerProvider::builder().build();
        let propagator = Arc::new(OtelPropagator::new(provider.tracer("test")));
        let server = TestServer::start(Dispatcher::with_propagator(&config, propagator).unwrap()).await;

        let response = server.get("/checkout").await;
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let server = TestServer::start(dispatcher(
            r#"
endpoints:
  - uri: /ping
"#,
        ))
        .await;

        assert_eq!(server.get("/missing").await.status(), 404);

        let response = server
            .client
            .post(format!("http://{}/ping", server.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 405);
    }
}
