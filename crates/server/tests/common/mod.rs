//! Helpers for running retry endpoints over real loopback sockets.
//!
//! Windows and delays here are a few hundred milliseconds so the suite runs
//! quickly against the real clock; spacing between attempts leaves enough
//! slack for scheduler jitter.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use opentelemetry_proto::tonic::collector::trace::v1::trace_service_client::TraceServiceClient;
use otlp_retry_harness::{ChannelSink, RetryValidationHandler, Scenario, Verdict};
use otlp_retry_harness_server::{Endpoint, ShutdownCoordinator};
use otlp_retry_harness_test_utils::{assert_eventually, export_request};
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use tonic::{Code, transport::Channel};

/// Upper bound on waiting for a verdict after the window closes.
pub const VERDICT_TIMEOUT: Duration = Duration::from_secs(5);

/// A single endpoint served on an ephemeral loopback port.
pub struct TestEndpoint {
    /// The bound address.
    pub addr: SocketAddr,
    /// Shares run state with the served handler.
    pub handler: RetryValidationHandler,
    /// Verdicts reported by the endpoint.
    pub verdicts: UnboundedReceiver<Verdict>,
    shutdown: ShutdownCoordinator,
    server: JoinHandle<otlp_retry_harness_server::Result<()>>,
}

impl TestEndpoint {
    /// Binds and serves `scenario`.
    pub async fn start(scenario: Scenario) -> Self {
        let (sink, verdicts) = ChannelSink::new();
        let handler = RetryValidationHandler::new(scenario, Arc::new(sink));
        let endpoint = Endpoint::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), handler.clone())
            .await
            .expect("bind ephemeral port");
        let addr = endpoint.local_addr();
        let shutdown = ShutdownCoordinator::new();
        let server = tokio::spawn(endpoint.serve(shutdown.subscribe()));
        Self { addr, handler, verdicts, shutdown, server }
    }

    /// Connects a fresh client.
    pub async fn client(&self) -> TraceServiceClient<Channel> {
        TraceServiceClient::connect(format!("http://{}", self.addr)).await.expect("connect client")
    }

    /// Waits for the next verdict.
    pub async fn next_verdict(&mut self) -> Verdict {
        tokio::time::timeout(VERDICT_TIMEOUT, self.verdicts.recv())
            .await
            .expect("verdict before timeout")
            .expect("verdict channel open")
    }

    /// Waits until the handler has released its run.
    pub async fn wait_idle(&self) -> bool {
        assert_eventually(VERDICT_TIMEOUT, || !self.handler.is_observing()).await
    }

    /// Signals shutdown and waits for the server to stop.
    pub async fn stop(self) {
        self.shutdown.shutdown();
        tokio::time::timeout(VERDICT_TIMEOUT, self.server)
            .await
            .expect("server stopped before timeout")
            .expect("server task joined")
            .expect("server exited cleanly");
    }
}

/// Sends one export carrying `trace` and returns the status code.
pub async fn export(client: &mut TraceServiceClient<Channel>, trace: &[u8]) -> Code {
    match client.export(export_request(trace)).await {
        Ok(_) => Code::Ok,
        Err(status) => status.code(),
    }
}

/// Builds a scenario with short timings.
pub fn scenario(code: Code, expected_retries: u32, min_delay_ms: u64, max_window_ms: u64) -> Scenario {
    Scenario::builder()
        .code(code)
        .expected_retries(expected_retries)
        .min_delay(Duration::from_millis(min_delay_ms))
        .max_window(Duration::from_millis(max_window_ms))
        .build()
        .expect("valid scenario")
}
