//! End-to-end tests: real gRPC clients against served retry endpoints.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use common::{TestEndpoint, export, scenario};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, trace_service_client::TraceServiceClient,
};
use otlp_retry_harness::{ChannelSink, FAILURE_MESSAGE, FailureReason, Outcome, ScenarioTable};
use otlp_retry_harness_server::{EndpointRegistry, PortLayout, ShutdownCoordinator};
use otlp_retry_harness_test_utils::{export_request, trace_id};
use tokio::time::sleep;
use tonic::Code;

#[tokio::test]
async fn test_every_attempt_gets_the_configured_code() {
    let endpoint = TestEndpoint::start(scenario(Code::ResourceExhausted, 0, 0, 300)).await;
    let mut client = endpoint.client().await;

    let status = client.export(export_request(&trace_id(1))).await.expect_err("export must fail");
    assert_eq!(status.code(), Code::ResourceExhausted);
    assert_eq!(status.message(), FAILURE_MESSAGE);

    // Retries and unrelated exports see the same code while the run is open.
    assert_eq!(export(&mut client, &trace_id(1)).await, Code::ResourceExhausted);
    assert_eq!(export(&mut client, &trace_id(2)).await, Code::ResourceExhausted);

    drop(client);
    endpoint.stop().await;
}

#[tokio::test]
async fn test_well_spaced_retries_pass() {
    let mut endpoint = TestEndpoint::start(scenario(Code::Unavailable, 2, 100, 900)).await;
    let mut client = endpoint.client().await;

    assert_eq!(export(&mut client, &trace_id(1)).await, Code::Unavailable);
    for _ in 0..2 {
        sleep(Duration::from_millis(200)).await;
        assert_eq!(export(&mut client, &trace_id(1)).await, Code::Unavailable);
    }

    let verdict = endpoint.next_verdict().await;
    assert_eq!(verdict.outcome, Outcome::Pass, "unexpected verdict: {verdict}");
    assert_eq!(verdict.observed, 2);
    assert_eq!(verdict.code, Code::Unavailable);
    assert_eq!(
        verdict.to_string(),
        "Success: RetryTest - Unavailable (14) (expected 2, observed 2)"
    );

    drop(client);
    endpoint.stop().await;
}

#[tokio::test]
async fn test_immediate_retry_fails_too_soon() {
    let mut endpoint = TestEndpoint::start(scenario(Code::Aborted, 1, 300, 600)).await;
    let mut client = endpoint.client().await;

    export(&mut client, &trace_id(1)).await;
    export(&mut client, &trace_id(1)).await;

    let verdict = endpoint.next_verdict().await;
    assert_eq!(verdict.outcome, Outcome::Fail(FailureReason::RetriedTooSoon));
    assert_eq!(
        verdict.to_string(),
        "Failed: RetryTest - Aborted (10) - retried too soon (expected 1, observed 1)"
    );

    drop(client);
    endpoint.stop().await;
}

#[tokio::test]
async fn test_missing_retries_fail_with_counts() {
    let mut endpoint = TestEndpoint::start(scenario(Code::DataLoss, 3, 50, 400)).await;
    let mut client = endpoint.client().await;

    export(&mut client, &trace_id(1)).await;
    sleep(Duration::from_millis(100)).await;
    export(&mut client, &trace_id(1)).await;

    let verdict = endpoint.next_verdict().await;
    assert_eq!(
        verdict.outcome,
        Outcome::Fail(FailureReason::RetryCountMismatch { expected: 3, observed: 1 })
    );

    drop(client);
    endpoint.stop().await;
}

#[tokio::test]
async fn test_unrelated_exports_do_not_count() {
    let mut endpoint = TestEndpoint::start(scenario(Code::Unavailable, 1, 50, 600)).await;
    let mut client = endpoint.client().await;

    export(&mut client, &trace_id(1)).await;
    sleep(Duration::from_millis(100)).await;
    export(&mut client, &trace_id(2)).await;
    export(&mut client, &trace_id(3)).await;
    export(&mut client, &trace_id(1)).await;

    let verdict = endpoint.next_verdict().await;
    assert!(verdict.passed(), "unexpected verdict: {verdict}");
    assert_eq!(verdict.correlation_id.as_bytes(), &trace_id(1));
    assert!(endpoint.wait_idle().await);
    assert!(endpoint.verdicts.try_recv().is_err());

    drop(client);
    endpoint.stop().await;
}

#[tokio::test]
async fn test_malformed_export_is_internal() {
    let endpoint = TestEndpoint::start(scenario(Code::Unavailable, 0, 0, 300)).await;
    let mut client = endpoint.client().await;

    let status = client
        .export(ExportTraceServiceRequest::default())
        .await
        .expect_err("export must fail");
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "request did not have an ID");
    assert!(!endpoint.handler.is_observing());

    drop(client);
    endpoint.stop().await;
}

#[tokio::test]
async fn test_endpoint_accepts_new_run_after_window() {
    let mut endpoint = TestEndpoint::start(scenario(Code::InvalidArgument, 0, 0, 200)).await;
    let mut client = endpoint.client().await;

    export(&mut client, &trace_id(1)).await;
    assert!(endpoint.next_verdict().await.passed());
    assert!(endpoint.wait_idle().await, "run was never released");

    export(&mut client, &trace_id(2)).await;
    let second = endpoint.next_verdict().await;
    assert!(second.passed());
    assert_eq!(second.correlation_id.as_bytes(), &trace_id(2));

    drop(client);
    endpoint.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients_share_one_run() {
    let mut endpoint = TestEndpoint::start(scenario(Code::Unavailable, 5, 0, 800)).await;

    let mut clients = Vec::new();
    for _ in 0..6 {
        clients.push(endpoint.client().await);
    }
    let tasks: Vec<_> = clients
        .into_iter()
        .map(|mut client| tokio::spawn(async move { export(&mut client, &trace_id(7)).await }))
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), Code::Unavailable);
    }

    let verdict = endpoint.next_verdict().await;
    assert_eq!(verdict.observed, 5, "unexpected verdict: {verdict}");
    assert!(verdict.passed());
    assert!(endpoint.wait_idle().await);
    assert!(endpoint.verdicts.try_recv().is_err(), "exactly one run must be claimed");

    endpoint.stop().await;
}

#[tokio::test]
async fn test_registry_serves_scenario_on_base_plus_code() {
    // Reserve a free port, then lay the table out so Unavailable lands on it.
    let probe = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    let layout = PortLayout { host: IpAddr::V4(Ipv4Addr::LOCALHOST), base_port: port - 14 };

    let table = ScenarioTable::new(vec![scenario(Code::Unavailable, 0, 0, 200)]).unwrap();
    let (sink, mut verdicts) = ChannelSink::new();
    let registry = EndpointRegistry::bind(&table, layout, Arc::new(sink)).await.unwrap();
    assert_eq!(registry.endpoints().len(), 1);
    assert_eq!(registry.endpoints()[0].local_addr().port(), port);

    let shutdown = ShutdownCoordinator::new();
    let server = tokio::spawn(registry.serve(shutdown.subscribe()));

    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut client = TraceServiceClient::connect(format!("http://{addr}")).await.unwrap();
    assert_eq!(export(&mut client, &trace_id(1)).await, Code::Unavailable);

    let verdict = tokio::time::timeout(common::VERDICT_TIMEOUT, verdicts.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(verdict.passed());

    drop(client);
    shutdown.shutdown();
    tokio::time::timeout(common::VERDICT_TIMEOUT, server).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_registry_reports_port_in_use() {
    let taken = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = taken.local_addr().unwrap().port();
    let layout = PortLayout { host: IpAddr::V4(Ipv4Addr::LOCALHOST), base_port: port - 14 };

    let table = ScenarioTable::new(vec![scenario(Code::Unavailable, 0, 0, 200)]).unwrap();
    let (sink, _verdicts) = ChannelSink::new();
    let err = EndpointRegistry::bind(&table, layout, Arc::new(sink)).await.unwrap_err();
    assert!(err.to_string().contains(&port.to_string()), "unexpected error: {err}");
}
