//! Endpoint registry.
//!
//! Every scenario gets its own gRPC listener so that many scenarios can be
//! exercised at once without their runs interfering. Listeners are bound
//! eagerly at startup and held until shutdown.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use otlp_retry_harness::{ReportSink, RetryTraceService, RetryValidationHandler, Scenario, ScenarioTable};
use snafu::{OptionExt, ResultExt};
use tokio::{net::TcpListener, sync::watch, task::JoinSet};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::error::{BindSnafu, EndpointTaskSnafu, PortOverflowSnafu, Result, ServeSnafu};

/// Maps scenarios to listen addresses: `host:(base_port + code)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortLayout {
    /// Address every endpoint listens on.
    pub host: IpAddr,
    /// Offset added to the numeric status code.
    pub base_port: u16,
}

impl PortLayout {
    /// The listen address for a scenario.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::PortOverflow`](crate::error::ServerError::PortOverflow)
    /// if the port does not fit in 16 bits.
    pub fn addr_for(&self, scenario: &Scenario) -> Result<SocketAddr> {
        let code = scenario.code_number();
        let port = self
            .base_port
            .checked_add(code)
            .context(PortOverflowSnafu { base_port: self.base_port, code })?;
        Ok(SocketAddr::new(self.host, port))
    }
}

/// One bound scenario listener.
#[derive(Debug)]
pub struct Endpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: RetryValidationHandler,
}

impl Endpoint {
    /// Binds a listener for a handler.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`](crate::error::ServerError::Bind) if the
    /// address is unavailable.
    pub async fn bind(addr: SocketAddr, handler: RetryValidationHandler) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.context(BindSnafu { addr })?;
        // Get the actual bound address (important for ephemeral ports)
        let local_addr = listener.local_addr().context(BindSnafu { addr })?;
        Ok(Self { listener, local_addr, handler })
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The handler behind this endpoint.
    #[must_use]
    pub fn handler(&self) -> &RetryValidationHandler {
        &self.handler
    }

    /// Serves OTLP trace exports until `shutdown` turns true.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Serve`](crate::error::ServerError::Serve) on a
    /// transport failure.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.local_addr;
        tracing::debug!(test_name = %self.handler.scenario().name, %addr, "Serving endpoint");
        Server::builder()
            .add_service(RetryTraceService::into_server(self.handler))
            .serve_with_incoming_shutdown(TcpListenerStream::new(self.listener), async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .context(ServeSnafu { addr })
    }
}

/// All endpoints of one process.
#[derive(Debug)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    /// Binds one endpoint per scenario.
    ///
    /// # Errors
    ///
    /// Returns an error if a port overflows or cannot be bound. Nothing is
    /// served until [`serve`](Self::serve) is called.
    pub async fn bind(
        table: &ScenarioTable,
        layout: PortLayout,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self> {
        let mut endpoints = Vec::with_capacity(table.len());
        for scenario in table.iter() {
            let addr = layout.addr_for(scenario)?;
            let handler = RetryValidationHandler::new(scenario.clone(), sink.clone());
            let endpoint = Endpoint::bind(addr, handler).await?;
            tracing::info!(
                test_name = %scenario.name,
                port = endpoint.local_addr().port(),
                expected_retries = scenario.expected_retries,
                min_delay = ?scenario.min_delay,
                max_window = ?scenario.max_window,
                "Endpoint bound"
            );
            endpoints.push(endpoint);
        }
        Ok(Self { endpoints })
    }

    /// Bound endpoints in status code order.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Serves every endpoint until `shutdown` turns true.
    ///
    /// # Errors
    ///
    /// Returns the first endpoint failure.
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut tasks = JoinSet::new();
        for endpoint in self.endpoints {
            tasks.spawn(endpoint.serve(shutdown.clone()));
        }
        while let Some(joined) = tasks.join_next().await {
            joined.context(EndpointTaskSnafu)??;
        }
        Ok(())
    }
}
