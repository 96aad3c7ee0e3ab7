//! OTLP trace service adapter.
//!
//! Binds a [`RetryValidationHandler`] to the OTLP `TraceService/Export`
//! method. The response is never successful, so the response payload is
//! never built.

use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
    trace_service_server::{TraceService, TraceServiceServer},
};
use tonic::{Request, Response, Status};

use crate::{context::RequestContext, handler::RetryValidationHandler};

/// `TraceService` implementation backed by a retry validation handler.
#[derive(Debug, Clone)]
pub struct RetryTraceService {
    handler: RetryValidationHandler,
}

impl RetryTraceService {
    /// Wraps a handler.
    pub fn new(handler: RetryValidationHandler) -> Self {
        Self { handler }
    }

    /// Wraps a handler into a tonic service ready to add to a server.
    pub fn into_server(handler: RetryValidationHandler) -> TraceServiceServer<Self> {
        TraceServiceServer::new(Self::new(handler))
    }

    /// The wrapped handler.
    #[must_use]
    pub fn handler(&self) -> &RetryValidationHandler {
        &self.handler
    }
}

#[tonic::async_trait]
impl TraceService for RetryTraceService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let ctx = RequestContext::from_metadata(request.metadata());
        Err(self.handler.handle(&ctx, request.get_ref()))
    }
}
