use opentelemetry_proto::tonic::collector::logs::v1::logs_service_server::{
    LogsService, LogsServiceServer,
};
use opentelemetry_proto::tonic::collector::logs::v1::{
    ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::{
    TraceService, TraceServiceServer,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use otelly_core::OtellyError;
use tonic::{Request, Response, Status};

use crate::otlp::decode::{decode_logs, decode_traces};
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct GrpcIngest {
    pipeline: Pipeline,
}

impl GrpcIngest {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn logs_service(&self) -> LogsServiceServer<Self> {
        LogsServiceServer::new(self.clone())
    }

    pub fn traces_service(&self) -> TraceServiceServer<Self> {
        TraceServiceServer::new(self.clone())
    }
}

#[tonic::async_trait]
impl LogsService for GrpcIngest {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> std::result::Result<Response<ExportLogsServiceResponse>, Status> {
        let groups = decode_logs(request.into_inner());
        tracing::debug!(groups = groups.len(), "otlp grpc logs accepted");
        self.pipeline.submit_logs(groups).await.map_err(refused)?;
        Ok(Response::new(ExportLogsServiceResponse::default()))
    }
}

#[tonic::async_trait]
impl TraceService for GrpcIngest {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> std::result::Result<Response<ExportTraceServiceResponse>, Status> {
        let groups = decode_traces(request.into_inner());
        tracing::debug!(groups = groups.len(), "otlp grpc traces accepted");
        self.pipeline.submit_spans(groups).await.map_err(refused)?;
        Ok(Response::new(ExportTraceServiceResponse::default()))
    }
}

/// The exporter should retry later; the batch was not queued.
fn refused(e: OtellyError) -> Status {
    tracing::warn!(error = %e, "otlp grpc batch refused");
    Status::unavailable(e.to_string())
}
