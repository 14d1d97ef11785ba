use std::net::SocketAddr;

use otelly_core::error::{OtellyError, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

use crate::otlp::grpc::GrpcIngest;
use crate::otlp::http;
use crate::pipeline::Pipeline;

/// Serves OTLP over gRPC and HTTP until `cancel` fires or either server
/// fails. A failure cancels the other server too.
pub async fn run_ingest_servers(
    pipeline: Pipeline,
    grpc_addr: SocketAddr,
    http_addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let grpc = GrpcIngest::new(pipeline.clone());
    let http_router = http::router(pipeline);

    let http_listener = TcpListener::bind(http_addr)
        .await
        .map_err(|e| OtellyError::Io(format!("failed to bind OTLP HTTP on {http_addr}: {e}")))?;
    info!(%grpc_addr, %http_addr, "otlp receivers listening");

    let grpc_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            Server::builder()
                .add_service(grpc.logs_service())
                .add_service(grpc.traces_service())
                .serve_with_shutdown(grpc_addr, cancel.cancelled_owned())
                .await
        }
    });

    let http_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            axum::serve(http_listener, http_router)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
        }
    });

    let result = tokio::select! {
        res = grpc_task => {
            let inner = res.map_err(|e| OtellyError::Ingest(format!("gRPC task join failed: {e}")))?;
            inner.map_err(|e| OtellyError::Ingest(format!("gRPC server failed: {e}")))
        }
        res = http_task => {
            let inner = res.map_err(|e| OtellyError::Ingest(format!("HTTP task join failed: {e}")))?;
            inner.map_err(|e| OtellyError::Ingest(format!("HTTP server failed: {e}")))
        }
    };
    cancel.cancel();
    result
}
