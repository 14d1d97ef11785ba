use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Router, body::Bytes};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use prost::Message;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Level;

use crate::otlp::decode::{decode_logs, decode_traces};
use crate::pipeline::Pipeline;

pub fn router(pipeline: Pipeline) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    Router::new()
        .route("/v1/logs", post(export_logs))
        .route("/v1/traces", post(export_traces))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .with_state(pipeline)
}

async fn export_logs(State(pipeline): State<Pipeline>, body: Bytes) -> StatusCode {
    let Ok(req) = ExportLogsServiceRequest::decode(body) else {
        tracing::warn!("otlp http logs decode failed");
        return StatusCode::BAD_REQUEST;
    };

    let groups = decode_logs(req);
    tracing::debug!(groups = groups.len(), "otlp http logs accepted");
    match pipeline.submit_logs(groups).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "otlp http logs refused");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn export_traces(State(pipeline): State<Pipeline>, body: Bytes) -> StatusCode {
    let Ok(req) = ExportTraceServiceRequest::decode(body) else {
        tracing::warn!("otlp http traces decode failed");
        return StatusCode::BAD_REQUEST;
    };

    let groups = decode_traces(req);
    tracing::debug!(groups = groups.len(), "otlp http traces accepted");
    match pipeline.submit_spans(groups).await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "otlp http traces refused");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use otelly_store::Store;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::bus::Bus;
    use crate::pipeline::PipelineConfig;

    fn test_pipeline(store: &Store, bus: &Bus) -> Pipeline {
        Pipeline::new(
            store.clone(),
            bus.clone(),
            PipelineConfig {
                channel_capacity: 4,
                publish_timeout: Duration::from_millis(20),
            },
            CancellationToken::new(),
        )
    }

    fn post_traces(payload: Vec<u8>) -> Request<Body> {
        Request::post("/v1/traces").body(Body::from(payload)).unwrap()
    }

    #[tokio::test]
    async fn accepts_protobuf_traces() {
        let store = Store::open_in_memory().unwrap();
        let bus = Bus::new();
        let mut updates = bus.spans.subscribe();
        let app = router(test_pipeline(&store, &bus));

        let waiter = tokio::spawn(async move { updates.recv().await });
        let payload = testkit::checkout_trace_request([7; 16]).encode_to_vec();
        let resp = app.oneshot(post_traces(payload)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(waiter.await.unwrap().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rejects_garbage_body() {
        let store = Store::open_in_memory().unwrap();
        let app = router(test_pipeline(&store, &Bus::new()));

        let resp = app.oneshot(post_traces(vec![0xff, 0xff, 0xff])).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unavailable_after_shutdown() {
        let store = Store::open_in_memory().unwrap();
        let pipeline = test_pipeline(&store, &Bus::new());
        pipeline.shutdown().await;
        let app = router(pipeline);

        let payload = testkit::checkout_trace_request([7; 16]).encode_to_vec();
        let resp = app.oneshot(post_traces(payload)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
