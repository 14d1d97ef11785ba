use std::time::Duration;

use otelly_core::layout::{flamegraph, waterfall};
use otelly_core::trace::{TreeNode, build_tree};
use otelly_ingest::otlp::decode::{decode_logs, decode_traces};
use otelly_ingest::{Bus, Pipeline, PipelineConfig};
use otelly_store::Store;
use testkit::{checkout_logs_request, checkout_spans, checkout_trace_request, hex};
use tokio_util::sync::CancellationToken;

fn pipeline(store: &Store, bus: &Bus) -> Pipeline {
    Pipeline::new(
        store.clone(),
        bus.clone(),
        PipelineConfig {
            channel_capacity: 16,
            publish_timeout: Duration::from_secs(1),
        },
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn otlp_checkout_trace_reconstructs_end_to_end() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    let bus = Bus::new();
    let mut span_updates = bus.spans.subscribe();
    let mut log_updates = bus.logs.subscribe();
    let pipeline = pipeline(&store, &bus);

    let trace_id = [0x5a; 16];
    let spans_waiter = tokio::spawn(async move { span_updates.recv().await });
    pipeline
        .submit_spans(decode_traces(checkout_trace_request(trace_id)))
        .await?;
    let delivered = spans_waiter.await?.expect("span update");
    assert_eq!(delivered.len(), 3);

    let logs_waiter = tokio::spawn(async move { log_updates.recv().await });
    pipeline
        .submit_logs(decode_logs(checkout_logs_request(trace_id)))
        .await?;
    let logs = logs_waiter.await?.expect("log update");
    assert_eq!(logs[0].resource_id, "api:shop");

    let resource = store.get_resource("api:shop")?;
    assert_eq!(resource.service_name, "api");
    assert_eq!(resource.service_namespace, "shop");

    let roots = store.get_root_spans()?;
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].name, "checkout");

    let spans = store.get_spans_for_trace(&hex(&trace_id))?;
    let tree = build_tree(&spans)?;
    let walk = tree
        .breadth_first()
        .map(|(depth, node)| (depth, node.span.name.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(walk, vec![(0, "checkout"), (1, "payment"), (2, "charge")]);
    assert_eq!(tree.duration_of_parent, 1.0);
    assert!((tree.children[0].duration_of_parent - 0.5).abs() < 1e-9);

    let flame = flamegraph::from_tree(&tree)?;
    let widths = flame
        .breadth_first()
        .map(|(_, node)| node.width_pct)
        .collect::<Vec<_>>();
    assert_eq!(widths.len(), 3);
    assert!((widths[0] - 1.0).abs() < 1e-9);
    assert!((widths[1] - 0.5).abs() < 1e-9);
    assert!((widths[2] - 0.25).abs() < 1e-9);

    let bars = waterfall::layout_spans(&spans, 80);
    let geometry = bars.iter().map(|b| (b.offset, b.width)).collect::<Vec<_>>();
    assert_eq!(geometry, vec![(0, 80), (20, 40), (40, 20)]);

    pipeline.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batches_share_one_resource_row() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    let bus = Bus::new();
    let pipeline = pipeline(&store, &bus);

    let batch = (0..12)
        .map(|i| checkout_spans(&format!("trace-{i}")))
        .collect::<Vec<_>>();
    let outcome = pipeline.process_spans(batch).await;

    assert_eq!(outcome.groups, 12);
    assert_eq!(outcome.failed_groups, 0);
    assert_eq!(outcome.persisted, 36);

    let status = store.status()?;
    assert_eq!(status.resources_count, 1);
    assert_eq!(status.spans_count, 36);
    assert_eq!(store.get_root_spans()?.len(), 12);
    Ok(())
}

#[tokio::test]
async fn duplicate_span_batch_leaves_no_partial_trace() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    let bus = Bus::new();
    let pipeline = pipeline(&store, &bus);

    pipeline.process_spans(vec![checkout_spans("t1")]).await;

    let mut clash = checkout_spans("t2");
    clash.spans.push(checkout_spans("t1").spans[2].clone());
    let outcome = pipeline.process_spans(vec![clash]).await;

    assert_eq!(outcome.failed_groups, 1);
    assert_eq!(outcome.persisted, 0);
    assert!(store.get_spans_for_trace("t2")?.is_empty());
    assert_eq!(store.get_spans_for_trace("t1")?.len(), 3);
    Ok(())
}
