//! Pagination controller tests against in-memory collaborators
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use async_trait::async_trait;
use common::*;
use harvest_ingest::config::ControllerConfig;
use harvest_ingest::controller::{BatchHandler, BatchOutcome, HarvestController, Window};
use harvest_ingest::models::ActionRecord;
use harvest_ingest::pipeline::EnrichPipeline;
use harvest_ingest::publish::Publisher;
use harvest_ingest::{IngestError, Result, Watermark};
use tokio_util::sync::CancellationToken;

fn config(batch_size: u32) -> ControllerConfig {
    ControllerConfig {
        batch_size,
        ..Default::default()
    }
}

fn day_window() -> Window {
    Window::new(mark("20240101000000"), mark("20240102000000"))
}

/// Marks every record as processed, optionally cancelling a token first
#[derive(Default)]
struct CountingHandler {
    sizes: Vec<usize>,
    cancel_on_handle: Option<CancellationToken>,
}

#[async_trait]
impl BatchHandler for CountingHandler {
    async fn handle(&mut self, batch: &[ActionRecord]) -> Result<BatchOutcome> {
        self.sizes.push(batch.len());
        if let Some(token) = &self.cancel_on_handle {
            token.cancel();
        }

        let mut outcome = BatchOutcome::default();
        for action in batch {
            outcome.record_success(Watermark::from_rfc3339(&action.created).unwrap());
        }
        Ok(outcome)
    }
}

#[tokio::test(start_paused = true)]
async fn test_pages_until_empty_batch() {
    let source = FakeActionSource::batches(vec![actions(0..100), actions(100..200), vec![]]);
    let controller = HarvestController::new(source.clone(), config(100));
    let mut handler = CountingHandler::default();

    let summary = controller.run(day_window(), &mut handler).await.unwrap();

    assert_eq!(source.offsets(), vec![0, 100, 200]);
    assert!(source.queries().iter().all(|q| q.limit == 100));
    assert_eq!(handler.sizes, vec![100, 100]);
    assert_eq!(summary.actions, 200);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_queries_carry_window_bounds() {
    let source = FakeActionSource::batches(vec![actions(0..3)]);
    let controller = HarvestController::new(source.clone(), config(10));

    controller
        .run(day_window(), &mut CountingHandler::default())
        .await
        .unwrap();

    let queries = source.queries();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].start.to_string(), "20240101000000");
    assert_eq!(queries[0].end.to_string(), "20240102000000");
    assert_eq!(queries[1].offset, 10);
}

#[tokio::test]
async fn test_span_guard_aborts_before_fetch() {
    let source = FakeActionSource::batches(vec![actions(0..10)]);
    let store = MemoryCheckpointStore::new();
    let controller = HarvestController::new(
        source.clone(),
        ControllerConfig {
            max_window_span: Some(chrono::Duration::hours(1)),
            ..config(100)
        },
    )
    .with_checkpoint(checkpoint(&store));

    let err = controller
        .run(day_window(), &mut CountingHandler::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IngestError::WindowTooWide {
            span_secs: 86_400,
            max_secs: 3_600
        }
    ));
    assert!(source.queries().is_empty());
    assert!(store.puts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_span_guard_can_be_disabled() {
    let source = FakeActionSource::batches(vec![]);
    let controller = HarvestController::new(
        source.clone(),
        ControllerConfig {
            max_window_span: Some(chrono::Duration::hours(1)),
            disable_span_check: true,
            ..config(100)
        },
    );

    controller
        .run(day_window(), &mut CountingHandler::default())
        .await
        .unwrap();

    assert_eq!(source.offsets(), vec![0]);
}

#[tokio::test]
async fn test_start_resolves_from_checkpoint() {
    let store = MemoryCheckpointStore::with_value(CHECKPOINT_KEY, "20240101000000");
    let controller = HarvestController::new(FakeActionSource::batches(vec![]), config(100))
        .with_checkpoint(checkpoint(&store));
    let now = mark("20240301120000").as_naive();

    let window = controller.resolve_window_at(None, None, now).await.unwrap();

    assert_eq!(window.start, mark("20240101000000"));
    assert_eq!(window.end, mark("20240301120000"));
}

#[tokio::test]
async fn test_start_resolution_order() {
    let store = MemoryCheckpointStore::with_value(CHECKPOINT_KEY, "20240101000000");
    let now = mark("20240301120000").as_naive();

    let controller = HarvestController::new(FakeActionSource::batches(vec![]), config(100))
        .with_checkpoint(checkpoint(&store));
    let window = controller
        .resolve_window_at(Some(mark("20240201000000")), Some(mark("20240202000000")), now)
        .await
        .unwrap();
    assert_eq!(window.start, mark("20240201000000"));
    assert_eq!(window.end, mark("20240202000000"));

    let controller = HarvestController::new(FakeActionSource::batches(vec![]), config(100));
    let window = controller.resolve_window_at(None, None, now).await.unwrap();
    assert_eq!(window.start, mark("20240301115800"));
}

#[tokio::test(start_paused = true)]
async fn test_empty_window_advances_watermark_to_end() {
    let store = MemoryCheckpointStore::new();
    let controller = HarvestController::new(FakeActionSource::batches(vec![]), config(100))
        .with_checkpoint(checkpoint(&store));

    let summary = controller
        .run(day_window(), &mut CountingHandler::default())
        .await
        .unwrap();

    assert_eq!(summary.actions, 0);
    assert_eq!(summary.watermark, mark("20240102000000"));
    assert_eq!(store.value(CHECKPOINT_KEY).as_deref(), Some("20240102000000"));
}

#[tokio::test(start_paused = true)]
async fn test_record_failure_is_counted_and_batch_continues() {
    let mut batch = actions(1..4);
    batch[1].session.session_id = None;

    let source = FakeActionSource::batches(vec![batch]);
    let store = MemoryCheckpointStore::new();
    let sink = FakeQueueSink::new();
    let publisher = Publisher::queue(sink.clone(), "actions").await.unwrap();
    let mut pipeline = EnrichPipeline::new(metadata_cache(), publisher);

    let controller =
        HarvestController::new(source, config(100)).with_checkpoint(checkpoint(&store));
    let summary = controller.run(day_window(), &mut pipeline).await.unwrap();

    assert_eq!(summary.actions, 3);
    assert_eq!(summary.failures, 1);
    assert_eq!(sink.sent_ids(), vec![1, 3]);
    assert_eq!(store.value(CHECKPOINT_KEY).as_deref(), Some("20240101000003"));
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_does_not_advance_past_last_success() {
    let source = FakeActionSource::batches(vec![actions(1..4)]);
    let store = MemoryCheckpointStore::new();
    let sink = FakeQueueSink::failing_for(&[3]);
    let publisher = Publisher::queue(sink.clone(), "actions").await.unwrap();
    let mut pipeline = EnrichPipeline::new(metadata_cache(), publisher);

    let controller =
        HarvestController::new(source, config(100)).with_checkpoint(checkpoint(&store));
    let summary = controller.run(day_window(), &mut pipeline).await.unwrap();

    assert_eq!(summary.failures, 1);
    assert_eq!(sink.sent_ids(), vec![1, 2]);
    assert_eq!(summary.watermark, mark("20240101000002"));
}

#[tokio::test(start_paused = true)]
async fn test_all_records_failing_keeps_window_start() {
    let source = FakeActionSource::batches(vec![actions(1..3)]);
    let store = MemoryCheckpointStore::new();
    let sink = FakeQueueSink::failing_for(&[1, 2]);
    let publisher = Publisher::queue(sink, "actions").await.unwrap();
    let mut pipeline = EnrichPipeline::new(metadata_cache(), publisher);

    let controller =
        HarvestController::new(source, config(100)).with_checkpoint(checkpoint(&store));
    let summary = controller.run(day_window(), &mut pipeline).await.unwrap();

    assert_eq!(summary.failures, 2);
    assert_eq!(store.value(CHECKPOINT_KEY).as_deref(), Some("20240101000000"));
}

#[tokio::test(start_paused = true)]
async fn test_stream_mode_writes_enriched_lines() {
    let source = FakeActionSource::batches(vec![actions(1..3)]);
    let buf = SharedBuf::default();
    let mut pipeline = EnrichPipeline::new(metadata_cache(), Publisher::stream(Box::new(buf.clone())));

    HarvestController::new(source, config(100))
        .run(day_window(), &mut pipeline)
        .await
        .unwrap();

    let lines = buf.lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["action_id"], 1);
    assert_eq!(lines[0]["ip"], "10.0.0.1");
    assert_eq!(lines[0]["proxy1"], "10.0.0.2");
    assert_eq!(lines[0]["episode"]["course"], "12345");
    assert_eq!(lines[0]["episode"]["year"], "2024");
    assert_eq!(lines[1]["episode"]["series_title"], "Intro to Things");
}

#[tokio::test(start_paused = true)]
async fn test_fetch_failure_is_fatal_and_skips_checkpoint() {
    let source = FakeActionSource::new(vec![Step::Batch(actions(0..10)), Step::Fail]);
    let store = MemoryCheckpointStore::new();
    let controller = HarvestController::new(source.clone(), config(10))
        .with_checkpoint(checkpoint(&store));

    let err = controller
        .run(day_window(), &mut CountingHandler::default())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::UpstreamStatus { status: 502, .. }));
    assert_eq!(source.offsets(), vec![0, 10]);
    assert!(store.puts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_write_failure_is_not_fatal() {
    let store = MemoryCheckpointStore::failing();
    let controller = HarvestController::new(FakeActionSource::batches(vec![actions(0..5)]), config(10))
        .with_checkpoint(checkpoint(&store));

    let summary = controller
        .run(day_window(), &mut CountingHandler::default())
        .await
        .unwrap();

    assert_eq!(summary.actions, 5);
    assert_eq!(summary.watermark, mark("20240101000004"));
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_every_batch() {
    let store = MemoryCheckpointStore::new();
    let source = FakeActionSource::batches(vec![actions(0..2), actions(2..4)]);
    let controller = HarvestController::new(
        source,
        ControllerConfig {
            checkpoint_every_batch: true,
            ..config(2)
        },
    )
    .with_checkpoint(checkpoint(&store));

    controller
        .run(day_window(), &mut CountingHandler::default())
        .await
        .unwrap();

    assert_eq!(
        store.puts(),
        vec!["20240101000001", "20240101000003", "20240101000003"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_writes_no_checkpoint() {
    let token = CancellationToken::new();
    let store = MemoryCheckpointStore::new();
    let source = FakeActionSource::batches(vec![actions(0..10), actions(10..20)]);
    let controller = HarvestController::new(source.clone(), config(10))
        .with_checkpoint(checkpoint(&store))
        .with_cancellation(token.clone());
    let mut handler = CountingHandler {
        cancel_on_handle: Some(token),
        ..Default::default()
    };

    let err = controller.run(day_window(), &mut handler).await.unwrap_err();

    assert!(matches!(err, IngestError::Cancelled));
    assert_eq!(source.offsets(), vec![0]);
    assert!(store.puts().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start_issues_no_fetch() {
    let token = CancellationToken::new();
    token.cancel();
    let source = FakeActionSource::batches(vec![actions(0..10)]);
    let controller = HarvestController::new(source.clone(), config(10)).with_cancellation(token);

    let err = controller
        .run(day_window(), &mut CountingHandler::default())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Cancelled));
    assert!(source.queries().is_empty());
}

#[tokio::test]
async fn test_unreadable_checkpoint_is_fatal() {
    let store = MemoryCheckpointStore::with_value(CHECKPOINT_KEY, "not-a-timestamp");
    let controller = HarvestController::new(FakeActionSource::batches(vec![]), config(10))
        .with_checkpoint(checkpoint(&store));

    assert!(controller.resolve_window(None, None).await.is_err());
}
