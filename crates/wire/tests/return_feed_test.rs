//! Integration tests for the DEALER/ROUTER result feed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sealyard_core::{
    CallError, CallErrorKind, CallId, CallPayload, CallResult, CoreError, PieceInfo, ResultSink,
    SectorId,
};
use sealyard_scheduler::{MemoryWorkStore, Scheduler, SchedulerConfig};
use sealyard_wire::{
    ResultReporter, ReturnListener, ReturnReporter, Transport, WireError, RETURN_TOPIC,
};
use zeromq::prelude::*;
use zeromq::{DealerSocket, ZmqMessage};

const SETTLE: Duration = Duration::from_millis(200);
const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingSink {
    received: Mutex<Vec<(CallId, CallResult)>>,
}

impl ResultSink for RecordingSink {
    fn return_result(&self, call_id: CallId, result: CallResult) -> Result<(), CoreError> {
        self.received.lock().unwrap().push((call_id, result));
        Ok(())
    }
}

struct RefusingSink;

impl ResultSink for RefusingSink {
    fn return_result(&self, call_id: CallId, _result: CallResult) -> Result<(), CoreError> {
        Err(CoreError::Sink {
            call_id: call_id.to_string(),
            reason: "nobody is waiting".into(),
        })
    }
}

async fn pair(port: u16) -> (ReturnListener, ReturnReporter) {
    let transport = Transport::tcp("127.0.0.1", port);
    let listener = ReturnListener::bind(&transport).await.unwrap();
    tokio::time::sleep(SETTLE).await;
    let reporter = ReturnReporter::connect(&transport).await.unwrap();
    tokio::time::sleep(SETTLE).await;
    (listener, reporter)
}

fn piece_result() -> CallResult {
    CallResult::ok(CallPayload::Piece(PieceInfo {
        size: 2048,
        cid: "baga6ea4sea".into(),
    }))
}

#[tokio::test]
async fn reported_result_reaches_sink() {
    let (listener, reporter) = pair(17500).await;
    let sink = Arc::new(RecordingSink::default());

    let server_sink = Arc::clone(&sink);
    let server = tokio::spawn(async move {
        let ack = listener.handle_next(server_sink.as_ref()).await.unwrap();
        ack.unwrap()
    });

    let call_id = CallId::with_token(SectorId::new(1000, 1), "ap-1");
    reporter.report(call_id.clone(), piece_result()).await.unwrap();

    let ack = server.await.unwrap();
    assert!(ack.accepted);
    let received = sink.received.lock().unwrap();
    assert_eq!(received.as_slice(), &[(call_id, piece_result())]);
}

#[tokio::test]
async fn error_results_are_forwarded_unchanged() {
    let (listener, reporter) = pair(17510).await;
    let sink = Arc::new(RecordingSink::default());

    let server_sink = Arc::clone(&sink);
    let server = tokio::spawn(async move {
        listener.handle_next(server_sink.as_ref()).await.unwrap();
    });

    let error = CallError::new(CallErrorKind::AllocateSpace, "no room in /sealing");
    let call_id = CallId::with_token(SectorId::new(1000, 2), "pc1-2");
    reporter
        .report(call_id, CallResult::failed(error.clone()))
        .await
        .unwrap();
    server.await.unwrap();

    let received = sink.received.lock().unwrap();
    assert_eq!(received[0].1.error, Some(error));
}

#[tokio::test]
async fn sink_refusal_is_reported_back() {
    let (listener, reporter) = pair(17520).await;
    let server = tokio::spawn(async move {
        listener.handle_next(&RefusingSink).await.unwrap();
    });

    let call_id = CallId::with_token(SectorId::new(1000, 3), "c2-3");
    let err = reporter.report(call_id, CallResult::done()).await.unwrap_err();
    match err {
        WireError::Rejected(reason) => assert!(reason.contains("nobody is waiting")),
        other => panic!("expected rejection, got {other}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn missing_ack_times_out() {
    let (_listener, reporter) = pair(17530).await;
    let reporter = reporter.with_ack_timeout(Duration::from_millis(300));

    let call_id = CallId::with_token(SectorId::new(1000, 4), "fin-4");
    let err = reporter.report(call_id, CallResult::done()).await.unwrap_err();
    assert!(matches!(err, WireError::Timeout(_)));
}

#[tokio::test]
async fn undecodable_frames_are_skipped() {
    let transport = Transport::tcp("127.0.0.1", 17540);
    let (listener, reporter) = pair(17540).await;
    let mut raw = DealerSocket::new();
    raw.connect(&transport.endpoint()).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let sink = Arc::new(RecordingSink::default());
    let server_sink = Arc::clone(&sink);
    let server = tokio::spawn(async move {
        let mut outcomes = Vec::new();
        for _ in 0..2 {
            outcomes.push(listener.handle_next(server_sink.as_ref()).await.unwrap());
        }
        outcomes
    });

    let mut garbage = ZmqMessage::from(RETURN_TOPIC);
    garbage.push_back(b"definitely not msgpack".to_vec().into());
    raw.send(garbage).await.unwrap();

    let call_id = CallId::with_token(SectorId::new(1000, 5), "ap-5");
    reporter.report(call_id.clone(), CallResult::done()).await.unwrap();

    let outcomes = tokio::time::timeout(TIMEOUT, server).await.unwrap().unwrap();
    assert_eq!(outcomes.iter().filter(|o| o.is_none()).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| o.is_some()).count(), 1);
    assert_eq!(sink.received.lock().unwrap()[0].0, call_id);
}

#[tokio::test]
async fn concurrent_reports_are_matched_to_their_acks() {
    let (listener, reporter) = pair(17550).await;
    let sink = Arc::new(RecordingSink::default());
    let serve_sink: Arc<dyn ResultSink> = sink.clone();
    let server = tokio::spawn(async move { listener.serve(serve_sink).await });

    let reporter = Arc::new(reporter);
    let mut handles = Vec::new();
    for number in 0..5u64 {
        let reporter = Arc::clone(&reporter);
        handles.push(tokio::spawn(async move {
            let call_id = CallId::with_token(SectorId::new(1000, number), format!("call-{number}"));
            reporter.report(call_id, CallResult::done()).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(sink.received.lock().unwrap().len(), 5);
    server.abort();
}

#[tokio::test]
async fn remote_result_wakes_scheduler_waiter() {
    let scheduler =
        Scheduler::new(SchedulerConfig::default(), Arc::new(MemoryWorkStore::new())).unwrap();
    let (listener, reporter) = pair(17560).await;
    let sink: Arc<dyn ResultSink> = Arc::new(scheduler.clone());
    let server = tokio::spawn(async move { listener.serve(sink).await });

    let call_id = CallId::with_token(SectorId::new(1000, 6), "c1-6");
    let waiter = scheduler.correlator().subscribe(call_id.clone());
    reporter.report(call_id, piece_result()).await.unwrap();

    let result = tokio::time::timeout(TIMEOUT, waiter.wait()).await.unwrap();
    assert_eq!(result, piece_result());
    server.abort();
}
