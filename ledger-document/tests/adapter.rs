use ledger_core::adapter::{AppendFailure, ExpectedVersion, StoreAdapter};
use ledger_core::timeline::EncodedEvent;
use ledger_core::token::StreamName;
use ledger_document::RedisStoreAdapter;
use testcontainers::clients::Cli;
use testcontainers::images::redis::Redis;
use uuid::Uuid;

fn event(event_type: &str) -> EncodedEvent {
    EncodedEvent {
        event_type: event_type.to_owned(),
        data: br#"{}"#.to_vec(),
        metadata: Vec::new(),
        event_id: Uuid::new_v4(),
        correlation_id: None,
        causation_id: None,
    }
}

async fn connect(docker: &Cli) -> (testcontainers::Container<'_, Redis>, RedisStoreAdapter) {
    let node = docker.run(Redis::default());
    let dsn = format!("redis://127.0.0.1:{}/", node.get_host_port_ipv4(6379));

    let client = redis::Client::open(dsn).expect("should parse the dockerized redis url");
    let adapter = RedisStoreAdapter::connect(&client, 500)
        .await
        .expect("should connect to the dockerized redis");

    (node, adapter)
}

#[tokio::test]
async fn append_with_no_stream_then_load_forward_returns_what_was_written() {
    let docker = Cli::default();
    let (_node, adapter) = connect(&docker).await;

    let stream = StreamName::new("TestAggregate", Uuid::new_v4().to_string()).unwrap();
    let events = vec![event("WasCreated"), event("WasRenamed")];

    let appended = adapter
        .append(&stream, ExpectedVersion::NoStream, events)
        .await
        .expect("append should succeed against an empty stream");

    assert_eq!(appended.version, 2);

    let (version, loaded) = adapter
        .load_forward(&stream, 0, false)
        .await
        .expect("load_forward should succeed");

    assert_eq!(version, 2);
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].event_type, "WasCreated");
    assert_eq!(loaded[0].index, 0);
    assert_eq!(loaded[1].event_type, "WasRenamed");
    assert_eq!(loaded[1].index, 1);
}

#[tokio::test]
async fn append_with_wrong_expected_version_is_a_conflict() {
    let docker = Cli::default();
    let (_node, adapter) = connect(&docker).await;

    let stream = StreamName::new("TestAggregate", Uuid::new_v4().to_string()).unwrap();

    adapter
        .append(&stream, ExpectedVersion::NoStream, vec![event("WasCreated")])
        .await
        .expect("first append should succeed");

    let outcome = adapter
        .append(&stream, ExpectedVersion::Exact(0), vec![event("WasRenamed")])
        .await;

    match outcome {
        Err(AppendFailure::Conflict { expected, actual }) => {
            assert_eq!(expected, ExpectedVersion::Exact(0));
            assert_eq!(actual, 1);
        },
        other => panic!("expected a version conflict, got: {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_appends_to_the_same_stream_leave_exactly_one_winner() {
    let docker = Cli::default();
    let (_node, adapter) = connect(&docker).await;

    let stream = StreamName::new("TestAggregate", Uuid::new_v4().to_string()).unwrap();

    adapter
        .append(&stream, ExpectedVersion::NoStream, vec![event("WasCreated")])
        .await
        .expect("seed append should succeed");

    let (first, second) = tokio::join!(
        adapter.append(&stream, ExpectedVersion::Exact(1), vec![event("WasRenamed")]),
        adapter.append(&stream, ExpectedVersion::Exact(1), vec![event("WasRenamed")]),
    );

    match (first, second) {
        (Ok(_), Err(AppendFailure::Conflict { .. })) | (Err(AppendFailure::Conflict { .. }), Ok(_)) => {},
        (first, second) => panic!("expected exactly one conflict, got: {first:?}, {second:?}"),
    }

    let (version, _) = adapter
        .load_forward(&stream, 0, false)
        .await
        .expect("load_forward should succeed");

    assert_eq!(version, 2);
}

#[tokio::test]
async fn load_backward_until_stops_at_the_origin_event() {
    let docker = Cli::default();
    let (_node, adapter) = connect(&docker).await;

    let stream = StreamName::new("TestAggregate", Uuid::new_v4().to_string()).unwrap();

    adapter
        .append(
            &stream,
            ExpectedVersion::NoStream,
            vec![event("WasCreated"), event("WasRenamed"), event("WasRenamed"), event("WasDeleted")],
        )
        .await
        .expect("seed append should succeed");

    let (version, events) = adapter
        .load_backward_until(&stream, &|e| e.event_type == "WasCreated", false)
        .await
        .expect("load_backward_until should succeed");

    assert_eq!(version, 4);
    assert_eq!(events.len(), 4);
    assert_eq!(events.first().unwrap().event_type, "WasCreated");
    assert_eq!(events.last().unwrap().event_type, "WasDeleted");
}
