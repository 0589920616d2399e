mod common;

use std::sync::Arc;

use common::*;
use futures_util::StreamExt;
use holo_access::memory::MemorySession;
use holo_access::metrics::Telemetry;
use holo_access::pipeline::{GroupSequence, ResultPaginator, ResultSequence, ResultSource};
use holo_access::{Client, ClientConfig, Error, ExecutionInfo, Row, Statement, Value};

fn text(row: &Row, column: &str) -> String {
    match row.get(column) {
        Some(Value::Text(value)) => value.clone(),
        other => panic!("unexpected {column}: {other:?}"),
    }
}

fn label(row: Row, _: &Arc<ExecutionInfo>) -> String {
    text(&row, "label")
}

fn session_with(query: &str, rows: Vec<Row>, page_size: usize) -> Arc<MemorySession> {
    let session = Arc::new(MemorySession::new(vec![h0()]).with_page_size(page_size));
    session.insert_rows(query, rows);
    session
}

async fn connect(session: Arc<MemorySession>, page_size: usize) -> Client {
    let config = ClientConfig {
        page_size,
        ..batching_config(10)
    };
    Client::connect(session, config).await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn two_pages_yield_three_rows_once() {
    let session = session_with("q", numbered_rows("label", &["r1", "r2", "r3"]), 2);
    let client = connect(session, 2).await;

    let mut paginator = client.query(Statement::new(KEYSPACE, "q"), label);
    let labels: Vec<String> = paginator.by_ref().map(|row| row.unwrap()).collect();
    assert_eq!(labels, vec!["r1", "r2", "r3"]);

    // Single pass: a drained paginator stays empty and fetches nothing.
    assert!(paginator.next().is_none());
    assert_eq!(client.metrics().snapshot().pages, 2);
    client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn chunking_over_paged_rows_is_positional() {
    let rows = numbered_rows("cluster", &["A", "A", "B", "A"]);
    let session = session_with("q", rows, 3);
    let client = connect(session, 3).await;

    let groups = client
        .rows(Statement::new(KEYSPACE, "q"))
        .chunk_by(["cluster"])
        .to_list()
        .unwrap();
    let shape: Vec<(Vec<Value>, usize)> = groups
        .into_iter()
        .map(|(key, records)| (key, records.len()))
        .collect();
    assert_eq!(
        shape,
        vec![
            (vec![Value::from("A")], 2),
            (vec![Value::from("B")], 1),
            (vec![Value::from("A")], 1),
        ]
    );
    client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn composed_stages_read_lazily() {
    let values = ["a", "b", "a", "c", "b", "d", "e"];
    let session = session_with("q", numbered_rows("label", &values), 2);
    let client = connect(session.clone(), 2).await;

    let mut deduped = client
        .rows(Statement::new(KEYSPACE, "q"))
        .dedup_by_keys(["label"])
        .filter_rows(|record| text(&record.row, "label") != "b")
        .limit(2);
    let first = deduped.next().unwrap().unwrap();
    let second = deduped.next().unwrap().unwrap();
    assert!(deduped.next().is_none());
    assert_eq!(text(&first.row, "label"), "a");
    assert_eq!(text(&second.row, "label"), "c");
    // "c" sits on the second page; the third and fourth were never waited on.
    assert_eq!(client.metrics().snapshot().pages, 2);
    client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn combined_reads_concatenate_in_order() {
    let session = Arc::new(MemorySession::new(vec![h0()]).with_page_size(1));
    session.insert_rows("left", numbered_rows("label", &["l1", "l2"]));
    session.insert_rows("right", numbered_rows("label", &["r1"]));
    let client = connect(session, 1).await;

    let combined = client
        .query(Statement::new(KEYSPACE, "left"), label)
        .combine(client.query(Statement::new(KEYSPACE, "right"), label))
        .with_index()
        .to_list()
        .unwrap();
    assert_eq!(
        combined,
        vec![
            (0, "l1".to_string()),
            (1, "l2".to_string()),
            (2, "r1".to_string()),
        ]
    );
    client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn page_failure_surfaces_after_earlier_rows() {
    let session = session_with("q", numbered_rows("label", &["r1", "r2", "r3"]), 1);
    session.fail_page("q", 1, "coordinator lost");
    let client = connect(session, 1).await;

    let items: Vec<_> = client.query(Statement::new(KEYSPACE, "q"), label).collect();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "r1");
    assert!(matches!(&items[1], Err(Error::Execution(err)) if err.to_string() == "coordinator lost"));
    assert_eq!(client.metrics().snapshot().page_failures, 1);
    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn stream_and_iterator_agree() {
    let session = session_with("q", numbered_rows("label", &["x", "y", "z"]), 2);
    let client = connect(session, 2).await;

    let streamed: Vec<String> = client
        .query(Statement::new(KEYSPACE, "q"), label)
        .into_stream()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(streamed, vec!["x", "y", "z"]);
    client.shutdown().await.unwrap();
    assert!(matches!(
        client.execute(Statement::new(KEYSPACE, "q")).await,
        Err(Error::Stopped)
    ));
}

#[test]
fn limiter_and_combiner_laws_on_plain_sequences() {
    let a: Vec<u32> = vec![1, 2, 3, 4];
    let b: Vec<u32> = vec![9, 8];

    for n in 0..6 {
        let limited = ResultSource::new(a.clone()).limit(n).to_list().unwrap();
        assert_eq!(limited, a[..n.min(a.len())].to_vec());
    }

    let combined = ResultSource::new(a.clone())
        .combine(ResultSource::new(b.clone()))
        .to_list()
        .unwrap();
    assert_eq!(combined, [a.clone(), b].concat());

    let paginator_eq = {
        let first = holo_access::Observation::resolved(holo_access::Page::last(
            vec![],
            ExecutionInfo::default(),
        ));
        ResultPaginator::new(first.clone(), label) == ResultPaginator::new(first, label)
    };
    assert!(paginator_eq);
}

#[tokio::test(flavor = "multi_thread")]
async fn chunked_reads_reduce_to_group_heads() {
    let rows = numbered_rows("cluster", &["A", "A", "B", "B", "B", "C"]);
    let session = session_with("q", rows, 4);
    let client = connect(session, 4).await;

    let heads: Vec<String> = client
        .rows(Statement::new(KEYSPACE, "q"))
        .chunk_by(["cluster"])
        .reduce_groups(["n"])
        .to_list()
        .unwrap()
        .into_iter()
        .map(|record| text(&record.row, "cluster"))
        .collect();
    assert_eq!(heads, vec!["A", "B", "C"]);
    client.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn clients_sharing_telemetry_report_writes_and_reads_together() {
    let session = two_host_session();
    session.insert_rows("q", numbered_rows("label", &["r1", "r2", "r3"]));
    let telemetry = Telemetry::default();
    let config = ClientConfig {
        page_size: 2,
        ..batching_config(1)
    };
    let writer = Client::connect_with_telemetry(session.clone(), config.clone(), telemetry.clone())
        .await
        .unwrap();
    let reader = Client::connect_with_telemetry(session, config, telemetry.clone())
        .await
        .unwrap();

    writer
        .reactor()
        .perform_statement(write("k0", "a"))
        .unwrap()
        .await
        .unwrap();
    let read = reader.query(Statement::new(KEYSPACE, "q"), label).count();
    assert_eq!(read, 3);
    writer.shutdown().await.unwrap();
    reader.shutdown().await.unwrap();

    let snapshot = telemetry.metrics().snapshot();
    assert_eq!((snapshot.batches, snapshot.pages, snapshot.page_rows), (1, 2, 3));
    assert_eq!(writer.metrics().snapshot(), snapshot);
}
