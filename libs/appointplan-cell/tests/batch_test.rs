// libs/appointplan-cell/tests/batch_test.rs
mod common;

use std::sync::Mutex;

use assert_matches::assert_matches;
use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

use appointplan_cell::models::StoreError;
use appointplan_cell::services::batch::{
    execute_batch, fetch_lists, BatchCommand, BatchReply, BatchTransport,
};
use common::FakeStore;

#[test]
fn test_encode_matches_store_dialect() {
    let command = BatchCommand::new("crm.item.list")
        .param("entityTypeId", 1036)
        .param(
            "filter",
            json!({
                ">=ufCrm4Date": "2025-01-06",
                "@assignedById": [1, 2]
            }),
        )
        .param("select", json!(["id", "ufCrm4Date"]));

    assert_eq!(
        command.encode(),
        "crm.item.list?&entityTypeId=1036\
         &filter[%3E%3DufCrm4Date]=2025-01-06\
         &filter[%40assignedById][0]=1&filter[%40assignedById][1]=2\
         &select[0]=id&select[1]=ufCrm4Date"
    );
}

#[test]
fn test_encode_scalars() {
    let command = BatchCommand::new("user.get")
        .param("ACTIVE", true)
        .param("FIRED", false)
        .param("NAME", "Анна Ивановна")
        .param("NOTE", Value::Null)
        .param("EMPTY", json!([]));

    assert_eq!(
        command.encode(),
        "user.get?&ACTIVE=Y&FIRED=N&NAME=%D0%90%D0%BD%D0%BD%D0%B0%20%D0%98%D0%B2%D0%B0%D0%BD%D0%BE%D0%B2%D0%BD%D0%B0&NOTE="
    );
    assert_eq!(BatchCommand::new("crm.deal.get").encode(), "crm.deal.get?");
}

#[test]
fn test_encode_keeps_slash_literal() {
    let command = BatchCommand::new("im.notify.personal.add")
        .param("USER_ID", 9)
        .param("MESSAGE", "R 1/2 at 09:00");
    let encoded = command.encode();

    assert_eq!(encoded, "im.notify.personal.add?&USER_ID=9&MESSAGE=R%201/2%20at%2009%3A00");
    assert_eq!(
        BatchCommand::parse(&encoded).unwrap().params.get("MESSAGE"),
        Some(&json!("R 1/2 at 09:00"))
    );
}

#[test]
fn test_encode_nested_lists_inside_objects() {
    let command = BatchCommand::new("crm.item.add").param(
        "fields",
        json!({"ufCrm3Code": ["51"], "start": "2025-01-06T09:00:00+03:00"}),
    );
    assert_eq!(
        command.encode(),
        "crm.item.add?&fields[ufCrm3Code][0]=51&fields[start]=2025-01-06T09%3A00%3A00%2B03%3A00"
    );
}

#[test]
fn test_parse_recovers_structure() {
    let parsed = BatchCommand::parse(
        "crm.item.list?&entityTypeId=1036&filter[%40assignedById][0]=1&filter[%40assignedById][1]=2&start=50",
    )
    .unwrap();

    assert_eq!(parsed.method, "crm.item.list");
    assert_eq!(
        Value::Object(parsed.params),
        json!({
            "entityTypeId": "1036",
            "filter": {"@assignedById": ["1", "2"]},
            "start": "50"
        })
    );
}

#[test]
fn test_parse_rejects_malformed_keys() {
    assert!(BatchCommand::parse("?&a=1").is_err());
    assert!(BatchCommand::parse("m?&a[b=1").is_err());
    assert!(BatchCommand::parse("m?&a[2]=1").is_err());
    assert!(BatchCommand::parse("m?&a=1&a[b]=2").is_err());
}

fn named(count: usize, method: &str) -> Vec<(String, BatchCommand)> {
    (0..count)
        .map(|i| (format!("cmd_{}", i), BatchCommand::new(method).param("n", i)))
        .collect()
}

#[tokio::test]
async fn test_execute_batch_chunks_and_keeps_order() {
    let store = FakeStore::new().with_canned("user.get", json!([{"ID": "1"}]));
    let commands = named(120, "user.get");

    let reply = execute_batch(&store, &commands, 50, false).await.unwrap();

    let sizes: Vec<usize> = store.calls().iter().map(|(names, _)| names.len()).collect();
    assert_eq!(sizes, vec![50, 50, 20]);
    let keys: Vec<&String> = reply.result.keys().collect();
    let expected: Vec<String> = (0..120).map(|i| format!("cmd_{}", i)).collect();
    assert_eq!(keys, expected.iter().collect::<Vec<_>>());
    assert!(reply.result_error.is_empty());
}

#[tokio::test]
async fn test_execute_batch_halts_after_failing_chunk() {
    let store = FakeStore::failing_create(2);
    let commands = named(4, "crm.item.add");

    let reply = execute_batch(&store, &commands, 2, true).await.unwrap();

    assert_eq!(store.calls().len(), 1);
    assert!(store.calls()[0].1);
    assert!(reply.result.contains_key("cmd_0"));
    assert!(reply.result_error.contains_key("cmd_1"));
    assert_eq!(store.item_count(), 1);
}

#[tokio::test]
async fn test_execute_batch_without_halt_runs_every_chunk() {
    let store = FakeStore::failing_create(2);
    let commands = named(4, "crm.item.add");

    let reply = execute_batch(&store, &commands, 2, false).await.unwrap();

    assert_eq!(store.calls().len(), 2);
    assert_eq!(reply.result.len(), 3);
    assert_eq!(reply.result_error.len(), 1);
}

#[tokio::test]
async fn test_transport_failure_returns_completed_chunks() {
    let mut store = FakeStore::new().with_canned("user.get", json!([]));
    store.fail_call_at = Some(2);
    let commands = named(5, "user.get");

    let err = execute_batch(&store, &commands, 2, false).await.unwrap_err();

    assert_eq!(err.completed.result.len(), 2);
    assert_matches!(err.source, StoreError::Transport(_));
}

/// Serves `total` numbered items in pages of `page`, like the store's list methods.
struct PagingStore {
    total: u64,
    page: u64,
    stuck: bool,
    calls: Mutex<usize>,
}

#[async_trait]
impl BatchTransport for PagingStore {
    async fn call_batch(&self, commands: &[(String, String)], _halt: bool) -> Result<BatchReply, StoreError> {
        *self.calls.lock().unwrap() += 1;
        let mut reply = BatchReply::default();
        for (name, encoded) in commands {
            let command = BatchCommand::parse(encoded).map_err(StoreError::Malformed)?;
            let start: u64 = command
                .params
                .get("start")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let end = (start + self.page).min(self.total);
            let items: Vec<Value> = (start..end).map(|i| json!({"id": i})).collect();
            reply.result.insert(name.clone(), json!({"items": items}));
            if self.stuck {
                reply.result_next.insert(name.clone(), json!(0));
            } else if end < self.total {
                reply.result_next.insert(name.clone(), json!(end));
            }
        }
        Ok(reply)
    }
}

#[tokio::test]
async fn test_fetch_lists_follows_paging() {
    let store = PagingStore { total: 120, page: 50, stuck: false, calls: Mutex::new(0) };

    let lists = fetch_lists(
        &store,
        vec![("items".to_string(), BatchCommand::new("crm.item.list"))],
        50,
    )
    .await
    .unwrap();

    let items = lists["items"].as_array().unwrap();
    assert_eq!(items.len(), 120);
    assert_eq!(items[119], json!({"id": 119}));
    assert_eq!(*store.calls.lock().unwrap(), 3);
}

#[tokio::test]
async fn test_fetch_lists_stops_on_non_advancing_offset() {
    let store = PagingStore { total: 120, page: 50, stuck: true, calls: Mutex::new(0) };

    let lists = fetch_lists(
        &store,
        vec![("items".to_string(), BatchCommand::new("crm.item.list"))],
        50,
    )
    .await
    .unwrap();

    assert_eq!(lists["items"].as_array().unwrap().len(), 50);
    assert_eq!(*store.calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_fetch_lists_aborts_on_command_error() {
    let store = FakeStore::new();
    let result = fetch_lists(
        &store,
        vec![("users".to_string(), BatchCommand::new("unknown.method"))],
        50,
    )
    .await;
    assert_matches!(result, Err(StoreError::Transport(msg)) if msg.contains("users"));
}

fn key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z@<>=!][a-zA-Z0-9_]{0,6}"
}

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = "\\PC{0,12}".prop_map(Value::String);
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 1..4).prop_map(Value::Array),
            proptest::collection::btree_map(key_strategy(), inner, 1..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn prop_encode_then_parse_is_stable(
        method in "[a-z]{1,6}(\\.[a-z]{1,6}){0,2}",
        params in proptest::collection::btree_map(key_strategy(), value_strategy(), 0..5),
    ) {
        let params: Map<String, Value> = params.into_iter().collect();
        let command = BatchCommand { method, params };

        let parsed = BatchCommand::parse(&command.encode()).unwrap();
        prop_assert_eq!(parsed, command);
    }

    #[test]
    fn prop_chunks_never_exceed_limit(count in 0usize..130, limit in 1usize..60) {
        let store = FakeStore::new().with_canned("user.get", json!([]));
        let commands = named(count, "user.get");

        let reply = tokio_test::block_on(execute_batch(&store, &commands, limit, false)).unwrap();

        let sizes: Vec<usize> = store.calls().iter().map(|(names, _)| names.len()).collect();
        prop_assert!(sizes.iter().all(|&n| n > 0 && n <= limit));
        prop_assert_eq!(sizes.iter().sum::<usize>(), count);
        prop_assert_eq!(reply.result.len(), count);
    }
}
