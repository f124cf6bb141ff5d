//! Batch executor tests

mod common;

use std::time::Duration;

use common::Harness;
use passdeck_control::{
    BatchExecutor, ConfigGroup, ControlError, ErrorKind, GroupConfig, PortValue,
    StandardBatchItem, TunnelRef,
};
use passdeck_store::entities::{tunnel, Tunnel, TunnelRecycle};
use sea_orm::{EntityTrait, PaginatorTrait, QueryOrder};

fn item(endpoint_id: i32, name: &str, port: u16) -> StandardBatchItem {
    StandardBatchItem {
        endpoint_id,
        name: name.to_string(),
        tunnel_port: PortValue::from(port),
        target_host: "127.0.0.1".to_string(),
        target_port: PortValue::from("80"),
        mode: None,
        log_level: None,
    }
}

fn invalid_message(err: ControlError) -> String {
    match err {
        ControlError::InvalidArgument(msg) => msg,
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
}

#[tokio::test]
async fn test_partial_batch_reports_in_input_order() {
    let h = Harness::new().await;
    // the first item finishes last; results must still follow input order
    h.agent.delay_create_if(":9001", Duration::from_millis(80));
    h.agent.reject_create_if(":9003", "port 9003 busy");
    let batch = BatchExecutor::new(h.orchestrator.clone());

    let items: Vec<_> = (1..=4)
        .map(|i| item(h.endpoint.id, &format!("t{i}"), 9000 + i))
        .collect();
    let outcome = batch.create_standard(&items).await.expect("batch runs");

    assert!(outcome.success);
    assert_eq!(outcome.success_count, 3);
    assert_eq!(outcome.fail_count, 1);
    assert_eq!(outcome.results.len(), 4);

    for (i, result) in outcome.results.iter().enumerate() {
        assert_eq!(result.index, i + 1);
        assert_eq!(result.identifier, format!("t{}", i + 1));
    }
    let failed = &outcome.results[2];
    assert!(!failed.success);
    assert!(failed.error.as_deref().unwrap().contains("port 9003 busy"));
    assert!(failed.tunnel_id.is_none());
    assert!(outcome.results[0].instance_id.is_some());

    assert_eq!(Tunnel::find().count(&h.db).await.unwrap(), 3);
}

#[tokio::test]
async fn test_all_failed_batch_is_unsuccessful() {
    let h = Harness::new().await;
    h.agent.reject_create_if("client://", "agent offline");
    let batch = BatchExecutor::new(h.orchestrator.clone());

    let outcome = batch
        .create_standard(&[item(h.endpoint.id, "a", 9001), item(h.endpoint.id, "b", 9002)])
        .await
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.fail_count, 2);
}

#[tokio::test]
async fn test_batch_size_limits() {
    let h = Harness::new().await;
    let batch = BatchExecutor::new(h.orchestrator.clone());

    let empty = batch.create_standard(&[]).await.unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::InvalidArgument);

    let items: Vec<_> = (1..=51)
        .map(|i| item(h.endpoint.id, &format!("t{i}"), 9000 + i))
        .collect();
    let too_many = batch.create_standard(&items).await.unwrap_err();
    assert_eq!(too_many.kind(), ErrorKind::InvalidArgument);
    assert!(h.agent.calls().is_empty());
}

#[tokio::test]
async fn test_invalid_item_rejects_whole_batch() {
    let h = Harness::new().await;
    let batch = BatchExecutor::new(h.orchestrator.clone());

    let mut bad = item(h.endpoint.id, "c", 9003);
    bad.target_port = PortValue::from("http");
    let items = vec![
        item(h.endpoint.id, "a", 9001),
        item(h.endpoint.id, "b", 9002),
        bad,
    ];

    let msg = invalid_message(batch.create_standard(&items).await.unwrap_err());
    assert!(msg.starts_with("item 3:"), "{msg}");
    assert!(h.agent.calls().is_empty());
}

#[tokio::test]
async fn test_config_groups() {
    let h = Harness::new().await;
    let batch = BatchExecutor::new(h.orchestrator.clone());

    let groups = vec![ConfigGroup {
        endpoint_id: h.endpoint.id,
        configs: vec![
            GroupConfig {
                name: "pg".into(),
                listen_port: PortValue::from(15432),
                dest: "10.0.0.7:5432".into(),
            },
            GroupConfig {
                name: "redis".into(),
                listen_port: PortValue::from("16379"),
                dest: "10.0.0.8:6379".into(),
            },
        ],
    }];

    let outcome = batch.create_config_groups(&groups).await.unwrap();
    assert_eq!(outcome.success_count, 2);
    let mut calls = h.agent.calls();
    calls.sort();
    assert_eq!(
        calls,
        [
            "create client://:15432/10.0.0.7:5432",
            "create client://:16379/10.0.0.8:6379"
        ]
    );
}

#[tokio::test]
async fn test_config_group_validation_names_group_and_item() {
    let h = Harness::new().await;
    let batch = BatchExecutor::new(h.orchestrator.clone());

    let groups = vec![ConfigGroup {
        endpoint_id: h.endpoint.id,
        configs: vec![
            GroupConfig {
                name: "ok".into(),
                listen_port: PortValue::from(1000),
                dest: "h:1".into(),
            },
            GroupConfig {
                name: "broken".into(),
                listen_port: PortValue::from(1001),
                dest: "no-port".into(),
            },
        ],
    }];

    let msg = invalid_message(batch.create_config_groups(&groups).await.unwrap_err());
    assert!(msg.starts_with("group 1 item 2:"), "{msg}");

    let empty_group = vec![ConfigGroup {
        endpoint_id: h.endpoint.id,
        configs: vec![],
    }];
    assert_eq!(
        batch.create_config_groups(&empty_group).await.unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[tokio::test]
async fn test_batch_delete_reports_unresolvable_refs() {
    let h = Harness::new().await;
    let batch = BatchExecutor::new(h.orchestrator.clone());
    batch
        .create_standard(&[item(h.endpoint.id, "a", 9001), item(h.endpoint.id, "b", 9002)])
        .await
        .unwrap();
    let rows = Tunnel::find()
        .order_by_asc(tunnel::Column::Name)
        .all(&h.db)
        .await
        .unwrap();
    let (a, b) = (&rows[0], &rows[1]);

    let outcome = batch
        .delete(
            &[
                TunnelRef::Local(a.id),
                TunnelRef::Local(404),
                TunnelRef::Instance(b.instance_id.clone().unwrap()),
            ],
            true,
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.fail_count, 1);
    assert!(outcome.results[0].success);
    assert_eq!(outcome.results[0].instance_id.as_deref(), a.instance());
    assert!(!outcome.results[1].success);
    assert_eq!(outcome.results[1].identifier, "tunnel 404");
    assert!(outcome.results[2].success);

    assert_eq!(Tunnel::find().count(&h.db).await.unwrap(), 0);
    assert_eq!(TunnelRecycle::find().count(&h.db).await.unwrap(), 2);
}

#[tokio::test]
async fn test_duplicate_names_rejected_before_any_agent_call() {
    let h = Harness::new().await;
    let batch = BatchExecutor::new(h.orchestrator.clone());

    let items = vec![
        item(h.endpoint.id, "dup", 9001),
        item(h.endpoint.id, " dup", 9002),
    ];
    let msg = invalid_message(batch.create_standard(&items).await.unwrap_err());
    assert!(msg.starts_with("item 2: duplicate name"), "{msg}");

    let group = |name: &str, port: u16| ConfigGroup {
        endpoint_id: h.endpoint.id,
        configs: vec![GroupConfig {
            name: name.into(),
            listen_port: PortValue::from(port),
            dest: "10.0.0.7:5432".into(),
        }],
    };
    let msg = invalid_message(
        batch
            .create_config_groups(&[group("pg", 15432), group("pg", 15433)])
            .await
            .unwrap_err(),
    );
    assert!(msg.starts_with("group 2 item 1: duplicate name"), "{msg}");

    assert!(h.agent.calls().is_empty());
    assert_eq!(Tunnel::find().count(&h.db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_batch_delete_targets_each_tunnel_once() {
    let h = Harness::new().await;
    let batch = BatchExecutor::new(h.orchestrator.clone());
    batch
        .create_standard(&[item(h.endpoint.id, "a", 9001)])
        .await
        .unwrap();
    let row = Tunnel::find().one(&h.db).await.unwrap().unwrap();

    let outcome = batch
        .delete(
            &[
                TunnelRef::Local(row.id),
                TunnelRef::Instance(row.instance_id.clone().unwrap()),
            ],
            true,
        )
        .await
        .unwrap();

    assert!(outcome.results[0].success, "{:?}", outcome.results[0]);
    assert!(!outcome.results[1].success);
    assert!(outcome.results[1]
        .error
        .as_deref()
        .unwrap()
        .contains("duplicate of item 1"));

    let deletes = h
        .agent
        .calls()
        .iter()
        .filter(|c| c.starts_with("delete "))
        .count();
    assert_eq!(deletes, 1);
    assert_eq!(TunnelRecycle::find().count(&h.db).await.unwrap(), 1);
}
