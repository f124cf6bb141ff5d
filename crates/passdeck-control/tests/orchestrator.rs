//! Lifecycle tests against an in-memory store and a fake agent

mod common;

use std::time::Duration;

use common::{insert_pending, Harness};
use passdeck_agent::{AgentEvent, AgentEventKind, AgentInstance};
use passdeck_control::normalizer::{
    CreateRequest, PortValue, RoleDescriptor, StructuredCreate, TemplateKind, TemplateRequest,
};
use passdeck_control::{
    CreateCommand, CreatedTunnels, ErrorKind, ControlError, OperationStatus, PairStep,
    ReplacePhase, TunnelRef,
};
use passdeck_store::entities::tunnel::{LogLevel, TlsMode, TunnelMode, TunnelStatus};
use passdeck_store::entities::{Tunnel, TunnelRecycle};
use sea_orm::{EntityTrait, PaginatorTrait};

fn command(name: &str, endpoint_id: i32, port: u16) -> CreateCommand {
    CreateCommand {
        name: name.to_string(),
        endpoint_id,
        mode: TunnelMode::Server,
        tunnel_address: String::new(),
        tunnel_port: port,
        target_address: "127.0.0.1".to_string(),
        target_port: 8080,
        tls_mode: TlsMode::Off,
        cert_path: None,
        key_path: None,
        log_level: Some(LogLevel::Info),
        min_concurrency: None,
        max_concurrency: None,
    }
}

fn edit_request(endpoint_id: i32, port: u16) -> StructuredCreate {
    StructuredCreate {
        endpoint_id: Some(endpoint_id),
        mode: Some("client".into()),
        tunnel_port: Some(PortValue::from(port)),
        target_address: Some("10.0.0.2".into()),
        target_port: Some(PortValue::from("22")),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_persists_agent_view() {
    let h = Harness::new().await;

    let row = h
        .orchestrator
        .create_tunnel(&command(" web ", h.endpoint.id, 10000))
        .await
        .expect("create");

    assert_eq!(row.name, "web");
    assert_eq!(row.instance(), Some("inst-1"));
    assert_eq!(row.status, TunnelStatus::Running);
    assert_eq!(row.command_line, "server://:10000/127.0.0.1:8080?log=info");
    assert_eq!(
        h.agent.calls(),
        ["create server://:10000/127.0.0.1:8080?log=info"]
    );

    let audit = h.orchestrator.audit().recent(10).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, "create");
    assert_eq!(audit[0].status, OperationStatus::Success);
    assert_eq!(audit[0].tunnel_id, Some(row.id));
}

#[tokio::test]
async fn test_create_rejection_keeps_message_and_stores_nothing() {
    let h = Harness::new().await;
    h.agent.reject_create_if(":10101", "port 10101 already in use");

    let err = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10101))
        .await
        .unwrap_err();

    match &err {
        ControlError::RemoteFailure(msg) => assert_eq!(msg, "port 10101 already in use"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(Tunnel::find().count(&h.db).await.unwrap(), 0);

    let audit = h.orchestrator.audit().recent(10).await.unwrap();
    assert_eq!(audit[0].status, OperationStatus::Failed);
    assert!(audit[0].message.as_deref().unwrap().contains("already in use"));
}

#[tokio::test]
async fn test_create_rejects_duplicate_name_and_unknown_endpoint() {
    let h = Harness::new().await;
    h.orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();

    let dup = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10001))
        .await
        .unwrap_err();
    assert_eq!(dup.kind(), ErrorKind::InvalidArgument);

    let missing = h
        .orchestrator
        .create_tunnel(&command("other", 999, 10002))
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    // only the first create reached the agent
    assert_eq!(h.agent.calls().len(), 1);
}

#[tokio::test]
async fn test_quick_create() {
    let h = Harness::new().await;

    let row = h
        .orchestrator
        .quick_create(h.endpoint.id, "quick", "client://:8080/host:9090?log=info")
        .await
        .expect("quick create");
    assert_eq!(row.mode, TunnelMode::Client);
    assert_eq!(row.tunnel_port, 8080);
    assert_eq!(row.target_address, "host");
    assert_eq!(row.target_port, 9090);
    assert_eq!(row.log_level, Some(LogLevel::Info));

    let bad = h
        .orchestrator
        .quick_create(h.endpoint.id, "bad", "client://:8080")
        .await
        .unwrap_err();
    assert_eq!(bad.kind(), ErrorKind::InvalidArgument);
    assert_eq!(h.orchestrator.audit().recent(10).await.unwrap().len(), 2);
}

fn template(server_ep: i32, client_ep: i32) -> TemplateRequest {
    TemplateRequest {
        mode: TemplateKind::Bothway,
        listen_host: None,
        listen_port: PortValue::from(7000),
        log: Some("debug".into()),
        tls: 0,
        cert_path: None,
        key_path: None,
        inbounds: Some(RoleDescriptor {
            role: Some("client".into()),
            endpoint_id: client_ep,
            target_host: "127.0.0.1".into(),
            target_port: PortValue::from(3389),
        }),
        outbounds: Some(RoleDescriptor {
            role: Some("server".into()),
            endpoint_id: server_ep,
            target_host: "127.0.0.1".into(),
            target_port: PortValue::from(13389),
        }),
    }
}

#[tokio::test]
async fn test_template_creates_server_then_client() {
    let h = Harness::new().await;
    let office = h.add_endpoint("office", "http://192.168.1.20:3000/").await;

    let created = h
        .orchestrator
        .create_from_request(&CreateRequest::Template(template(h.endpoint.id, office.id)))
        .await
        .expect("pair create");

    let CreatedTunnels::Pair { server, client } = created else {
        panic!("expected a pair");
    };
    assert_eq!(server.endpoint_id, h.endpoint.id);
    assert_eq!(server.command_line, "server://:7000/127.0.0.1:13389?log=debug");
    assert_eq!(client.endpoint_id, office.id);
    assert_eq!(client.tunnel_address, "edge.example.com");
    assert_eq!(
        client.command_line,
        "client://edge.example.com:7000/127.0.0.1:3389?log=debug"
    );

    let calls = h.agent.calls();
    assert!(calls[0].starts_with("create server://"));
    assert!(calls[1].starts_with("create client://"));
}

#[tokio::test]
async fn test_template_client_failure_keeps_server() {
    let h = Harness::new().await;
    let office = h.add_endpoint("office", "http://192.168.1.20:3000").await;
    h.agent.reject_create_if("client://", "no route to server");

    let err = h
        .orchestrator
        .create_from_request(&CreateRequest::Template(template(h.endpoint.id, office.id)))
        .await
        .unwrap_err();

    match &err {
        ControlError::StepFailed { step, source } => {
            assert_eq!(*step, PairStep::Client);
            assert_eq!(source.kind(), ErrorKind::RemoteFailure);
        }
        other => panic!("unexpected {other:?}"),
    }
    let rows = Tunnel::find().all(&h.db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].mode, TunnelMode::Server);
}

#[tokio::test]
async fn test_template_server_failure_skips_client() {
    let h = Harness::new().await;
    let office = h.add_endpoint("office", "http://192.168.1.20:3000").await;
    h.agent.reject_create_if("server://", "port busy");

    let err = h
        .orchestrator
        .create_from_request(&CreateRequest::Template(template(h.endpoint.id, office.id)))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ControlError::StepFailed {
            step: PairStep::Server,
            ..
        }
    ));
    assert_eq!(h.agent.calls().len(), 1);
}

#[tokio::test]
async fn test_control_mirrors_reported_status() {
    let h = Harness::new().await;
    let row = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();

    let stopped = h
        .orchestrator
        .control_tunnel(&TunnelRef::Local(row.id), "STOP")
        .await
        .expect("stop");
    assert_eq!(stopped.status, TunnelStatus::Stopped);

    let started = h
        .orchestrator
        .control_tunnel(&TunnelRef::Instance("inst-1".into()), "start")
        .await
        .expect("start");
    assert_eq!(started.status, TunnelStatus::Running);

    let bad = h
        .orchestrator
        .control_tunnel(&TunnelRef::Local(row.id), "pause")
        .await
        .unwrap_err();
    assert_eq!(bad.kind(), ErrorKind::InvalidArgument);

    let missing = h
        .orchestrator
        .control_tunnel(&TunnelRef::Local(404), "stop")
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    assert_eq!(
        &h.agent.calls()[1..],
        ["control inst-1 stop", "control inst-1 start"]
    );
}

#[tokio::test]
async fn test_delete_and_wait_confirmed_with_recycle() {
    let h = Harness::new().await;
    let row = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();

    h.orchestrator
        .delete_tunnel_and_wait("inst-1", Duration::from_secs(2), true)
        .await
        .expect("delete confirmed");

    assert!(Tunnel::find_by_id(row.id).one(&h.db).await.unwrap().is_none());
    let archived = TunnelRecycle::find().all(&h.db).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].original_id, row.id);
    assert_eq!(archived[0].instance_id.as_deref(), Some("inst-1"));
    assert_eq!(h.orchestrator.hub().count(), 0);
}

#[tokio::test]
async fn test_delete_and_wait_times_out_but_finalizes() {
    let h = Harness::new().await;
    h.agent.silent_deletes();
    let row = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .delete_tunnel_and_wait("inst-1", Duration::from_millis(50), false)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(Tunnel::find_by_id(row.id).one(&h.db).await.unwrap().is_none());
    assert_eq!(TunnelRecycle::find().count(&h.db).await.unwrap(), 0);
    assert_eq!(h.orchestrator.hub().count(), 0);

    let audit = h.orchestrator.audit().recent(1).await.unwrap();
    assert_eq!(audit[0].action, "delete");
    assert_eq!(audit[0].status, OperationStatus::Timeout);
}

#[tokio::test]
async fn test_delete_rejected_by_agent_keeps_row() {
    let h = Harness::new().await;
    h.agent.reject_deletes("instance busy");
    let row = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .delete_tunnel_and_wait("inst-1", Duration::from_secs(1), true)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RemoteFailure);
    assert!(Tunnel::find_by_id(row.id).one(&h.db).await.unwrap().is_some());
    assert_eq!(h.orchestrator.hub().count(), 0);
}

#[tokio::test]
async fn test_delete_unknown_instance() {
    let h = Harness::new().await;
    let err = h
        .orchestrator
        .delete_tunnel_and_wait("ghost", Duration::from_millis(10), true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.agent.calls().is_empty());
}

#[tokio::test]
async fn test_rename() {
    let h = Harness::new().await;
    let row = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();
    h.orchestrator
        .create_tunnel(&command("db", h.endpoint.id, 10001))
        .await
        .unwrap();

    let renamed = h.orchestrator.rename_tunnel(row.id, "  www  ").await.unwrap();
    assert_eq!(renamed.name, "www");
    assert_eq!(renamed.instance_id, row.instance_id);

    let empty = h.orchestrator.rename_tunnel(row.id, "   ").await.unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::InvalidArgument);

    let taken = h.orchestrator.rename_tunnel(row.id, "db").await.unwrap_err();
    assert_eq!(taken.kind(), ErrorKind::InvalidArgument);

    let missing = h.orchestrator.rename_tunnel(404, "x").await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    // rename never talks to the agent
    assert_eq!(h.agent.calls().len(), 2);
}

#[tokio::test]
async fn test_edit_replaces_tunnel() {
    let h = Harness::new().await;
    let old = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();

    let new = h
        .orchestrator
        .edit_tunnel(old.id, &edit_request(h.endpoint.id, 10022))
        .await
        .expect("edit");

    assert_ne!(new.id, old.id);
    assert_eq!(new.name, "web");
    assert_eq!(new.mode, TunnelMode::Client);
    assert_eq!(new.command_line, "client://:10022/10.0.0.2:22");
    assert_eq!(TunnelRecycle::find().count(&h.db).await.unwrap(), 1);
    assert_eq!(
        h.agent.calls()[1..],
        ["delete inst-1", "create client://:10022/10.0.0.2:22"]
    );
}

#[tokio::test]
async fn test_edit_create_failure_is_create_phase_and_old_is_gone() {
    let h = Harness::new().await;
    let old = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();
    h.agent.reject_create_if(":20000", "port 20000 busy");

    let err = h
        .orchestrator
        .edit_tunnel(old.id, &edit_request(h.endpoint.id, 20000))
        .await
        .unwrap_err();

    match &err {
        ControlError::ReplaceFailed { phase, source } => {
            assert_eq!(*phase, ReplacePhase::Create);
            assert_eq!(source.kind(), ErrorKind::RemoteFailure);
        }
        other => panic!("unexpected {other:?}"),
    }

    let resolved = h.orchestrator.resolver().resolve_instance_id(old.id).await;
    assert_eq!(resolved.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(Tunnel::find().count(&h.db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_edit_rejects_partial_payload_before_deleting() {
    let h = Harness::new().await;
    let old = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();

    let partial = StructuredCreate {
        name: "renamed".into(),
        ..Default::default()
    };
    let err = h.orchestrator.edit_tunnel(old.id, &partial).await.unwrap_err();

    assert!(matches!(
        err,
        ControlError::ReplaceFailed {
            phase: ReplacePhase::Resolve,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(Tunnel::find_by_id(old.id).one(&h.db).await.unwrap().is_some());
    assert_eq!(h.agent.calls().len(), 1);
}

#[tokio::test]
async fn test_edit_delete_timeout_aborts_before_create() {
    let h = Harness::with_config(passdeck_control::ControlConfig {
        delete_timeout_ms: 50,
        ..Default::default()
    })
    .await;
    h.agent.silent_deletes();
    let old = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .edit_tunnel(old.id, &edit_request(h.endpoint.id, 10022))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ControlError::ReplaceFailed {
            phase: ReplacePhase::Delete,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(h.agent.calls().len(), 2);
}

#[tokio::test]
async fn test_resolve_instance_id_on_empty_instance() {
    let h = Harness::new().await;
    let pending = insert_pending(&h.db, h.endpoint.id, "pending").await;

    let resolver = h.orchestrator.resolver();
    assert_eq!(
        resolver.resolve_instance_id(pending.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        resolver.resolve_instance_id(404).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        resolver.resolve_tunnel_id("").await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn test_control_refuses_tunnel_without_instance() {
    let h = Harness::new().await;
    let pending = insert_pending(&h.db, h.endpoint.id, "pending").await;

    let err = h
        .orchestrator
        .control_tunnel(&TunnelRef::Local(pending.id), "stop")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.agent.calls().is_empty());

    let row = Tunnel::find_by_id(pending.id).one(&h.db).await.unwrap().unwrap();
    assert_eq!(row.status, TunnelStatus::Stopped);
    let audit = h.orchestrator.audit().recent(1).await.unwrap();
    assert_eq!(audit[0].status, OperationStatus::Failed);
}

#[tokio::test]
async fn test_blank_instance_id_from_agent_is_remote_failure() {
    let h = Harness::new().await;
    h.agent.blank_instance_ids();

    let err = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RemoteFailure);
    assert_eq!(Tunnel::find().count(&h.db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_racing_creates_with_same_name_leave_no_unrecorded_instance() {
    let h = Harness::new().await;
    // both creates pass the name check before either row is stored
    h.agent.delay_create_if(":1000", Duration::from_millis(50));

    let cmd_a = command("web", h.endpoint.id, 10001);
    let cmd_b = command("web", h.endpoint.id, 10002);
    let (a, b) = tokio::join!(
        h.orchestrator.create_tunnel(&cmd_a),
        h.orchestrator.create_tunnel(&cmd_b),
    );
    let (stored, err) = match (a, b) {
        (Ok(row), Err(e)) | (Err(e), Ok(row)) => (row, e),
        other => panic!("expected one success and one failure, got {other:?}"),
    };
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let orphan = if stored.instance() == Some("inst-1") {
        "inst-2"
    } else {
        "inst-1"
    };
    let deletes: Vec<_> = h
        .agent
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("delete "))
        .collect();
    assert_eq!(deletes, [format!("delete {orphan}")]);

    let rows = Tunnel::find().all(&h.db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, stored.id);
}

#[tokio::test]
async fn test_overlapping_deletes_of_one_instance() {
    let h = Harness::new().await;
    h.agent.silent_deletes();
    h.orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();

    let timeout = Duration::from_millis(200);
    let (a, b) = tokio::join!(
        h.orchestrator.delete_tunnel_and_wait("inst-1", timeout, true),
        h.orchestrator.delete_tunnel_and_wait("inst-1", timeout, true),
    );

    // the replaced wait ends early as a conflict, never as a timeout
    let mut kinds = vec![a.unwrap_err().kind(), b.unwrap_err().kind()];
    kinds.sort_by_key(|k| format!("{k:?}"));
    assert_eq!(kinds, [ErrorKind::Conflict, ErrorKind::Timeout]);

    assert_eq!(Tunnel::find().count(&h.db).await.unwrap(), 0);
    assert_eq!(TunnelRecycle::find().count(&h.db).await.unwrap(), 1);
    assert_eq!(h.orchestrator.hub().count(), 0);
}

#[tokio::test]
async fn test_list_tunnels_by_id_with_mirrored_counters() {
    let h = Harness::new().await;
    let office = h.add_endpoint("office", "http://192.168.1.20:3000").await;
    let web = h
        .orchestrator
        .create_tunnel(&command("web", h.endpoint.id, 10000))
        .await
        .unwrap();
    let rdp = h
        .orchestrator
        .create_tunnel(&command("rdp", office.id, 13389))
        .await
        .unwrap();
    let db = h
        .orchestrator
        .create_tunnel(&command("db", h.endpoint.id, 15432))
        .await
        .unwrap();

    let update = AgentEvent {
        kind: AgentEventKind::Update,
        time: None,
        instance: Some(AgentInstance {
            id: rdp.instance().unwrap().to_string(),
            status: Some("stopped".into()),
            tcp_rx: Some(4096),
            ..Default::default()
        }),
        logs: None,
    };
    h.orchestrator.ingestor().apply(office.id, &update).await.unwrap();

    let all = h.orchestrator.list_tunnels(None).await.unwrap();
    let ids: Vec<_> = all.iter().map(|t| t.id).collect();
    assert_eq!(ids, [web.id, rdp.id, db.id]);
    assert_eq!(all[1].status, TunnelStatus::Stopped);
    assert_eq!(all[1].tcp_rx, 4096);

    let office_only = h.orchestrator.list_tunnels(Some(office.id)).await.unwrap();
    assert_eq!(office_only.len(), 1);
    assert_eq!(office_only[0].name, "rdp");

    assert!(h.orchestrator.list_tunnels(Some(404)).await.unwrap().is_empty());
}
