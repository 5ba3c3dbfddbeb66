//! Integration tests: local working copy ↔ store synchronization.

use dgm_core::geometry::Rect;
use dgm_core::id::{ConnectorId, DiagramId, ShapeId};
use dgm_core::model::*;
use dgm_core::parser::parse_diagram;
use dgm_editor::cascade::DeleteShapeCommand;
use dgm_editor::commands::{
    AddShapeCommand, ConnectorPatch, MoveShapeCommand, ShapePatch, UpdateShapeCommand,
};
use dgm_editor::config::EditorConfig;
use dgm_editor::error::{EditorError, StoreError};
use dgm_editor::store::{DiagramStore, InMemoryStore};
use dgm_editor::sync::SyncEngine;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::time::Instant;

// ─── Helpers ────────────────────────────────────────────────────────────

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn workflow() -> Diagram {
    parse_diagram(include_str!("fixtures/workflow.dgm")).unwrap()
}

fn container() -> Diagram {
    parse_diagram(include_str!("fixtures/container.dgm")).unwrap()
}

async fn engine_with(diagrams: &[&Diagram]) -> SyncEngine<InMemoryStore> {
    init_logger();
    let store = InMemoryStore::new();
    for d in diagrams {
        store.put_diagram(d).unwrap();
    }
    let mut engine = SyncEngine::new(store, EditorConfig::default());
    for d in diagrams {
        engine.open(d.id).await.unwrap();
    }
    engine.store().clear_calls();
    engine
}

async fn stored(engine: &SyncEngine<InMemoryStore>, id: DiagramId) -> Diagram {
    engine.store().get_diagram(id).await.unwrap()
}

fn task(id: &str) -> Shape {
    Shape::new(ShapeId::intern(id), ShapeType::Task, Rect::new(0.0, 500.0, 80.0, 40.0))
}

// ─── Seeding & refresh ──────────────────────────────────────────────────

#[tokio::test]
async fn open_seeds_once_and_keeps_local_copy() {
    let original = workflow();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;

    engine
        .execute(id, Box::new(AddShapeCommand::new(task("extra"))))
        .await
        .unwrap();

    // Someone else overwrites the stored copy.
    engine.store().put_diagram(&original).unwrap();

    let local = engine.open(id).await.unwrap();
    assert!(local.contains_shape(ShapeId::intern("extra")));
    assert!(!engine.store().calls().contains(&"get_diagram".to_string()));
}

#[tokio::test]
async fn refresh_replaces_local_copy_and_resets_history() {
    let original = workflow();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;

    engine
        .execute(id, Box::new(AddShapeCommand::new(task("extra"))))
        .await
        .unwrap();
    engine
        .update_local_shape(id, ShapeId::intern("fix"), &ShapePatch::label("Local"), Instant::now())
        .unwrap();
    engine.store().put_diagram(&original).unwrap();

    let local = engine.refresh(id).await.unwrap();
    assert_eq!(local.snapshot(), original.snapshot());
    assert_eq!(engine.pending_count(id), 0);
    assert!(!engine.history().can_undo(id));
    assert_eq!(engine.undo(id).await.unwrap(), None);
}

#[tokio::test]
async fn opening_a_missing_diagram_fails() {
    let mut engine = engine_with(&[]).await;
    let err = engine.open(DiagramId::intern("missing_diagram")).await.unwrap_err();
    assert!(matches!(err, EditorError::Persistence(StoreError::NotFound(_))));
    assert!(!engine.is_open(DiagramId::intern("missing_diagram")));
}

// ─── Commands ───────────────────────────────────────────────────────────

#[tokio::test]
async fn commands_persist_in_order_and_stay_in_step() {
    let original = workflow();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;

    engine
        .execute(id, Box::new(AddShapeCommand::new(task("extra"))))
        .await
        .unwrap();
    engine
        .execute(id, Box::new(MoveShapeCommand::new(ShapeId::intern("tier1"), 0.0, 10.0)))
        .await
        .unwrap();
    engine
        .execute(id, Box::new(DeleteShapeCommand::new(ShapeId::intern("draft"))))
        .await
        .unwrap();
    assert_eq!(
        engine.store().calls(),
        vec![
            "add_shape",
            "update_shapes",
            "delete_connectors",
            "delete_shapes",
            "delete_shape"
        ]
    );
    assert_eq!(
        stored(&engine, id).await.snapshot(),
        engine.local(id).unwrap().snapshot()
    );

    for _ in 0..3 {
        assert!(engine.undo(id).await.unwrap().is_some());
    }
    assert_eq!(stored(&engine, id).await.snapshot(), original.snapshot());

    assert_eq!(engine.redo(id).await.unwrap().as_deref(), Some("add task extra"));
    assert_eq!(
        stored(&engine, id).await.snapshot(),
        engine.local(id).unwrap().snapshot()
    );
}

#[tokio::test]
async fn persistence_failure_keeps_local_edit_and_history() {
    let original = workflow();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;
    engine.store().set_unavailable(true);

    let err = engine
        .execute(
            id,
            Box::new(UpdateShapeCommand::new(ShapeId::intern("fix"), ShapePatch::label("Offline"))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EditorError::Persistence(StoreError::Unavailable(_))));
    assert_eq!(engine.local(id).unwrap().shape(ShapeId::intern("fix")).unwrap().label, "Offline");
    assert_eq!(engine.history().undo_description(id).as_deref(), Some("update fix"));

    engine.store().set_unavailable(false);
    assert_eq!(
        stored(&engine, id).await.shape(ShapeId::intern("fix")).unwrap().label,
        "Fix"
    );

    // Undo still works locally and writes the prior value back.
    engine.undo(id).await.unwrap();
    assert_eq!(engine.local(id).unwrap().snapshot(), original.snapshot());
    assert_eq!(stored(&engine, id).await.snapshot(), original.snapshot());
}

#[tokio::test]
async fn unsent_cascade_is_retried_in_order() {
    let original = container();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;
    engine.store().set_unavailable(true);

    let err = engine
        .execute(id, Box::new(DeleteShapeCommand::new(ShapeId::intern("a"))))
        .await
        .unwrap_err();
    assert!(matches!(err, EditorError::Persistence(StoreError::Unavailable(_))));
    assert_eq!(engine.unsent_ops(id), 3);

    // Later commands queue behind the unsent cascade.
    assert!(
        engine
            .execute(id, Box::new(MoveShapeCommand::new(ShapeId::intern("after"), 10.0, 0.0)))
            .await
            .is_err()
    );
    assert_eq!(engine.unsent_ops(id), 4);

    engine.store().set_unavailable(false);
    engine.store().clear_calls();
    assert_eq!(engine.retry_pending_ops(id).await.unwrap(), 4);
    assert_eq!(
        engine.store().calls(),
        vec!["delete_connector", "delete_shapes", "delete_shape", "update_shape"]
    );
    assert_eq!(engine.unsent_ops(id), 0);
    assert_eq!(
        stored(&engine, id).await.snapshot(),
        engine.local(id).unwrap().snapshot()
    );

    for _ in 0..2 {
        engine.undo(id).await.unwrap();
    }
    assert_eq!(stored(&engine, id).await.snapshot(), original.snapshot());
    assert_eq!(engine.retry_pending_ops(id).await.unwrap(), 0);
}

#[tokio::test]
async fn flush_sends_unsent_ops_before_debounced_edits() {
    let original = container();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;
    engine.store().set_unavailable(true);
    assert!(
        engine
            .execute(id, Box::new(DeleteShapeCommand::new(ShapeId::intern("c"))))
            .await
            .is_err()
    );
    engine
        .update_local_shape(id, ShapeId::intern("b"), &ShapePatch::label("Bee"), Instant::now())
        .unwrap();

    engine.store().set_unavailable(false);
    engine.store().clear_calls();
    assert_eq!(engine.flush(id).await.unwrap(), 1);
    assert_eq!(
        engine.store().calls(),
        vec!["delete_connector", "delete_shape", "update_shape"]
    );
    assert_eq!(
        stored(&engine, id).await.snapshot(),
        engine.local(id).unwrap().snapshot()
    );
}

#[tokio::test]
async fn invalid_command_is_rejected_before_the_store() {
    let original = workflow();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;

    let err = engine
        .execute(id, Box::new(AddShapeCommand::new(task("fix"))))
        .await
        .unwrap_err();
    assert!(matches!(err, EditorError::Command(_)));
    assert!(engine.store().calls().is_empty());
    assert!(!engine.history().can_undo(id));
}

#[tokio::test]
async fn diagrams_are_independent() {
    let first = workflow();
    let second = container();
    let mut engine = engine_with(&[&first, &second]).await;

    engine
        .execute(first.id, Box::new(DeleteShapeCommand::new(ShapeId::intern("tip"))))
        .await
        .unwrap();
    engine
        .execute(second.id, Box::new(DeleteShapeCommand::new(ShapeId::intern("a"))))
        .await
        .unwrap();

    engine.undo(second.id).await.unwrap();
    assert_eq!(engine.local(second.id).unwrap().snapshot(), second.snapshot());
    assert!(!engine.local(first.id).unwrap().contains_shape(ShapeId::intern("tip")));
    assert!(!stored(&engine, first.id).await.contains_shape(ShapeId::intern("tip")));
}

#[tokio::test]
async fn gesture_batch_is_one_undo_step() {
    let original = container();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;

    engine.begin_batch(id).unwrap();
    for _ in 0..4 {
        engine
            .execute(id, Box::new(MoveShapeCommand::new(ShapeId::intern("after"), 10.0, 0.0)))
            .await
            .unwrap();
    }
    assert!(engine.end_batch(id).unwrap());
    assert_eq!(engine.store().calls().len(), 4);
    assert_eq!(
        stored(&engine, id).await.shape(ShapeId::intern("after")).unwrap().bounds.x,
        540.0
    );

    engine.undo(id).await.unwrap();
    assert_eq!(stored(&engine, id).await.snapshot(), original.snapshot());
    assert!(!engine.history().can_undo(id));
}

// ─── Debounced local edits ──────────────────────────────────────────────

#[tokio::test]
async fn continuous_edits_coalesce_into_one_write() {
    let original = workflow();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;
    let t0 = Instant::now();

    for (step, x) in [(0u64, 310.0), (100, 320.0), (200, 330.0)] {
        let patch = ShapePatch::bounds(Rect::new(x, 270.0, 140.0, 60.0));
        let applied = engine
            .update_local_shape(id, ShapeId::intern("fix"), &patch, t0 + Duration::from_millis(step))
            .unwrap();
        assert!(applied);
    }
    assert_eq!(engine.local(id).unwrap().shape(ShapeId::intern("fix")).unwrap().bounds.x, 330.0);
    assert_eq!(engine.pending_count(id), 1);
    assert_eq!(engine.next_flush_deadline(), Some(t0 + Duration::from_millis(500)));

    assert_eq!(engine.flush_due(t0 + Duration::from_millis(400)).await.unwrap(), 0);
    assert!(engine.store().calls().is_empty());

    assert_eq!(engine.flush_due(t0 + Duration::from_millis(500)).await.unwrap(), 1);
    assert_eq!(engine.store().calls(), vec!["update_shape"]);
    assert_eq!(
        stored(&engine, id).await.shape(ShapeId::intern("fix")).unwrap().bounds.x,
        330.0
    );
    assert!(!engine.history().can_undo(id), "local edits are not undo steps");
}

#[tokio::test]
async fn connector_edits_flush_on_demand() {
    let original = workflow();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;

    let patch = ConnectorPatch {
        label: Some(Some("hand over".into())),
        ..ConnectorPatch::default()
    };
    assert!(
        engine
            .update_local_connector(id, ConnectorId::intern("c_escalate"), &patch, Instant::now())
            .unwrap()
    );
    assert!(
        !engine
            .update_local_connector(id, ConnectorId::intern("missing"), &patch, Instant::now())
            .unwrap()
    );

    assert_eq!(engine.flush(id).await.unwrap(), 1);
    assert_eq!(engine.store().calls(), vec!["update_connector"]);
    let remote = stored(&engine, id).await;
    assert_eq!(
        remote.connector(ConnectorId::intern("c_escalate")).unwrap().label.as_deref(),
        Some("hand over")
    );
}

#[tokio::test]
async fn failed_flush_reschedules_the_edit() {
    let original = workflow();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;
    let t0 = Instant::now();

    engine
        .update_local_shape(id, ShapeId::intern("open"), &ShapePatch::label("New ticket"), t0)
        .unwrap();
    engine.store().set_unavailable(true);
    let err = engine.flush_due(t0 + Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, EditorError::Persistence(_)));
    assert_eq!(engine.pending_count(id), 1);

    engine.store().set_unavailable(false);
    assert_eq!(engine.flush_due(t0 + Duration::from_secs(2)).await.unwrap(), 1);
    assert_eq!(
        stored(&engine, id).await.shape(ShapeId::intern("open")).unwrap().label,
        "New ticket"
    );
}

#[tokio::test]
async fn cancelled_and_deleted_edits_are_not_written() {
    let original = workflow();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;
    let t0 = Instant::now();

    engine
        .update_local_shape(id, ShapeId::intern("survey"), &ShapePatch::label("Feedback"), t0)
        .unwrap();
    assert_eq!(engine.cancel_pending(id), 1);
    assert_eq!(engine.flush(id).await.unwrap(), 0);

    engine
        .update_local_shape(id, ShapeId::intern("tip"), &ShapePatch::label("Hint"), t0)
        .unwrap();
    engine
        .execute(id, Box::new(DeleteShapeCommand::new(ShapeId::intern("tip"))))
        .await
        .unwrap();
    engine.store().clear_calls();
    assert_eq!(engine.flush_due(t0 + Duration::from_secs(1)).await.unwrap(), 0);
    assert!(engine.store().calls().is_empty());
}

#[tokio::test]
async fn local_edit_validation() {
    let original = workflow();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;
    let now = Instant::now();

    assert!(
        !engine
            .update_local_shape(id, ShapeId::intern("ghost"), &ShapePatch::label("x"), now)
            .unwrap()
    );

    let lock = ShapePatch {
        locked: Some(true),
        ..ShapePatch::default()
    };
    engine.update_local_shape(id, ShapeId::intern("fix"), &lock, now).unwrap();
    let err = engine
        .update_local_shape(
            id,
            ShapeId::intern("fix"),
            &ShapePatch::bounds(Rect::new(0.0, 0.0, 1.0, 1.0)),
            now,
        )
        .unwrap_err();
    assert!(matches!(err, EditorError::Command(_)));

    let unknown = DiagramId::intern("not_open");
    assert_eq!(
        engine.update_local_shape(unknown, ShapeId::intern("fix"), &lock, now),
        Err(EditorError::UnknownDiagram(unknown))
    );
}

// ─── Derived views ──────────────────────────────────────────────────────

#[tokio::test]
async fn notation_and_routes_follow_the_local_copy() {
    let original = container();
    let id = original.id;
    let mut engine = engine_with(&[&original]).await;

    let text = engine.notation(id).unwrap().to_string();
    assert!(text.starts_with("diagram @scenario process"));
    assert_eq!(parse_diagram(&text).unwrap().snapshot(), original.snapshot());

    engine
        .execute(id, Box::new(DeleteShapeCommand::new(ShapeId::intern("a"))))
        .await
        .unwrap();
    let text = engine.notation(id).unwrap();
    assert!(!text.contains("#b_to_c"));
    assert!(text.contains("#bypass"));

    let routes = engine.routes(id).unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].0, ConnectorId::intern("bypass"));
    assert!(!routes[0].1.fallback);
}

#[tokio::test]
async fn config_drives_history_depth_and_debounce() {
    init_logger();
    let original = container();
    let id = original.id;
    let store = InMemoryStore::new();
    store.put_diagram(&original).unwrap();
    let config = EditorConfig::from_json(r#"{ "history_depth": 2, "debounce_ms": 50 }"#).unwrap();
    let mut engine = SyncEngine::new(store, config);
    engine.open(id).await.unwrap();

    for _ in 0..3 {
        engine
            .execute(id, Box::new(MoveShapeCommand::new(ShapeId::intern("c"), 1.0, 0.0)))
            .await
            .unwrap();
    }
    assert_eq!(engine.history().undo_depth(id), 2);

    let t0 = Instant::now();
    engine
        .update_local_shape(id, ShapeId::intern("b"), &ShapePatch::label("quick"), t0)
        .unwrap();
    assert_eq!(engine.next_flush_deadline(), Some(t0 + Duration::from_millis(50)));
}
