//! Integration tests: parse → emit → re-parse round-trip.
//!
//! Verifies that no data is lost when converting notation → Diagram → notation.

use dgm_core::emitter::emit_diagram;
use dgm_core::geometry::{Direction, Rect};
use dgm_core::id::{ConnectorId, DiagramId, ShapeId};
use dgm_core::model::*;
use dgm_core::parser::parse_diagram;
use pretty_assertions::assert_eq;

// ─── Helpers ─────────────────────────────────────────────────────────────

/// Parse, emit, re-parse, and compare the full content.
fn assert_roundtrip_preserves(input: &str) -> Diagram {
    let first = parse_diagram(input).expect("first parse failed");
    let emitted = emit_diagram(&first);
    let second = parse_diagram(&emitted)
        .unwrap_or_else(|e| panic!("re-parse failed: {e}\nEmitted:\n{emitted}"));

    assert_eq!(first.id, second.id);
    assert_eq!(first.kind, second.kind);
    assert_eq!(first.shape_ids(), second.shape_ids(), "document order changed");
    assert_eq!(first.snapshot(), second.snapshot());

    // Emitting again is stable.
    assert_eq!(emitted, emit_diagram(&second));
    second
}

// ─── Fixture-based tests ─────────────────────────────────────────────────

#[test]
fn roundtrip_order_process() {
    let d = assert_roundtrip_preserves(include_str!("fixtures/order_process.dgm"));
    assert_eq!(d.shape_count(), 9);
    assert_eq!(d.connector_count(), 5);

    let memo = d.shape(ShapeId::intern("memo")).unwrap();
    assert_eq!(
        memo.payload,
        ShapePayload::Note {
            text: "Escalate orders over \"10k\"\nto finance".into()
        }
    );

    let fast = d.connector(ConnectorId::intern("c_fast")).unwrap();
    assert_eq!(fast.kind, ConnectorKind::Association);
    assert_eq!(fast.routing, RoutingStyle::Straight);
    assert_eq!(fast.end_marker, Marker::OpenArrow);
    assert_eq!(fast.line_style, LineStyle::Dashed);
    assert_eq!(fast.z_order, 3);
    assert_eq!(fast.label.as_deref(), Some("fast lane"));
}

#[test]
fn roundtrip_class_model() {
    let d = assert_roundtrip_preserves(include_str!("fixtures/class_model.dgm"));
    let ShapePayload::Class { operations, .. } =
        &d.shape(ShapeId::intern("account")).unwrap().payload
    else {
        panic!("expected class payload");
    };
    assert_eq!(operations[0].name, "deposit(amount: Money)");
    assert_eq!(operations[0].type_name.as_deref(), Some("Receipt"));
    assert_eq!(operations[1].type_name, None);
    assert_eq!(
        d.children(ShapeId::intern("domain")),
        vec![
            ShapeId::intern("account"),
            ShapeId::intern("savings"),
            ShapeId::intern("audited")
        ]
    );
}

#[test]
fn roundtrip_er_schema() {
    let d = assert_roundtrip_preserves(include_str!("fixtures/er_schema.dgm"));
    let ShapePayload::Entity { attributes } =
        &d.shape(ShapeId::intern("address")).unwrap().payload
    else {
        panic!("expected entity payload");
    };
    assert!(attributes[0].primary_key && attributes[0].foreign_key);
}

#[test]
fn roundtrip_sequence() {
    let d = assert_roundtrip_preserves(include_str!("fixtures/sequence.dgm"));
    assert_eq!(
        d.shape(ShapeId::intern("work")).unwrap().parent,
        Some(ShapeId::intern("paid"))
    );
}

#[test]
fn roundtrip_nested_pool_with_group() {
    assert_roundtrip_preserves(include_str!("fixtures/nested_pool.dgm"));
}

// ─── Cache ───────────────────────────────────────────────────────────────

#[test]
fn exported_notation_cache_refreshes_after_mutation() {
    let mut d = parse_diagram(include_str!("fixtures/detour.dgm")).unwrap();
    assert!(d.cached_notation().is_none());
    let text = d.exported_notation().to_string();
    assert_eq!(d.cached_notation(), Some(text.as_str()));

    let removed = d.remove_connectors(&[ConnectorId::intern("across")]);
    assert_eq!(removed.len(), 1);
    assert!(d.cached_notation().is_none());
    assert!(!d.exported_notation().contains("#across"));
}

// ─── Inline edge cases ───────────────────────────────────────────────────

#[test]
fn connector_without_id_gets_generated_one() {
    let input = "diagram @gen process\n\
                 task.task @a \"\" [0, 0, 10, 10]\n\
                 task.task @b \"\" [50, 0, 10, 10]\n\
                 @a.east -> @b.west flow orthogonal\n";
    let d = parse_diagram(input).unwrap();
    assert_eq!(d.connector_count(), 1);
    assert!(d.connectors()[0].id.as_str().starts_with("conn_"));
}

#[test]
fn generated_connector_ids_avoid_explicit_ones_declared_later() {
    // The next few generated ids are all claimed further down the file.
    let serial: u64 = ConnectorId::with_prefix("conn")
        .as_str()
        .trim_start_matches("conn_")
        .parse()
        .unwrap();
    let mut input = String::from(
        "diagram @gen_taken process\n\
         task.task @a \"\" [0, 0, 10, 10]\n\
         task.task @b \"\" [50, 0, 10, 10]\n\
         @a.east -> @b.west flow orthogonal\n",
    );
    for n in serial + 1..=serial + 8 {
        input.push_str(&format!("@a.south -> @b.south flow orthogonal #conn_{n}\n"));
    }

    let d = parse_diagram(&input).unwrap();
    assert_eq!(d.connector_count(), 9);
    let generated = d.connectors()[0].id;
    assert!(generated.as_str().starts_with("conn_"));
    assert_eq!(d.connectors().iter().filter(|c| c.id == generated).count(), 1);
}

#[test]
fn hyphenated_ids_roundtrip() {
    let input = "diagram @d-1 process\n\
                 task.task @3f2a-11 \"\" [0, 0, 10, 10]\n\
                 task.task @9c4e-02 \"\" [50, 0, 10, 10]\n\
                 @3f2a-11.east -> @9c4e-02.west flow orthogonal #e7-01\n";
    let d = assert_roundtrip_preserves(input);
    assert_eq!(d.id, DiagramId::intern("d-1"));
    assert!(d.contains_shape(ShapeId::intern("3f2a-11")));
    assert!(d.contains_connector(ConnectorId::intern("e7-01")));
}

#[test]
fn arbitrary_stored_ids_are_quoted_and_roundtrip() {
    let mut d = Diagram::new(DiagramId::intern("team board.v2"), DiagramKind::Process);
    for (id, x) in [("intake form", 0.0), ("a.b", 100.0)] {
        d.insert_shape(
            Shape::new(ShapeId::intern(id), ShapeType::Task, Rect::new(x, 0.0, 40.0, 20.0)),
            None,
        )
        .unwrap();
    }
    d.insert_connector(
        Connector::new(
            ConnectorId::intern("link #1"),
            ConnectorKind::Flow,
            Endpoint::new(ShapeId::intern("intake form"), ConnectionPoint::side(Direction::East)),
            Endpoint::new(ShapeId::intern("a.b"), ConnectionPoint::side(Direction::West)),
        ),
        None,
    )
    .unwrap();

    let text = emit_diagram(&d);
    assert!(text.starts_with("diagram @\"team board.v2\" process"));
    let parsed = assert_roundtrip_preserves(&text);
    assert_eq!(parsed.snapshot(), d.snapshot());
}

#[test]
fn interleaved_containers_normalize_to_preorder() {
    let mut d = Diagram::new(DiagramId::intern("interleaved"), DiagramKind::Process);
    let shapes = [
        Shape::new(ShapeId::intern("p1"), ShapeType::Pool, Rect::new(0.0, 0.0, 300.0, 100.0)),
        Shape::new(ShapeId::intern("p2"), ShapeType::Pool, Rect::new(0.0, 200.0, 300.0, 100.0)),
        Shape::new(ShapeId::intern("t"), ShapeType::Task, Rect::new(10.0, 10.0, 50.0, 30.0))
            .with_parent(ShapeId::intern("p1")),
    ];
    for shape in shapes {
        d.insert_shape(shape, None).unwrap();
    }

    let parsed = parse_diagram(&emit_diagram(&d)).unwrap();
    let ids = |names: &[&str]| names.iter().map(|n| ShapeId::intern(n)).collect::<Vec<_>>();
    assert_eq!(d.shape_ids(), ids(&["p1", "p2", "t"]).as_slice());
    assert_eq!(parsed.shape_ids(), ids(&["p1", "t", "p2"]).as_slice());
    for shape in d.shapes() {
        assert_eq!(parsed.shape(shape.id), Some(shape));
    }
    assert_eq!(parsed.children(ShapeId::intern("p1")), ids(&["t"]));

    // The normalized form is a fixed point.
    assert_eq!(emit_diagram(&parsed), emit_diagram(&d));
}

#[test]
fn fractional_geometry_survives() {
    let input = "diagram @frac class\nnote.note @n \"\" [0.25, -12.5, 100.125, 3]\n";
    let d = assert_roundtrip_preserves(input);
    let n = d.shape(ShapeId::intern("n")).unwrap();
    assert_eq!(n.bounds.x, 0.25);
    assert_eq!(n.bounds.y, -12.5);
    assert_eq!(n.bounds.width, 100.125);
}
