//! Emitter: Diagram → textual notation.
//!
//! Output round-trips through `parse_diagram`: top-level shapes in document
//! order with their children nested inside `{ }` blocks, then connectors.
//! Ids that are not bare identifiers are written quoted (`@"a b"`).
//!
//! Shapes come out in containment pre-order, which is also the order the
//! parser rebuilds. A document order where a container's children are not
//! contiguous right after it (shapes appended later into an earlier
//! container) is normalized to that pre-order; every shape, parent link and
//! connector is kept.

use crate::id::{ShapeId, is_bare_id};
use crate::model::*;
use std::fmt::Write;

/// Emit a `Diagram` as notation text.
#[must_use]
pub fn emit_diagram(diagram: &Diagram) -> String {
    let mut out = String::with_capacity(256 + diagram.shape_count() * 64);
    let _ = writeln!(out, "diagram @{} {}", id_text(diagram.id.as_str()), diagram.kind);

    let roots: Vec<ShapeId> = diagram
        .shapes()
        .filter(|s| s.parent.is_none_or(|p| !diagram.contains_shape(p)))
        .map(|s| s.id)
        .collect();
    if !roots.is_empty() {
        out.push('\n');
    }
    for id in roots {
        emit_shape(&mut out, diagram, id, 0);
    }

    if !diagram.connectors().is_empty() {
        out.push('\n');
    }
    for connector in diagram.connectors() {
        emit_connector(&mut out, connector);
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn emit_shape(out: &mut String, diagram: &Diagram, id: ShapeId, depth: usize) {
    let Some(shape) = diagram.shape(id) else {
        return;
    };
    indent(out, depth);
    let _ = write!(
        out,
        "{}.{} @{} {} [{}, {}, {}, {}]",
        shape.shape_type,
        shape.subtype,
        id_text(shape.id.as_str()),
        quote(&shape.label),
        format_num(shape.bounds.x),
        format_num(shape.bounds.y),
        format_num(shape.bounds.width),
        format_num(shape.bounds.height),
    );
    if shape.z_order != 0 {
        let _ = write!(out, " z: {}", shape.z_order);
    }
    if shape.locked {
        out.push_str(" locked");
    }

    let children = diagram.children(id);
    let mut props = String::new();
    emit_payload(&mut props, &shape.payload, depth + 1);
    if props.is_empty() && children.is_empty() {
        out.push('\n');
        return;
    }

    out.push_str(" {\n");
    out.push_str(&props);
    for child in children {
        emit_shape(out, diagram, child, depth + 1);
    }
    indent(out, depth);
    out.push_str("}\n");
}

fn emit_payload(out: &mut String, payload: &ShapePayload, depth: usize) {
    let prop = |out: &mut String, key: &str, value: &str| {
        indent(out, depth);
        let _ = writeln!(out, "{key}: {value}");
    };
    match payload {
        ShapePayload::Task { assignee } => {
            if let Some(a) = assignee {
                prop(out, "assignee", &quote(a));
            }
        }
        ShapePayload::Gateway { condition } => {
            if let Some(c) = condition {
                prop(out, "condition", &quote(c));
            }
        }
        ShapePayload::Class {
            stereotype,
            attributes,
            operations,
        } => {
            if let Some(s) = stereotype {
                prop(out, "stereotype", &quote(s));
            }
            for m in attributes {
                prop(out, "attribute", &quote(&member_text(m)));
            }
            for m in operations {
                prop(out, "operation", &quote(&member_text(m)));
            }
        }
        ShapePayload::Interface { operations } => {
            for m in operations {
                prop(out, "operation", &quote(&member_text(m)));
            }
        }
        ShapePayload::Fragment { guard } => {
            if let Some(g) = guard {
                prop(out, "guard", &quote(g));
            }
        }
        ShapePayload::Entity { attributes } => {
            for a in attributes {
                prop(out, "column", &quote(&column_text(a)));
            }
        }
        ShapePayload::Note { text } => {
            if !text.is_empty() {
                prop(out, "text", &quote(text));
            }
        }
        ShapePayload::Group {
            members,
            member_connectors,
        } => {
            if !members.is_empty() {
                let list: Vec<String> = members
                    .iter()
                    .map(|m| format!("@{}", id_text(m.as_str())))
                    .collect();
                prop(out, "members", &list.join(" "));
            }
            if !member_connectors.is_empty() {
                let list: Vec<String> = member_connectors
                    .iter()
                    .map(|c| format!("#{}", id_text(c.as_str())))
                    .collect();
                prop(out, "member_connectors", &list.join(" "));
            }
        }
        ShapePayload::Event
        | ShapePayload::Pool
        | ShapePayload::Lane
        | ShapePayload::Package
        | ShapePayload::Lifeline
        | ShapePayload::Activation
        | ShapePayload::Relationship => {}
    }
}

fn emit_connector(out: &mut String, c: &Connector) {
    let _ = write!(
        out,
        "@{}.{} -> @{}.{} {} {}",
        id_text(c.source.shape.as_str()),
        c.source.point,
        id_text(c.target.shape.as_str()),
        c.target.point,
        c.kind.as_str(),
        c.routing.as_str(),
    );
    // Only styling that differs from the kind's preset is written out.
    let (start, end, line) = c.kind.preset();
    if c.start_marker != start {
        let _ = write!(out, " start: {}", c.start_marker.as_str());
    }
    if c.end_marker != end {
        let _ = write!(out, " end: {}", c.end_marker.as_str());
    }
    if c.line_style != line {
        let _ = write!(out, " line: {}", c.line_style.as_str());
    }
    if let Some(label) = &c.label {
        let _ = write!(out, " {}", quote(label));
    }
    if c.z_order != 0 {
        let _ = write!(out, " z: {}", c.z_order);
    }
    let _ = writeln!(out, " #{}", id_text(c.id.as_str()));
}

/// `+ name: Type` / `- name`.
pub(crate) fn member_text(m: &Member) -> String {
    match &m.type_name {
        Some(t) => format!("{} {}: {}", m.visibility.symbol(), m.name, t),
        None => format!("{} {}", m.visibility.symbol(), m.name),
    }
}

/// `id: uuid pk fk null`.
pub(crate) fn column_text(a: &Attribute) -> String {
    let mut s = format!("{}: {}", a.name, a.data_type);
    if a.primary_key {
        s.push_str(" pk");
    }
    if a.foreign_key {
        s.push_str(" fk");
    }
    if a.nullable {
        s.push_str(" null");
    }
    s
}

fn id_text(id: &str) -> String {
    if is_bare_id(id) {
        id.to_string()
    } else {
        quote(id)
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn format_num(n: f64) -> String {
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
