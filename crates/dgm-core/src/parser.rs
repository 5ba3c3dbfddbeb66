//! Parser for the textual diagram notation → `Diagram`.
//!
//! Built on `winnow` 0.7. Handles: the `diagram` header, `#` comments,
//! shape declarations with nested children and payload properties, and
//! connector lines. The parsed diagram is validated entity by entity;
//! errors carry the 1-based line they were found on.

use crate::geometry::Rect;
use crate::id::{ConnectorId, DiagramId, ShapeId, is_bare_id_char};
use crate::model::*;
use std::collections::HashSet;
use thiserror::Error;
use winnow::ascii::space0;
use winnow::combinator::{alt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take_while;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct NotationError {
    pub line: usize,
    pub message: String,
}

/// Parse notation text into a validated `Diagram`.
#[must_use = "parsing result should be used"]
pub fn parse_diagram(input: &str) -> Result<Diagram, NotationError> {
    let mut rest = input;
    skip_ws_and_comments(&mut rest);

    let header_line = line_of(input, rest);
    expect(input, &mut rest, "`diagram` header", "diagram")?;
    skip_space(&mut rest);
    let id = expect(input, &mut rest, "diagram id", preceded('@', parse_id_text))?;
    skip_space(&mut rest);
    let kind_name = expect(input, &mut rest, "diagram kind", parse_identifier)?;
    let kind = DiagramKind::parse(kind_name).ok_or_else(|| NotationError {
        line: header_line,
        message: format!("unknown diagram kind `{kind_name}`"),
    })?;

    let mut shapes: Vec<(usize, Shape)> = Vec::new();
    let mut connectors: Vec<(usize, bool, Connector)> = Vec::new();
    loop {
        skip_ws_and_comments(&mut rest);
        if rest.is_empty() {
            break;
        }
        if rest.starts_with('@') {
            let line = line_of(input, rest);
            let (named, connector) = parse_connector(input, &mut rest)?;
            connectors.push((line, named, connector));
        } else {
            parse_shape(input, &mut rest, None, &mut shapes)?;
        }
    }

    // Unnamed connectors get ids only once every explicit id is known.
    let taken: HashSet<ConnectorId> = connectors
        .iter()
        .filter(|(_, named, _)| *named)
        .map(|(_, _, c)| c.id)
        .collect();
    for (_, _, connector) in connectors.iter_mut().filter(|(_, named, _)| !*named) {
        connector.id = loop {
            let fresh = ConnectorId::with_prefix("conn");
            if !taken.contains(&fresh) {
                break fresh;
            }
        };
    }

    let mut diagram = Diagram::new(DiagramId::intern(&id), kind);
    for (line, shape) in shapes {
        diagram
            .insert_shape(shape, None)
            .map_err(|e| NotationError {
                line,
                message: e.to_string(),
            })?;
    }
    for (line, _, connector) in connectors {
        diagram
            .insert_connector(connector, None)
            .map_err(|e| NotationError {
                line,
                message: e.to_string(),
            })?;
    }
    log::trace!(
        "parsed diagram {} with {} shapes and {} connectors",
        diagram.id,
        diagram.shape_count(),
        diagram.connector_count()
    );
    Ok(diagram)
}

// ─── Shapes ──────────────────────────────────────────────────────────────

/// Parse one shape (and, recursively, its children) into `out` in
/// document order.
fn parse_shape<'a>(
    source: &'a str,
    rest: &mut &'a str,
    parent: Option<ShapeId>,
    out: &mut Vec<(usize, Shape)>,
) -> Result<(), NotationError> {
    let line = line_of(source, rest);
    let type_name = expect(source, rest, "shape type", parse_identifier)?;
    let shape_type = ShapeType::parse(type_name).ok_or_else(|| NotationError {
        line,
        message: format!("unknown shape type `{type_name}`"),
    })?;
    expect(source, rest, "`.` after shape type", '.')?;
    let subtype = expect(source, rest, "subtype", parse_identifier)?;
    skip_space(rest);
    let id = expect(source, rest, "shape id", parse_shape_id)?;
    skip_space(rest);
    let label = if rest.starts_with('"') {
        expect(source, rest, "label", parse_quoted)?
    } else {
        String::new()
    };
    skip_space(rest);
    let bounds = expect(source, rest, "geometry `[x, y, w, h]`", parse_rect)?;

    let mut shape = Shape::new(id, shape_type, bounds)
        .with_subtype(subtype)
        .with_label(label);
    shape.parent = parent;

    loop {
        skip_space(rest);
        if rest.starts_with("z:") {
            *rest = &rest[2..];
            skip_space(rest);
            shape.z_order = expect(source, rest, "z-order", parse_int)?;
        } else if rest.starts_with("locked") {
            *rest = &rest["locked".len()..];
            shape.locked = true;
        } else {
            break;
        }
    }

    let slot = out.len();
    out.push((line, shape));
    if !rest.starts_with('{') {
        return Ok(());
    }
    *rest = &rest[1..];

    loop {
        skip_ws_and_comments(rest);
        if rest.starts_with('}') {
            *rest = &rest[1..];
            return Ok(());
        }
        if rest.is_empty() {
            return Err(NotationError {
                line,
                message: format!("unclosed block for shape @{id}"),
            });
        }
        if starts_with_property(rest) {
            parse_payload_property(source, rest, &mut out[slot].1.payload)?;
        } else {
            parse_shape(source, rest, Some(id), out)?;
        }
    }
}

/// `name:` (a payload property) as opposed to `type.subtype` (a child shape).
fn starts_with_property(input: &str) -> bool {
    let name_len = input
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(input.len());
    name_len > 0 && input[name_len..].trim_start_matches([' ', '\t']).starts_with(':')
}

fn parse_payload_property<'a>(
    source: &'a str,
    rest: &mut &'a str,
    payload: &mut ShapePayload,
) -> Result<(), NotationError> {
    let line = line_of(source, rest);
    let key = expect(source, rest, "property name", parse_identifier)?;
    skip_space(rest);
    expect(source, rest, "`:`", ':')?;
    skip_space(rest);
    let invalid = |what: &str, text: &str| NotationError {
        line,
        message: format!("invalid {what} `{text}`"),
    };

    match (key, payload) {
        ("assignee", ShapePayload::Task { assignee }) => {
            *assignee = Some(expect(source, rest, "quoted assignee", parse_quoted)?);
        }
        ("condition", ShapePayload::Gateway { condition }) => {
            *condition = Some(expect(source, rest, "quoted condition", parse_quoted)?);
        }
        ("guard", ShapePayload::Fragment { guard }) => {
            *guard = Some(expect(source, rest, "quoted guard", parse_quoted)?);
        }
        ("stereotype", ShapePayload::Class { stereotype, .. }) => {
            *stereotype = Some(expect(source, rest, "quoted stereotype", parse_quoted)?);
        }
        ("attribute", ShapePayload::Class { attributes, .. }) => {
            let text = expect(source, rest, "quoted attribute", parse_quoted)?;
            attributes.push(parse_member(&text).ok_or_else(|| invalid("attribute", &text))?);
        }
        (
            "operation",
            ShapePayload::Class { operations, .. } | ShapePayload::Interface { operations },
        ) => {
            let text = expect(source, rest, "quoted operation", parse_quoted)?;
            operations.push(parse_member(&text).ok_or_else(|| invalid("operation", &text))?);
        }
        ("column", ShapePayload::Entity { attributes }) => {
            let text = expect(source, rest, "quoted column", parse_quoted)?;
            attributes.push(parse_column(&text).ok_or_else(|| invalid("column", &text))?);
        }
        ("text", ShapePayload::Note { text }) => {
            *text = expect(source, rest, "quoted text", parse_quoted)?;
        }
        ("members", ShapePayload::Group { members, .. }) => {
            while rest.starts_with('@') {
                members.push(expect(source, rest, "member shape id", parse_shape_id)?);
                skip_space(rest);
            }
        }
        ("member_connectors", ShapePayload::Group {
            member_connectors, ..
        }) => {
            while rest.starts_with('#') {
                member_connectors.push(expect(
                    source,
                    rest,
                    "member connector id",
                    parse_connector_id,
                )?);
                skip_space(rest);
            }
        }
        (key, payload) => {
            return Err(NotationError {
                line,
                message: format!("unknown property `{key}` for {}", payload.shape_type()),
            });
        }
    }
    Ok(())
}

/// `+ name: Type`; visibility defaults to public.
fn parse_member(text: &str) -> Option<Member> {
    let text = text.trim();
    let (visibility, body) = match text.chars().next().and_then(Visibility::from_symbol) {
        Some(v) => (v, &text[1..]),
        None => (Visibility::Public, text),
    };
    let body = body.trim();
    // The type annotation follows the parameter list, if any.
    let search_from = body.rfind(')').unwrap_or(0);
    let (name, type_name) = match body[search_from..].find(':') {
        Some(pos) => {
            let (n, t) = body.split_at(search_from + pos);
            (n.trim(), Some(t[1..].trim().to_string()).filter(|t| !t.is_empty()))
        }
        None => (body, None),
    };
    if name.is_empty() {
        return None;
    }
    Some(Member {
        visibility,
        name: name.to_string(),
        type_name,
    })
}

/// `name: type [pk] [fk] [null]`.
fn parse_column(text: &str) -> Option<Attribute> {
    let (name, rest) = text.split_once(':')?;
    let name = name.trim();
    let mut words = rest.split_whitespace();
    let data_type = words.next()?;
    if name.is_empty() {
        return None;
    }
    let mut attr = Attribute {
        name: name.to_string(),
        data_type: data_type.to_string(),
        primary_key: false,
        foreign_key: false,
        nullable: false,
    };
    for flag in words {
        match flag {
            "pk" => attr.primary_key = true,
            "fk" => attr.foreign_key = true,
            "null" => attr.nullable = true,
            _ => return None,
        }
    }
    Some(attr)
}

// ─── Connectors ──────────────────────────────────────────────────────────

/// A connector line. The flag tells whether it carried an explicit `#id`;
/// unnamed connectors come back with a placeholder id.
fn parse_connector<'a>(
    source: &'a str,
    rest: &mut &'a str,
) -> Result<(bool, Connector), NotationError> {
    let line = line_of(source, rest);
    let source_end = parse_endpoint(source, rest)?;
    skip_space(rest);
    expect(source, rest, "`->`", "->")?;
    skip_space(rest);
    let target_end = parse_endpoint(source, rest)?;
    skip_space(rest);

    let kind_name = expect(source, rest, "connector kind", parse_identifier)?;
    let kind = ConnectorKind::parse(kind_name).ok_or_else(|| NotationError {
        line,
        message: format!("unknown connector kind `{kind_name}`"),
    })?;
    skip_space(rest);
    let routing_name = expect(source, rest, "routing style", parse_identifier)?;
    let routing = RoutingStyle::parse(routing_name).ok_or_else(|| NotationError {
        line,
        message: format!("unknown routing style `{routing_name}`"),
    })?;

    let (mut start, mut end, mut line_style) = kind.preset();
    let mut label = None;
    let mut z_order = 0;
    let mut id = None;
    loop {
        skip_space(rest);
        if rest.is_empty() || rest.starts_with(['\n', '\r']) {
            break;
        }
        if rest.starts_with('"') {
            label = Some(expect(source, rest, "label", parse_quoted)?);
        } else if rest.starts_with('#') {
            id = Some(expect(source, rest, "connector id", parse_connector_id)?);
        } else {
            let key = expect(source, rest, "connector property", parse_identifier)?;
            skip_space(rest);
            expect(source, rest, "`:`", ':')?;
            skip_space(rest);
            if key == "z" {
                z_order = expect(source, rest, "z-order", parse_int)?;
                continue;
            }
            let value = expect(source, rest, "property value", parse_identifier)?;
            let unknown = || NotationError {
                line,
                message: format!("invalid {key} `{value}`"),
            };
            match key {
                "start" => start = Marker::parse(value).ok_or_else(unknown)?,
                "end" => end = Marker::parse(value).ok_or_else(unknown)?,
                "line" => line_style = LineStyle::parse(value).ok_or_else(unknown)?,
                _ => {
                    return Err(NotationError {
                        line,
                        message: format!("unknown connector property `{key}`"),
                    });
                }
            }
        }
    }

    let named = id.is_some();
    let mut connector = Connector::new(
        id.unwrap_or_else(|| ConnectorId::intern("conn")),
        kind,
        source_end,
        target_end,
    );
    connector.routing = routing;
    connector.start_marker = start;
    connector.end_marker = end;
    connector.line_style = line_style;
    connector.label = label;
    connector.z_order = z_order;
    Ok((named, connector))
}

/// `@shape.point`, e.g. `@review.east` or `@db.north:1/3`.
fn parse_endpoint<'a>(source: &'a str, rest: &mut &'a str) -> Result<Endpoint, NotationError> {
    let line = line_of(source, rest);
    let shape = expect(source, rest, "endpoint shape id", parse_shape_id)?;
    expect(source, rest, "`.` after endpoint id", '.')?;
    let token = expect(source, rest, "connection point", parse_point_token)?;
    let point = ConnectionPoint::parse(token).ok_or_else(|| NotationError {
        line,
        message: format!("invalid connection point `{token}`"),
    })?;
    Ok(Endpoint::new(shape, point))
}

// ─── Low-level parsers ───────────────────────────────────────────────────

/// Run `parser`, mapping a failure to a `NotationError` at the current line.
fn expect<'a, O, P>(
    source: &str,
    rest: &mut &'a str,
    what: &str,
    mut parser: P,
) -> Result<O, NotationError>
where
    P: Parser<&'a str, O, ErrMode<ContextError>>,
{
    let line = line_of(source, rest);
    parser.parse_next(rest).map_err(|_| NotationError {
        line,
        message: format!("expected {what}"),
    })
}

/// 1-based line of `rest`, which must be a suffix of `source`.
fn line_of(source: &str, rest: &str) -> usize {
    let consumed = source.len().saturating_sub(rest.len());
    source[..consumed].matches('\n').count() + 1
}

fn skip_ws_and_comments(input: &mut &str) {
    loop {
        *input = input.trim_start();
        if !input.starts_with('#') {
            break;
        }
        match input.find('\n') {
            Some(pos) => *input = &input[pos + 1..],
            None => *input = "",
        }
    }
}

/// Consume optional spaces and tabs (concrete error type avoids inference issues).
fn skip_space(input: &mut &str) {
    let _: Result<&str, ErrMode<ContextError>> = space0.parse_next(input);
}

fn parse_identifier<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| c.is_alphanumeric() || c == '_').parse_next(input)
}

/// Entity id text: bare (letters, digits, `_`, `-`) or double-quoted.
fn parse_id_text(input: &mut &str) -> ModalResult<String> {
    alt((
        parse_quoted,
        take_while(1.., is_bare_id_char).map(|s: &str| s.to_string()),
    ))
    .parse_next(input)
}

fn parse_shape_id(input: &mut &str) -> ModalResult<ShapeId> {
    preceded('@', parse_id_text)
        .map(|s| ShapeId::intern(&s))
        .parse_next(input)
}

fn parse_connector_id(input: &mut &str) -> ModalResult<ConnectorId> {
    preceded('#', parse_id_text)
        .map(|s| ConnectorId::intern(&s))
        .parse_next(input)
}

fn parse_point_token<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| {
        c.is_alphanumeric() || c == '_' || c == ':' || c == '/'
    })
    .parse_next(input)
}

fn parse_number(input: &mut &str) -> ModalResult<f64> {
    let start = *input;
    if input.starts_with('-') {
        *input = &input[1..];
    }
    let _ = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    if input.starts_with('.') {
        *input = &input[1..];
        let _ =
            take_while::<_, _, ContextError>(0.., |c: char| c.is_ascii_digit()).parse_next(input);
    }
    let matched = &start[..start.len() - input.len()];
    matched
        .parse::<f64>()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

fn parse_int(input: &mut &str) -> ModalResult<i32> {
    let start = *input;
    if input.starts_with('-') {
        *input = &input[1..];
    }
    let _ = take_while(1.., |c: char| c.is_ascii_digit()).parse_next(input)?;
    let matched = &start[..start.len() - input.len()];
    matched
        .parse::<i32>()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

/// `[x, y, w, h]`.
fn parse_rect(input: &mut &str) -> ModalResult<Rect> {
    let _ = '['.parse_next(input)?;
    let mut values = [0.0f64; 4];
    for (i, slot) in values.iter_mut().enumerate() {
        skip_space(input);
        if i > 0 {
            let _ = ','.parse_next(input)?;
            skip_space(input);
        }
        *slot = parse_number.parse_next(input)?;
    }
    skip_space(input);
    let _ = ']'.parse_next(input)?;
    Ok(Rect::new(values[0], values[1], values[2], values[3]))
}

/// A double-quoted string with `\"`, `\\` and `\n` escapes.
fn parse_quoted(input: &mut &str) -> ModalResult<String> {
    let _ = '"'.parse_next(input)?;
    let s = *input;
    let mut out = String::new();
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                *input = &s[i + 1..];
                return Ok(out);
            }
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            '\n' => break,
            _ => out.push(c),
        }
    }
    Err(ErrMode::Backtrack(ContextError::new()))
}
