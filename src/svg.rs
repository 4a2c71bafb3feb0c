//! Parsers for the two textual shape forms.
//!
//! A path description is a whitespace-separated command walk (`M`, `L`,
//! `H`, `V`, `Z` and their relative lowercase variants). The walk builds an
//! adjacency graph on points; connected runs become segment groups and
//! isolated points become point components. A circle description is a set
//! of `cx`/`cy`/`r` pairs with missing fields defaulting to zero.

use crate::error::{ChainError, Result};
use crate::geometry::{Component, Group, Point, Segment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum accepted length of a shape description.
pub const MAX_SVG_LEN: usize = 128;

/// The two supported shape forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Path,
    Circle,
}

type AdjacencyMap = HashMap<Point, Vec<Point>>;

/// Parse a shape description into its geometric components.
pub fn parse_svg(svg: &str, kind: ShapeKind) -> Result<Vec<Component>> {
    if svg.len() > MAX_SVG_LEN {
        return Err(ChainError::SvgTooLong(svg.to_string()));
    }

    match kind {
        ShapeKind::Path => parse_path(svg),
        ShapeKind::Circle => parse_circle(svg),
    }
}

fn parse_circle(svg: &str) -> Result<Vec<Component>> {
    let tokens: Vec<&str> = svg.split_whitespace().collect();

    if tokens.is_empty() || tokens.len() % 2 != 0 || tokens.len() > 6 {
        return Err(ChainError::InvalidSvg(svg.to_string()));
    }

    let mut circle = crate::geometry::Circle {
        x: 0.0,
        y: 0.0,
        r: 0.0,
    };

    for pair in tokens.chunks(2) {
        let val: f64 = pair[1]
            .parse()
            .map_err(|_| ChainError::InvalidSvg(svg.to_string()))?;
        match pair[0] {
            "cx" => circle.x = val,
            "cy" => circle.y = val,
            "r" => circle.r = val,
            _ => return Err(ChainError::InvalidSvg(svg.to_string())),
        }
    }

    Ok(vec![Component::Circle(circle)])
}

fn parse_path(svg: &str) -> Result<Vec<Component>> {
    let tokens: Vec<&str> = svg.split_whitespace().collect();
    let mut points = AdjacencyMap::new();

    // a path must open with an absolute moveto
    if tokens.first() != Some(&"M") {
        return Err(ChainError::InvalidSvg(svg.to_string()));
    }

    let mut prev = Point::new(0.0, 0.0);
    let mut last_m = Point::new(0.0, 0.0);

    let mut i = 0;
    while i < tokens.len() {
        let cmd = parse_command(&tokens, i, prev, &mut last_m)
            .ok_or_else(|| ChainError::InvalidSvg(svg.to_string()))?;

        // skip duplicate consecutive points
        if !prev.approx_eq(&cmd.point) {
            points.entry(cmd.point).or_default();
            if cmd.connected {
                points.entry(cmd.point).or_default().push(prev);
                points.entry(prev).or_default().push(cmd.point);
            }
            prev = cmd.point;
        }

        i += cmd.consumed + 1;
    }

    let mut components = remove_disconnected_points(&mut points);
    components.extend(remove_groups(&mut points));

    Ok(components)
}

struct Command {
    point: Point,
    /// Extra tokens consumed beyond the command letter.
    consumed: usize,
    /// Whether the move draws a segment from the previous cursor.
    connected: bool,
}

fn parse_command(tokens: &[&str], i: usize, prev: Point, last_m: &mut Point) -> Option<Command> {
    let relative = tokens[i] == tokens[i].to_lowercase();

    match tokens[i] {
        "Z" | "z" => Some(Command {
            point: *last_m,
            consumed: 0,
            connected: true,
        }),
        "M" | "m" => {
            let point = create_point(tokens.get(i + 1), tokens.get(i + 2), relative, prev)?;
            *last_m = point;
            Some(Command {
                point,
                consumed: 2,
                connected: false,
            })
        }
        "L" | "l" => Some(Command {
            point: create_point(tokens.get(i + 1), tokens.get(i + 2), relative, prev)?,
            consumed: 2,
            connected: true,
        }),
        "H" | "h" => Some(Command {
            point: create_point(tokens.get(i + 1), None, relative, prev)?,
            consumed: 1,
            connected: true,
        }),
        "V" | "v" => Some(Command {
            point: create_point(None, tokens.get(i + 1), relative, prev)?,
            consumed: 1,
            connected: true,
        }),
        _ => None,
    }
}

fn create_point(
    x_tok: Option<&&str>,
    y_tok: Option<&&str>,
    relative: bool,
    prev: Point,
) -> Option<Point> {
    let x = match x_tok {
        None => prev.x,
        Some(tok) => {
            let v: f64 = tok.parse().ok()?;
            if relative {
                v + prev.x
            } else {
                v
            }
        }
    };
    let y = match y_tok {
        None => prev.y,
        Some(tok) => {
            let v: f64 = tok.parse().ok()?;
            if relative {
                v + prev.y
            } else {
                v
            }
        }
    };
    Some(Point::new(x, y))
}

/// Pull points with no neighbours out of the map as point components.
fn remove_disconnected_points(points: &mut AdjacencyMap) -> Vec<Component> {
    let isolated: Vec<Point> = points
        .iter()
        .filter(|(_, neighbours)| neighbours.is_empty())
        .map(|(point, _)| *point)
        .collect();

    for point in &isolated {
        points.remove(point);
    }

    isolated.into_iter().map(Component::Point).collect()
}

/// Pull connected segment runs out of the map as group components.
fn remove_groups(points: &mut AdjacencyMap) -> Vec<Component> {
    remove_disconnected_points(points);

    let Some(start) = points.keys().next().copied() else {
        return Vec::new();
    };

    let segments = remove_group(start, points);
    let group = Component::Group(Group { segments });

    let mut components = remove_groups(points);
    components.push(group);
    components
}

/// Trace the edges reachable from `curr`, consuming them from the map.
fn remove_group(curr: Point, points: &mut AdjacencyMap) -> Vec<Segment> {
    let next = match points.get_mut(&curr) {
        Some(neighbours) if !neighbours.is_empty() => neighbours.remove(0),
        _ => return Vec::new(),
    };

    // drop the back edge
    if let Some(neighbours) = points.get_mut(&next) {
        if let Some(pos) = neighbours.iter().position(|p| p.approx_eq(&curr)) {
            neighbours.remove(pos);
        }
    }

    let segment = Segment::new(next, curr);

    let mut segments = remove_group(next, points);
    segments.push(segment);
    segments
}
