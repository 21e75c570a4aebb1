//! Flowline geometry on top of `geo`.
//! Coordinates are projected (metres); all math uses f64.

use geo::{Coord, Distance, Euclidean, Length, Line, LineInterpolatePoint, LineLocatePoint, LineString, Point};

/// Planar length of a path.
pub fn path_length(line: &LineString<f64>) -> f64 {
    Euclidean.length(line)
}

/// Distance along `line` of the closest point to `p`.
/// `None` for an empty path or non-finite input.
pub fn distance_along(line: &LineString<f64>, p: Coord<f64>) -> Option<f64> {
    let total = path_length(line);
    if total <= 0.0 {
        return line.0.first().map(|_| 0.0);
    }
    line.line_locate_point(&Point::from(p))
        .filter(|f| f.is_finite())
        .map(|f| f * total)
}

/// Straight-line distance between two vertices.
pub fn vertex_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    Euclidean.distance(Point::from(a), Point::from(b))
}

/// Split at ascending distances along the path. Yields `distances.len() + 1`
/// pieces; consecutive pieces share the cut vertex.
pub fn split_at(line: &LineString<f64>, distances: &[f64]) -> Vec<LineString<f64>> {
    let mut pieces = Vec::with_capacity(distances.len() + 1);
    let mut current: Vec<Coord<f64>> = line.0.first().copied().into_iter().collect();
    let mut cuts = distances.iter().copied().peekable();
    let mut walked = 0.0;

    for edge in line.lines() {
        let step = vertex_distance(edge.start, edge.end);
        while let Some(&cut) = cuts.peek() {
            if cut > walked + step {
                break;
            }
            let vertex = cut_vertex(&edge, cut - walked, step);
            push_vertex(&mut current, vertex);
            pieces.push(LineString::new(std::mem::replace(&mut current, vec![vertex])));
            cuts.next();
        }
        push_vertex(&mut current, edge.end);
        walked += step;
    }

    // Cuts past the end (rounding) close on the last vertex.
    for _ in cuts {
        let end = current.last().copied();
        pieces.push(LineString::new(std::mem::replace(&mut current, end.into_iter().collect())));
    }
    pieces.push(LineString::new(current));
    pieces
}

fn cut_vertex(edge: &Line<f64>, offset: f64, step: f64) -> Coord<f64> {
    if step <= 0.0 || offset >= step {
        return edge.end;
    }
    if offset <= 0.0 {
        return edge.start;
    }
    edge.line_interpolate_point(offset / step).map_or(edge.end, |p| p.0)
}

fn push_vertex(path: &mut Vec<Coord<f64>>, c: Coord<f64>) {
    if path.last() != Some(&c) {
        path.push(c);
    }
}
