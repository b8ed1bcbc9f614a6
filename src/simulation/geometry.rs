//! Distance helpers and the static neighbor relation.

use super::types::Point;

/// Squared Euclidean distance (avoids a sqrt in range checks).
pub fn distance2(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Euclidean distance.
pub fn distance(a: &Point, b: &Point) -> f64 {
    distance2(a, b).sqrt()
}

/// Adjacency lists for every ordered pair `(i, j)`, `i != j`, whose distance
/// is within `radius`. Lists are in ascending index order.
///
/// Compares squared distances so the boundary case `d == radius` is included
/// without rounding surprises from the sqrt.
pub fn compute_neighbors(positions: &[Point], radius: f64) -> Vec<Vec<usize>> {
    let radius2 = radius * radius;
    positions
        .iter()
        .enumerate()
        .map(|(i, a)| {
            positions
                .iter()
                .enumerate()
                .filter(|(j, b)| *j != i && distance2(a, b) <= radius2)
                .map(|(j, _)| j)
                .collect()
        })
        .collect()
}
