//! Spatial index over the target positions of a study.
//!
//! The optimization loop issues one radius query per record per step against
//! a point set that never changes once the database is populated, so the
//! index is a static, balanced [k-d tree](https://en.wikipedia.org/wiki/K-d_tree)
//! built once from an immutable snapshot of the record positions. It stores
//! the record ids by value and hands out borrowed ids on query.

use nalgebra::Point3;

/// Static 3-D point index answering exact Euclidean radius queries with
/// record ids.
#[derive(Debug, Default)]
pub struct SearchTree {
    ids: Vec<String>,
    points: Vec<Point3<f64>>,
    /// Indices into `ids`/`points`, arranged as an implicit k-d tree: the
    /// median of every subrange is the splitting node of that subrange.
    tree: Vec<usize>,
}

impl SearchTree {
    /// Build the index from `(id, position)` pairs.
    pub fn build(entries: impl IntoIterator<Item = (String, Point3<f64>)>) -> Self {
        let (ids, points): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
        let mut tree: Vec<usize> = (0..points.len()).collect();
        split(&mut tree, &points, 0);
        SearchTree { ids, points, tree }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// All record ids whose position lies within Euclidean distance `radius`
    /// of `point` (boundary inclusive).
    ///
    /// When `point` is itself a target position, the matching record's own id
    /// is part of the result. The order of the returned ids is unspecified
    /// but deterministic for a fixed tree.
    pub fn radius_search(&self, point: &Point3<f64>, radius: f64) -> Vec<&str> {
        let mut found = Vec::new();
        if radius >= 0.0 {
            self.search(&self.tree, point, radius, 0, &mut found);
        }
        found
    }

    fn search<'a>(&'a self, range: &[usize], point: &Point3<f64>, radius: f64, depth: usize, found: &mut Vec<&'a str>) {
        if range.is_empty() {
            return;
        }
        let mid = range.len() / 2;
        let pivot = &self.points[range[mid]];
        if (pivot - point).norm_squared() <= radius * radius {
            found.push(&self.ids[range[mid]]);
        }

        let axis = depth % 3;
        // Descend into a half only if the query ball crosses the split plane.
        if point[axis] - radius <= pivot[axis] {
            self.search(&range[..mid], point, radius, depth + 1, found);
        }
        if point[axis] + radius >= pivot[axis] {
            self.search(&range[mid + 1..], point, radius, depth + 1, found);
        }
    }
}

/// Arrange `range` so that its median splits the subrange along the axis for
/// `depth`, then recurse into both halves.
fn split(range: &mut [usize], points: &[Point3<f64>], depth: usize) {
    if range.len() <= 1 {
        return;
    }
    let axis = depth % 3;
    range.sort_unstable_by(|&a, &b| points[a][axis].total_cmp(&points[b][axis]));
    let mid = range.len() / 2;
    split(&mut range[..mid], points, depth + 1);
    let (_, rest) = range.split_at_mut(mid + 1);
    split(rest, points, depth + 1);
}
