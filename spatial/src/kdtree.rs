//! Static k-d tree over a fixed point set
//!
//! The tree is built once (balanced median splits on the widest axis, small
//! leaf buckets) and then answers any number of read-only queries. It owns a
//! copy of the coordinates so it can be shared across rayon workers.

use crate::search_param::KdTreeSearchParam;
use cloudreg_core::{Error, Result};
use nalgebra::Point3;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

const LEAF_SIZE: usize = 16;

/// A query hit: index into the indexed point set and squared distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance_squared: f64,
}

impl Neighbor {
    pub fn distance(&self) -> f64 {
        self.distance_squared.sqrt()
    }
}

// Ordered by (distance, index) so equidistant points resolve to the lower index.
impl Eq for Neighbor {}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_squared
            .total_cmp(&other.distance_squared)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        start: usize,
        end: usize,
    },
    Split {
        axis: usize,
        value: f64,
        left: usize,
        right: usize,
    },
}

/// K-d tree over `D`-dimensional points
#[derive(Debug, Clone)]
pub struct KdTree<const D: usize> {
    points: Vec<[f64; D]>,
    order: Vec<usize>,
    nodes: Vec<Node>,
}

impl KdTree<3> {
    pub fn from_points(points: &[Point3<f64>]) -> Self {
        Self::new(points.iter().map(to_array).collect())
    }

    pub fn nearest_point(&self, query: &Point3<f64>) -> Result<Neighbor> {
        self.nearest(&to_array(query))
    }

    pub fn search_point(
        &self,
        query: &Point3<f64>,
        param: &KdTreeSearchParam,
    ) -> Result<Vec<Neighbor>> {
        self.search(&to_array(query), param)
    }
}

pub fn to_array(p: &Point3<f64>) -> [f64; 3] {
    [p.x, p.y, p.z]
}

impl<const D: usize> KdTree<D> {
    pub fn new(points: Vec<[f64; D]>) -> Self {
        let mut order: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::new();
        if !points.is_empty() {
            build(&points, &mut order, 0, &mut nodes);
        }
        Self {
            points,
            order,
            nodes,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dimension(&self) -> usize {
        D
    }

    pub fn point(&self, index: usize) -> Option<&[f64; D]> {
        self.points.get(index)
    }

    fn ensure_queryable(&self) -> Result<()> {
        if self.points.is_empty() {
            return Err(Error::InvalidInput(
                "Cannot query a k-d tree built over an empty point set".to_string(),
            ));
        }
        Ok(())
    }

    /// Single nearest neighbor.
    pub fn nearest(&self, query: &[f64; D]) -> Result<Neighbor> {
        let mut hits = self.search_knn(query, 1)?;
        hits.pop()
            .ok_or_else(|| Error::InvalidInput("Empty k-d tree".to_string()))
    }

    /// Up to `k` nearest neighbors, closest first.
    pub fn search_knn(&self, query: &[f64; D], k: usize) -> Result<Vec<Neighbor>> {
        self.ensure_queryable()?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut collector = KnnCollector::new(k.min(self.points.len()), f64::INFINITY);
        self.descend(0, query, &mut collector);
        Ok(collector.into_sorted())
    }

    /// All neighbors within `radius` (inclusive), closest first.
    pub fn search_radius(&self, query: &[f64; D], radius: f64) -> Result<Vec<Neighbor>> {
        self.ensure_queryable()?;
        check_radius(radius)?;
        let mut collector = RadiusCollector {
            radius_squared: radius * radius,
            hits: Vec::new(),
        };
        self.descend(0, query, &mut collector);
        let mut hits = collector.hits;
        hits.sort_unstable();
        Ok(hits)
    }

    /// At most `max_nn` nearest neighbors that also lie within `radius`.
    pub fn search_hybrid(
        &self,
        query: &[f64; D],
        radius: f64,
        max_nn: usize,
    ) -> Result<Vec<Neighbor>> {
        self.ensure_queryable()?;
        check_radius(radius)?;
        if max_nn == 0 {
            return Ok(Vec::new());
        }
        let mut collector = KnnCollector::new(max_nn.min(self.points.len()), radius * radius);
        self.descend(0, query, &mut collector);
        Ok(collector.into_sorted())
    }

    pub fn search(&self, query: &[f64; D], param: &KdTreeSearchParam) -> Result<Vec<Neighbor>> {
        param.validate()?;
        match *param {
            KdTreeSearchParam::Knn { k } => self.search_knn(query, k),
            KdTreeSearchParam::Radius { radius } => self.search_radius(query, radius),
            KdTreeSearchParam::Hybrid { radius, max_nn } => {
                self.search_hybrid(query, radius, max_nn)
            }
        }
    }

    fn descend<C: Collector>(&self, node: usize, query: &[f64; D], collector: &mut C) {
        match self.nodes[node] {
            Node::Leaf { start, end } => {
                for &index in &self.order[start..end] {
                    let d = squared_distance(&self.points[index], query);
                    if d <= collector.bound() {
                        collector.offer(index, d);
                    }
                }
            }
            Node::Split {
                axis,
                value,
                left,
                right,
            } => {
                let diff = query[axis] - value;
                let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
                self.descend(near, query, collector);
                // `<=` keeps equidistant candidates with lower indices reachable.
                if diff * diff <= collector.bound() {
                    self.descend(far, query, collector);
                }
            }
        }
    }
}

fn check_radius(radius: f64) -> Result<()> {
    if radius.is_finite() && radius >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "Search radius must be finite and non-negative, got {radius}"
        )))
    }
}

fn squared_distance<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn build<const D: usize>(
    points: &[[f64; D]],
    order: &mut [usize],
    offset: usize,
    nodes: &mut Vec<Node>,
) -> usize {
    let id = nodes.len();
    if order.len() <= LEAF_SIZE {
        nodes.push(Node::Leaf {
            start: offset,
            end: offset + order.len(),
        });
        return id;
    }

    let axis = widest_axis(points, order);
    let mid = order.len() / 2;
    order.select_nth_unstable_by(mid, |&a, &b| {
        points[a][axis]
            .total_cmp(&points[b][axis])
            .then(a.cmp(&b))
    });
    let value = points[order[mid]][axis];

    // Placeholder, patched once both children exist.
    nodes.push(Node::Leaf { start: 0, end: 0 });
    let (lo, hi) = order.split_at_mut(mid);
    let left = build(points, lo, offset, nodes);
    let right = build(points, hi, offset + mid, nodes);
    nodes[id] = Node::Split {
        axis,
        value,
        left,
        right,
    };
    id
}

fn widest_axis<const D: usize>(points: &[[f64; D]], order: &[usize]) -> usize {
    let mut min = [f64::INFINITY; D];
    let mut max = [f64::NEG_INFINITY; D];
    for &i in order {
        for axis in 0..D {
            min[axis] = min[axis].min(points[i][axis]);
            max[axis] = max[axis].max(points[i][axis]);
        }
    }
    (0..D)
        .max_by(|&a, &b| (max[a] - min[a]).total_cmp(&(max[b] - min[b])))
        .unwrap_or(0)
}

trait Collector {
    /// Squared distance beyond which candidates are rejected.
    fn bound(&self) -> f64;
    fn offer(&mut self, index: usize, distance_squared: f64);
}

struct KnnCollector {
    k: usize,
    radius_squared: f64,
    heap: BinaryHeap<Neighbor>,
}

impl KnnCollector {
    /// `k` must not exceed the number of indexed points.
    fn new(k: usize, radius_squared: f64) -> Self {
        Self {
            k,
            radius_squared,
            heap: BinaryHeap::with_capacity(k.saturating_add(1)),
        }
    }

    fn into_sorted(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

impl Collector for KnnCollector {
    fn bound(&self) -> f64 {
        match self.heap.peek() {
            Some(worst) if self.heap.len() >= self.k => worst.distance_squared,
            _ => self.radius_squared,
        }
    }

    fn offer(&mut self, index: usize, distance_squared: f64) {
        if distance_squared > self.radius_squared {
            return;
        }
        let candidate = Neighbor {
            index,
            distance_squared,
        };
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }
}

struct RadiusCollector {
    radius_squared: f64,
    hits: Vec<Neighbor>,
}

impl Collector for RadiusCollector {
    fn bound(&self) -> f64 {
        self.radius_squared
    }

    fn offer(&mut self, index: usize, distance_squared: f64) {
        if distance_squared <= self.radius_squared {
            self.hits.push(Neighbor {
                index,
                distance_squared,
            });
        }
    }
}
