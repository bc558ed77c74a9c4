//! Tracing connected regions of equal value into polygons.

use std::collections::{HashMap, VecDeque};

use geo_types::{Coord, LineString, Polygon};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::buffer::{Sample, SampleBuffer};
use crate::error::{Error, Result};
use crate::grid::GeoGrid;
use crate::resample::is_nodata_value;

/// Pixel neighbourhood used to group a region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Edge neighbours only.
    #[default]
    Four,
    /// Edge and corner neighbours.
    Eight,
}

impl Connectivity {
    fn offsets(&self) -> &'static [(isize, isize)] {
        const FOUR: [(isize, isize); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
        const EIGHT: [(isize, isize); 8] = [
            (-1, -1),
            (-1, 0),
            (-1, 1),
            (0, -1),
            (0, 1),
            (1, -1),
            (1, 0),
            (1, 1),
        ];
        match self {
            Connectivity::Four => &FOUR,
            Connectivity::Eight => &EIGHT,
        }
    }
}

/// Lazily yields one polygon per connected region, in row-major order of
/// each region's first pixel.
pub struct Polygonizer<'a, T> {
    grid: &'a GeoGrid,
    buffer: &'a SampleBuffer<T>,
    mask: Option<ArrayView2<'a, u8>>,
    connectivity: Connectivity,
    visited: Array2<bool>,
    cursor: usize,
}

/// Polygonize `buffer` laid out on `grid`.
///
/// No-data and NaN pixels are never part of a region, and neither are
/// pixels whose `mask` value is zero.
pub fn polygonize<'a, T: Sample>(
    grid: &'a GeoGrid,
    buffer: &'a SampleBuffer<T>,
    connectivity: Connectivity,
    mask: Option<ArrayView2<'a, u8>>,
) -> Result<Polygonizer<'a, T>> {
    if buffer.shape() != grid.shape() {
        return Err(Error::InvalidParameter(format!(
            "Buffer shape {:?} does not match grid shape {:?}",
            buffer.shape(),
            grid.shape()
        )));
    }
    if let Some(m) = &mask {
        if m.dim() != buffer.shape() {
            return Err(Error::InvalidParameter(format!(
                "Mask shape {:?} does not match buffer shape {:?}",
                m.dim(),
                buffer.shape()
            )));
        }
    }
    Ok(Polygonizer {
        grid,
        buffer,
        mask,
        connectivity,
        visited: Array2::from_elem(buffer.shape(), false),
        cursor: 0,
    })
}

impl<'a, T: Sample> Polygonizer<'a, T> {
    fn is_valid(&self, row: usize, col: usize) -> bool {
        if let Some(m) = &self.mask {
            if m[(row, col)] == 0 {
                return false;
            }
        }
        !is_nodata_value(self.buffer.data[(row, col)], self.buffer.nodata)
    }

    /// Breadth-first flood from `seed` over pixels holding the same value.
    fn flood(&mut self, seed: (usize, usize)) -> Vec<(usize, usize)> {
        let (rows, cols) = self.buffer.shape();
        let value = self.buffer.data[seed];
        let mut pixels = Vec::new();
        let mut queue = VecDeque::from([seed]);
        self.visited[seed] = true;

        while let Some((r, c)) = queue.pop_front() {
            pixels.push((r, c));
            for &(dr, dc) in self.connectivity.offsets() {
                let (nr, nc) = (r as isize + dr, c as isize + dc);
                if nr < 0 || nc < 0 || nr >= rows as isize || nc >= cols as isize {
                    continue;
                }
                let next = (nr as usize, nc as usize);
                if self.visited[next] || self.buffer.data[next] != value || !self.is_valid(next.0, next.1) {
                    continue;
                }
                self.visited[next] = true;
                queue.push_back(next);
            }
        }
        pixels
    }

    fn to_polygon(&self, pixels: &[(usize, usize)]) -> Polygon<f64> {
        let edges = Component::new(pixels).boundary_edges();
        let rings = link_rings(&edges, self.connectivity);

        let mut outer: Vec<(i64, Vec<(usize, usize)>)> = Vec::new();
        let mut holes = Vec::new();
        for ring in rings {
            match signed_area2(&ring) {
                a if a > 0 => outer.push((a, ring)),
                a if a < 0 => holes.push(ring),
                _ => {}
            }
        }
        outer.sort_by(|a, b| b.0.cmp(&a.0));
        for (area, _) in outer.iter().skip(1) {
            warn!(area = *area as f64 / 2.0, "Dropping secondary outer ring");
        }

        let exterior = outer.into_iter().next().map(|(_, r)| r).unwrap_or_default();
        Polygon::new(
            self.world_ring(&exterior),
            holes.iter().map(|h| self.world_ring(h)).collect(),
        )
    }

    /// Pixel-space vertices to a world-space ring, exterior counter-clockwise.
    fn world_ring(&self, ring: &[(usize, usize)]) -> LineString<f64> {
        let mut coords: Vec<Coord<f64>> = ring
            .iter()
            .map(|&(x, y)| {
                let (wx, wy) = self.grid.to_world(x as f64, y as f64);
                Coord { x: wx, y: wy }
            })
            .collect();
        // A flipped axis mirrors the orientation
        if self.grid.transform().determinant() < 0.0 {
            coords.reverse();
        }
        LineString::new(coords)
    }
}

impl<'a, T: Sample> Iterator for Polygonizer<'a, T> {
    type Item = (Polygon<f64>, T);

    fn next(&mut self) -> Option<Self::Item> {
        let (rows, cols) = self.buffer.shape();
        while self.cursor < rows * cols {
            let seed = (self.cursor / cols, self.cursor % cols);
            self.cursor += 1;
            if self.visited[seed] || !self.is_valid(seed.0, seed.1) {
                continue;
            }
            let value = self.buffer.data[seed];
            let pixels = self.flood(seed);
            trace!(row = seed.0, col = seed.1, pixels = pixels.len(), "Traced region");
            return Some((self.to_polygon(&pixels), value));
        }
        None
    }
}

/// Pixels of one region inside their bounding box.
struct Component {
    row0: usize,
    col0: usize,
    member: Array2<bool>,
}

impl Component {
    fn new(pixels: &[(usize, usize)]) -> Self {
        let row0 = pixels.iter().map(|p| p.0).min().unwrap_or(0);
        let col0 = pixels.iter().map(|p| p.1).min().unwrap_or(0);
        let row1 = pixels.iter().map(|p| p.0).max().unwrap_or(0);
        let col1 = pixels.iter().map(|p| p.1).max().unwrap_or(0);
        let mut member = Array2::from_elem((row1 - row0 + 1, col1 - col0 + 1), false);
        for &(r, c) in pixels {
            member[(r - row0, c - col0)] = true;
        }
        Self { row0, col0, member }
    }

    fn contains(&self, row: isize, col: isize) -> bool {
        let r = row - self.row0 as isize;
        let c = col - self.col0 as isize;
        if r < 0 || c < 0 {
            return false;
        }
        self.member.get((r as usize, c as usize)).copied().unwrap_or(false)
    }

    /// Unit edges between member and non-member pixels as (x, y) vertex
    /// pairs, oriented with the region on the right in the row-down frame.
    fn boundary_edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for ((lr, lc), &hit) in self.member.indexed_iter() {
            if !hit {
                continue;
            }
            let (r, c) = (lr + self.row0, lc + self.col0);
            let (ri, ci) = (r as isize, c as isize);
            if !self.contains(ri - 1, ci) {
                edges.push(Edge::new((c, r), (c + 1, r)));
            }
            if !self.contains(ri, ci + 1) {
                edges.push(Edge::new((c + 1, r), (c + 1, r + 1)));
            }
            if !self.contains(ri + 1, ci) {
                edges.push(Edge::new((c + 1, r + 1), (c, r + 1)));
            }
            if !self.contains(ri, ci - 1) {
                edges.push(Edge::new((c, r + 1), (c, r)));
            }
        }
        edges
    }
}

#[derive(Clone, Copy, Debug)]
struct Edge {
    from: (usize, usize),
    to: (usize, usize),
}

impl Edge {
    fn new(from: (usize, usize), to: (usize, usize)) -> Self {
        Self { from, to }
    }

    fn direction(&self) -> (i64, i64) {
        (
            self.to.0 as i64 - self.from.0 as i64,
            self.to.1 as i64 - self.from.1 as i64,
        )
    }
}

/// Link boundary edges into closed rings, dropping collinear vertices.
///
/// Where two diagonal pixels meet at a vertex the walk turns left for
/// eight-connectivity, joining them, and right for four-connectivity.
fn link_rings(edges: &[Edge], connectivity: Connectivity) -> Vec<Vec<(usize, usize)>> {
    let mut outgoing: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.from).or_default().push(i);
    }

    let successor = |i: usize| -> Option<usize> {
        let candidates = outgoing.get(&edges[i].to)?;
        if candidates.len() == 1 {
            return Some(candidates[0]);
        }
        let (ix, iy) = edges[i].direction();
        candidates.iter().copied().find(|&j| {
            let (ox, oy) = edges[j].direction();
            let cross = ix * oy - iy * ox;
            match connectivity {
                Connectivity::Eight => cross < 0,
                Connectivity::Four => cross > 0,
            }
        })
    };

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();
    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut walk = Vec::new();
        let mut current = start;
        loop {
            used[current] = true;
            walk.push(current);
            match successor(current) {
                Some(next) if next == start => break,
                Some(next) if !used[next] => current = next,
                _ => {
                    warn!(edges = walk.len(), "Boundary walk did not close");
                    break;
                }
            }
        }

        let n = walk.len();
        let ring: Vec<(usize, usize)> = (0..n)
            .filter(|&k| edges[walk[(k + n - 1) % n]].direction() != edges[walk[k]].direction())
            .map(|k| edges[walk[k]].from)
            .collect();
        if ring.len() >= 3 {
            rings.push(ring);
        }
    }
    rings
}

/// Twice the shoelace area in pixel space; outer rings are positive.
fn signed_area2(ring: &[(usize, usize)]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = (ring[i].0 as i64, ring[i].1 as i64);
            let (x1, y1) = (ring[(i + 1) % n].0 as i64, ring[(i + 1) % n].1 as i64);
            x0 * y1 - x1 * y0
        })
        .sum()
}
