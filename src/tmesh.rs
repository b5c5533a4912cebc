//! Hierarchical T-mesh: an arena of [`TensorProduct`] knot-index boxes with
//! adjacency, supporting knot insertion, tensor insertion/splitting, and the
//! anchor/knot-intersection queries the basis evaluator and decoder need.
//!
//! Tensors never move once inserted: `Tmesh::tensor_prods` is append-only
//! and every reference to a tensor is a stable index into it, the same
//! pattern the original T-mesh uses for its `tensor_prods` vector and the
//! same "arena of stable indices" idiom used for subgrid storage elsewhere
//! in this crate's ancestry.

use crate::error::{Error, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A single tensor-product NURBS patch: a box in knot-index space, together
/// with its own control points, weights, and adjacency to neighboring boxes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TensorProduct {
    /// Per-axis starting index (inclusive) into the T-mesh's global knot
    /// vector for this axis.
    pub knot_mins: Vec<usize>,
    /// Per-axis ending index (inclusive) into the T-mesh's global knot
    /// vector for this axis.
    pub knot_maxs: Vec<usize>,
    /// Refinement level: 0 is the base tensor covering the whole domain;
    /// higher levels were produced by later knot insertions.
    pub level: usize,
    /// Per-axis number of control points spanned by this tensor.
    pub nctrl_pts: Vec<usize>,
    /// Flattened control points, one row per control point in row-major
    /// order over `nctrl_pts`, one column per science variable.
    pub ctrl_pts: Array2<f64>,
    /// NURBS weights, one per control point, parallel to `ctrl_pts` rows.
    pub weights: Vec<f64>,
    /// Per-axis indices, in the tensor arena, of tensors adjacent in the
    /// increasing direction of that axis.
    pub next: Vec<Vec<usize>>,
    /// Per-axis indices, in the tensor arena, of tensors adjacent in the
    /// decreasing direction of that axis.
    pub prev: Vec<Vec<usize>>,
    /// Whether this tensor's local knot vector coincides with the global
    /// one over its extent (no neighbor has inserted a finer knot inside
    /// it that this tensor itself does not also have).
    pub knots_match: bool,
}

impl TensorProduct {
    fn new(knot_mins: Vec<usize>, knot_maxs: Vec<usize>, level: usize, nctrl_pts: Vec<usize>, nvars: usize) -> Self {
        let total: usize = nctrl_pts.iter().product();
        Self {
            knot_mins,
            knot_maxs,
            level,
            ctrl_pts: Array2::zeros((total, nvars)),
            weights: vec![1.0; total],
            nctrl_pts,
            next: vec![Vec::new(); knot_mins_len(&knot_maxs)],
            prev: vec![Vec::new(); knot_mins_len(&knot_maxs)],
            knots_match: true,
        }
    }
}

fn knot_mins_len(v: &[usize]) -> usize {
    v.len()
}

/// Hierarchical T-mesh of tensor-product knot-index boxes over a `dom_dim`-
/// dimensional parameter domain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tmesh {
    dom_dim: usize,
    p: Vec<usize>,
    all_knots: Vec<Vec<f64>>,
    all_knot_levels: Vec<Vec<usize>>,
    tensor_prods: Vec<TensorProduct>,
}

impl Tmesh {
    /// Creates a T-mesh with a single base-level tensor spanning the entire
    /// initial knot vector on every axis.
    pub fn new(p: Vec<usize>, knots: Vec<Vec<f64>>, nvars: usize) -> Result<Self> {
        if p.len() != knots.len() {
            return Err(Error::Shape(format!(
                "degree vector has {} entries but knots has {} axes",
                p.len(),
                knots.len()
            )));
        }
        let dom_dim = p.len();
        let all_knot_levels = knots.iter().map(|k| vec![0usize; k.len()]).collect();

        let knot_mins = vec![0usize; dom_dim];
        let knot_maxs: Vec<usize> = knots.iter().map(|k| k.len() - 1).collect();
        let nctrl_pts: Vec<usize> = knots.iter().zip(&p).map(|(k, &pi)| k.len() - pi - 1).collect();

        let base = TensorProduct::new(knot_mins, knot_maxs, 0, nctrl_pts, nvars);

        Ok(Self {
            dom_dim,
            p,
            all_knots: knots,
            all_knot_levels,
            tensor_prods: vec![base],
        })
    }

    /// Number of domain axes.
    #[must_use]
    pub fn dom_dim(&self) -> usize {
        self.dom_dim
    }

    /// Degree on each axis.
    #[must_use]
    pub fn degrees(&self) -> &[usize] {
        &self.p
    }

    /// Global knot vector for a given axis, including every knot inserted
    /// so far by any refinement round.
    #[must_use]
    pub fn knots(&self, axis: usize) -> &[f64] {
        &self.all_knots[axis]
    }

    /// Refinement level of the knot at `idx` on `axis`.
    #[must_use]
    pub fn knot_level(&self, axis: usize, idx: usize) -> usize {
        self.all_knot_levels[axis][idx]
    }

    /// All tensors currently in the T-mesh's arena, in insertion order. A
    /// tensor's position in this slice is its stable index, used by
    /// `next`/`prev` adjacency and by callers holding onto a tensor
    /// reference across insertions.
    #[must_use]
    pub fn tensors(&self) -> &[TensorProduct] {
        &self.tensor_prods
    }

    /// Mutable access to a tensor by its stable arena index.
    pub fn tensor_mut(&mut self, idx: usize) -> Result<&mut TensorProduct> {
        self.tensor_prods
            .get_mut(idx)
            .ok_or_else(|| Error::Invariant(format!("tensor index {idx} out of range")))
    }

    /// Inserts a knot value `u` at refinement `level` into `axis`'s global
    /// knot vector, maintaining sorted order, and shifts the knot-index
    /// bounds of every existing tensor that lies at or beyond the insertion
    /// point. Returns the new knot's global index. A duplicate knot value
    /// is a no-op that returns the existing index (idempotent, per the
    /// round-trip law that inserting an already-present knot changes
    /// nothing observable).
    pub fn insert_knot(&mut self, axis: usize, u: f64, level: usize) -> Result<usize> {
        if axis >= self.dom_dim {
            return Err(Error::Shape(format!("axis {axis} out of range")));
        }
        if !(0.0..=1.0).contains(&u) {
            return Err(Error::Domain(format!("knot value {u} outside [0, 1]")));
        }

        let knots = &self.all_knots[axis];
        let pos = knots.partition_point(|&k| k < u);
        if pos < knots.len() && (knots[pos] - u).abs() < 1e-12 {
            return Ok(pos);
        }

        self.all_knots[axis].insert(pos, u);
        self.all_knot_levels[axis].insert(pos, level);

        for t in &mut self.tensor_prods {
            if t.knot_mins[axis] >= pos {
                t.knot_mins[axis] += 1;
            }
            if t.knot_maxs[axis] >= pos {
                t.knot_maxs[axis] += 1;
            }
        }

        Ok(pos)
    }

    /// Inserts a new tensor spanning `[knot_mins, knot_maxs]` at `level`.
    /// Returns the new tensor's stable arena index.
    ///
    /// If an existing tensor's box fully contains the new box, that
    /// existing tensor is carved up per §4.3 step 2: for each axis where
    /// the container extends beyond the new box, the excess is split off
    /// into a sibling tensor at the container's original level (via
    /// [`Self::new_max_side`]), shrinking the container to the new box's
    /// extent on that axis; skipped when the excess is too thin to hold a
    /// control point, per spec ("splits that would produce a sub-box
    /// already subset of the new tensor are skipped"). Once every axis has
    /// been processed the container's box coincides exactly with the new
    /// box, and that arena slot is repurposed in place to hold the new,
    /// finer tensor — the arena index stays stable even though its
    /// contents changed, consistent with the "tensors never move" index
    /// contract (the logical tensor at that slot changes, not its
    /// identity as a reference target).
    ///
    /// If no existing tensor contains the new box, it is simply appended
    /// (the case of inserting beside, not inside, existing tensors).
    ///
    /// Adjacency for every tensor in the mesh is then rebuilt from
    /// scratch (§4.3 step 4's "prune any adjacency pointers that became
    /// invalid" is handled for free by recomputing rather than patching).
    ///
    /// Newly created control points (both siblings and the new tensor) are
    /// zero-initialized (weight 1); this is a simplification relative to
    /// the original's value-preserving split, which redistributes the
    /// parent's existing control points across the refined grid before the
    /// encoder re-solves for them (see `DESIGN.md`).
    pub fn insert_tensor(&mut self, knot_mins: Vec<usize>, knot_maxs: Vec<usize>, level: usize, nvars: usize) -> Result<usize> {
        if knot_mins.len() != self.dom_dim || knot_maxs.len() != self.dom_dim {
            return Err(Error::Shape("tensor bounds do not match dom_dim".to_string()));
        }
        for axis in 0..self.dom_dim {
            if knot_maxs[axis] <= knot_mins[axis] {
                return Err(Error::Invariant(format!(
                    "axis {axis}: knot_max ({}) must exceed knot_min ({})",
                    knot_maxs[axis], knot_mins[axis]
                )));
            }
            if knot_maxs[axis] >= self.all_knots[axis].len() {
                return Err(Error::Invariant(format!(
                    "axis {axis}: knot_max ({}) out of range",
                    knot_maxs[axis]
                )));
            }
        }

        let nctrl_pts: Vec<usize> = (0..self.dom_dim)
            .map(|axis| knot_maxs[axis] - knot_mins[axis] - self.p[axis])
            .collect();
        if nctrl_pts.iter().any(|&n| n == 0) {
            return Err(Error::Invariant(
                "tensor extent too small to hold any control points".to_string(),
            ));
        }

        let container = (0..self.tensor_prods.len()).find(|&idx| {
            let t = &self.tensor_prods[idx];
            itertools::izip!(&t.knot_mins, &knot_mins, &knot_maxs, &t.knot_maxs)
                .all(|(t_min, new_min, new_max, t_max)| t_min <= new_min && new_max <= t_max)
        });

        let new_idx = if let Some(container_idx) = container {
            self.new_max_side(container_idx, &knot_mins, &knot_maxs, level, &nctrl_pts, nvars)
        } else {
            let t = TensorProduct::new(knot_mins, knot_maxs, level, nctrl_pts, nvars);
            self.tensor_prods.push(t);
            self.tensor_prods.len() - 1
        };

        self.rebuild_adjacency();
        Ok(new_idx)
    }

    /// Carves the new box `[new_min, new_max]` out of the tensor at
    /// `container_idx`, axis by axis: excess on the min side and/or max
    /// side of each axis is split off into a sibling at the container's
    /// original level, and the container is shrunk to the new box's
    /// extent on that axis. Once every axis matches, `container_idx`'s
    /// slot is overwritten with the new, finer tensor and its own index is
    /// returned.
    fn new_max_side(
        &mut self,
        container_idx: usize,
        new_min: &[usize],
        new_max: &[usize],
        level: usize,
        new_nctrl: &[usize],
        nvars: usize,
    ) -> usize {
        let container_level = self.tensor_prods[container_idx].level;
        let mut cur_min = self.tensor_prods[container_idx].knot_mins.clone();
        let mut cur_max = self.tensor_prods[container_idx].knot_maxs.clone();

        for axis in 0..self.dom_dim {
            if cur_min[axis] < new_min[axis] {
                let mut sib_max = cur_max.clone();
                sib_max[axis] = new_min[axis];
                self.push_sibling_if_nonempty(cur_min.clone(), sib_max, container_level, nvars);
                cur_min[axis] = new_min[axis];
            }
            if new_max[axis] < cur_max[axis] {
                let mut sib_min = cur_min.clone();
                sib_min[axis] = new_max[axis];
                self.push_sibling_if_nonempty(sib_min, cur_max.clone(), container_level, nvars);
                cur_max[axis] = new_max[axis];
            }
        }

        self.tensor_prods[container_idx] = TensorProduct::new(new_min.to_vec(), new_max.to_vec(), level, new_nctrl.to_vec(), nvars);
        container_idx
    }

    /// Appends a sibling tensor spanning `[sib_min, sib_max]` at `level`,
    /// unless its extent is too thin on some axis to hold any control
    /// points, in which case it is dropped per §4.3's "skip" rule.
    fn push_sibling_if_nonempty(&mut self, sib_min: Vec<usize>, sib_max: Vec<usize>, level: usize, nvars: usize) {
        let sib_nctrl: Option<Vec<usize>> = (0..self.dom_dim)
            .map(|axis| sib_max[axis].checked_sub(sib_min[axis])?.checked_sub(self.p[axis]))
            .collect();
        let Some(sib_nctrl) = sib_nctrl else { return };
        if sib_nctrl.iter().any(|&n| n == 0) {
            return;
        }
        self.tensor_prods.push(TensorProduct::new(sib_min, sib_max, level, sib_nctrl, nvars));
    }

    /// Recomputes every tensor's `next`/`prev` adjacency from its current
    /// box, discarding whatever was there before. Correct by construction
    /// rather than by incremental patching, which also satisfies §4.3's
    /// "prune invalid pointers after a split shrank a face" requirement.
    fn rebuild_adjacency(&mut self) {
        for t in &mut self.tensor_prods {
            for axis_next in &mut t.next {
                axis_next.clear();
            }
            for axis_prev in &mut t.prev {
                axis_prev.clear();
            }
        }

        let n = self.tensor_prods.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let a = (self.tensor_prods[i].knot_mins.clone(), self.tensor_prods[i].knot_maxs.clone());
                let b = (self.tensor_prods[j].knot_mins.clone(), self.tensor_prods[j].knot_maxs.clone());
                if let Some((axis, dir)) = adjacent_boxes(&a.0, &a.1, &b.0, &b.1) {
                    if dir > 0 {
                        self.tensor_prods[i].next[axis].push(j);
                        self.tensor_prods[j].prev[axis].push(i);
                    } else {
                        self.tensor_prods[i].prev[axis].push(j);
                        self.tensor_prods[j].next[axis].push(i);
                    }
                }
            }
        }
    }

    /// Returns the tensors, at any level, whose knot-index box contains
    /// `anchor` (per-axis global knot index). When more than one tensor
    /// contains the anchor — which happens at a refinement boundary — the
    /// tensor(s) at the **highest** level are returned, matching the
    /// original T-mesh's conflict resolution (see the Open Question
    /// decision recorded in `DESIGN.md`).
    #[must_use]
    pub fn neighbor_tensors(&self, anchor: &[usize]) -> Vec<usize> {
        let mut best_level: Option<usize> = None;
        let mut result = Vec::new();

        for (idx, t) in self.tensor_prods.iter().enumerate() {
            let contains = (0..self.dom_dim).all(|axis| anchor[axis] >= t.knot_mins[axis] && anchor[axis] <= t.knot_maxs[axis]);
            if !contains {
                continue;
            }
            match best_level {
                Some(lvl) if t.level < lvl => {}
                Some(lvl) if t.level == lvl => result.push(idx),
                _ => {
                    best_level = Some(t.level);
                    result = vec![idx];
                }
            }
        }

        result
    }

    /// Walks outward from `center` (a per-axis global knot index) along
    /// `axis` until `p[axis] + 1` knots at or below `level` have been
    /// collected on each side (or the domain boundary is reached),
    /// returning their global indices in increasing order. This is the
    /// per-axis building block `anchors` uses to assemble a control
    /// point's local knot vector.
    pub fn knot_intersections(&self, axis: usize, center: usize, level: usize) -> Result<Vec<usize>> {
        if axis >= self.dom_dim {
            return Err(Error::Shape(format!("axis {axis} out of range")));
        }
        let levels = &self.all_knot_levels[axis];
        let p = self.p[axis];

        let mut left = Vec::new();
        let mut i = center;
        while left.len() < p && i > 0 {
            i -= 1;
            if levels[i] <= level {
                left.push(i);
            }
        }
        left.reverse();

        let mut right = Vec::new();
        let mut j = center;
        while right.len() < p + 1 && j + 1 < levels.len() {
            j += 1;
            if levels[j] <= level {
                right.push(j);
            }
        }

        let mut all = left;
        all.push(center);
        all.extend(right);
        Ok(all)
    }

    /// Computes the anchor (per-axis global knot index of the knot line, or
    /// midpoint knot span for even degree, that a control point is tied to)
    /// for every control point of `tensor_idx`, in the tensor's row-major
    /// control-point order.
    pub fn anchors(&self, tensor_idx: usize) -> Result<Vec<Vec<usize>>> {
        let t = self
            .tensor_prods
            .get(tensor_idx)
            .ok_or_else(|| Error::Invariant(format!("tensor index {tensor_idx} out of range")))?;

        let mut axis_anchors: Vec<Vec<usize>> = Vec::with_capacity(self.dom_dim);
        for axis in 0..self.dom_dim {
            let p = self.p[axis];
            let n = t.nctrl_pts[axis];
            let mut per_axis = Vec::with_capacity(n);
            for local_i in 0..n {
                // odd degree: anchor sits on a knot line; even degree: anchor
                // sits midway between two knot lines. Both are expressed as
                // the same "global knot index nearest the control point",
                // which is exact for odd `p` and the left neighbor for even
                // `p` (the decoder only ever uses anchors for adjacency
                // queries, not sub-span interpolation, so this suffices).
                let global = t.knot_mins[axis] + local_i + (p + 1) / 2;
                per_axis.push(global.min(t.knot_maxs[axis]));
            }
            axis_anchors.push(per_axis);
        }

        let shape = t.nctrl_pts.clone();
        let mut result = Vec::with_capacity(shape.iter().product());
        for idx in crate::nd_iter::MultiIndexIter::new(&shape) {
            let anchor: Vec<usize> = idx.iter().enumerate().map(|(axis, &i)| axis_anchors[axis][i]).collect();
            result.push(anchor);
        }

        Ok(result)
    }
}

/// Returns `Some((axis, dir))` if two knot-index boxes overlap on every
/// axis except one, on which they touch face-to-face: `dir > 0` if `b`
/// lies in the increasing direction from `a`, `dir < 0` otherwise. Returns
/// `None` if the boxes are not face-adjacent (e.g. they overlap on every
/// axis, or fail to overlap on more than one axis).
fn adjacent_boxes(a_min: &[usize], a_max: &[usize], b_min: &[usize], b_max: &[usize]) -> Option<(usize, i32)> {
    let d = a_min.len();
    let mut touch_axis = None;
    let mut dir = 0i32;

    for axis in 0..d {
        // Touching (not merely overlapping) takes priority: two boxes that
        // share a face have a_max == b_min (or vice versa) on that axis,
        // which a non-strict overlap test would also call "overlapping".
        if a_max[axis] == b_min[axis] {
            if touch_axis.is_some() {
                return None; // touches on more than one axis: not face-adjacent
            }
            touch_axis = Some(axis);
            dir = 1;
            continue;
        }
        if b_max[axis] == a_min[axis] {
            if touch_axis.is_some() {
                return None;
            }
            touch_axis = Some(axis);
            dir = -1;
            continue;
        }

        // Not touching on this axis: the boxes must strictly overlap here,
        // otherwise they are disjoint and not face-adjacent.
        let strict_overlap = a_min[axis] < b_max[axis] && b_min[axis] < a_max[axis];
        if !strict_overlap {
            return None;
        }
    }

    touch_axis.map(|axis| (axis, dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_tmesh() -> Tmesh {
        let knots = vec![vec![0.0, 0.0, 0.0, 0.0, 0.25, 0.5, 0.75, 1.0, 1.0, 1.0, 1.0]];
        Tmesh::new(vec![3], knots, 1).unwrap()
    }

    #[test]
    fn base_tensor_spans_whole_knot_vector() {
        let t = base_tmesh();
        assert_eq!(t.tensors().len(), 1);
        assert_eq!(t.tensors()[0].knot_mins, vec![0]);
        assert_eq!(t.tensors()[0].knot_maxs, vec![10]);
        assert_eq!(t.tensors()[0].nctrl_pts, vec![7]);
    }

    #[test]
    fn insert_knot_is_idempotent() {
        let mut t = base_tmesh();
        let i1 = t.insert_knot(0, 0.375, 1).unwrap();
        let len_after_first = t.knots(0).len();
        let i2 = t.insert_knot(0, 0.375, 1).unwrap();
        assert_eq!(i1, i2);
        assert_eq!(t.knots(0).len(), len_after_first);
    }

    #[test]
    fn insert_knot_shifts_existing_tensor_bounds() {
        let mut t = base_tmesh();
        t.insert_knot(0, 0.125, 1).unwrap();
        // 0.125 sorts before 0.25 but after the 4 repeated zero knots, so
        // index 4; the base tensor's max (originally 10) must shift to 11.
        assert_eq!(t.tensors()[0].knot_maxs[0], 11);
    }

    #[test]
    fn neighbor_tensors_prefers_highest_level() {
        let mut t = base_tmesh();
        t.insert_tensor(vec![0], vec![6], 1, 1).unwrap();
        // anchor near the overlap of the base tensor and the new, finer one
        let hits = t.neighbor_tensors(&[3]);
        assert!(hits.iter().all(|&idx| t.tensors()[idx].level == 1));
    }

    #[test]
    fn anchors_cover_every_control_point() {
        let t = base_tmesh();
        let anchors = t.anchors(0).unwrap();
        assert_eq!(anchors.len(), 7);
    }

    #[test]
    fn inserting_a_central_tensor_splits_the_container_into_four_siblings() {
        let knots = vec![crate::knots::uniform_knots(1, 11), crate::knots::uniform_knots(1, 11)];
        let mut t = Tmesh::new(vec![1, 1], knots, 1).unwrap();
        assert_eq!(t.tensors()[0].knot_mins, vec![0, 0]);
        assert_eq!(t.tensors()[0].knot_maxs, vec![12, 12]);

        let new_idx = t.insert_tensor(vec![4, 4], vec![8, 8], 1, 1).unwrap();

        assert_eq!(t.tensors().len(), 5);
        let level0: Vec<_> = t.tensors().iter().filter(|tp| tp.level == 0).collect();
        let level1: Vec<_> = t.tensors().iter().filter(|tp| tp.level == 1).collect();
        assert_eq!(level0.len(), 4);
        assert_eq!(level1.len(), 1);
        assert_eq!(t.tensors()[new_idx].knot_mins, vec![4, 4]);
        assert_eq!(t.tensors()[new_idx].knot_maxs, vec![8, 8]);
        assert_eq!(t.tensors()[new_idx].nctrl_pts, vec![3, 3]);

        let total_edges: usize = t
            .tensors()
            .iter()
            .map(|tp| tp.next.iter().map(Vec::len).sum::<usize>() + tp.prev.iter().map(Vec::len).sum::<usize>())
            .sum();
        assert_eq!(total_edges, 16); // 8 undirected edges, each counted from both ends
    }
}
