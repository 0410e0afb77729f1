//! Box-bound bookkeeping: dense caller bounds vs. packed backend bounds.
//!
//! Callers set full-length bound vectors in which `±∞` marks a free entry.
//! Backends want only the finite entries, addressed through an index set.
//! The manager keeps the dense vectors as the source of truth and derives the
//! index sets (and therefore `nbx`/`nbu`) from them:
//!
//! - **squeeze** recomputes every index set from the dense cache, shrinking
//!   `nbx`/`nbu` to the minimal active set,
//! - **expand** switches every stage to full-dimension index sets, used when a
//!   bound write changes which entries are finite,
//! - **fill-in** projects the dense cache through the current index sets into
//!   the packed arrays right before a solve.

use nalgebra::DVector;
use tracing::debug;

use crate::data::{OcpQpData, StageData};
use crate::dims::OcpQpDims;
use crate::error::{OcpError, OcpResult};

/// Variable class a box bound applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarClass {
    State,
    Control,
}

impl VarClass {
    pub const BOTH: [VarClass; 2] = [VarClass::State, VarClass::Control];

    #[inline]
    fn slot(self) -> usize {
        match self {
            VarClass::State => 0,
            VarClass::Control => 1,
        }
    }

    /// Dense dimension of this class on `stage`.
    #[inline]
    pub fn dim(self, dims: &OcpQpDims, stage: usize) -> usize {
        match self {
            VarClass::State => dims.nx[stage],
            VarClass::Control => dims.nu[stage],
        }
    }

    /// Active bound count of this class on `stage`.
    #[inline]
    pub fn num_bounds(self, dims: &OcpQpDims, stage: usize) -> usize {
        match self {
            VarClass::State => dims.nbx[stage],
            VarClass::Control => dims.nbu[stage],
        }
    }
}

/// Lower or upper side of a box bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoundSide {
    Lower,
    Upper,
}

impl BoundSide {
    /// Value meaning "no bound" on this side.
    #[inline]
    pub fn unbounded(self) -> f64 {
        match self {
            BoundSide::Lower => f64::NEG_INFINITY,
            BoundSide::Upper => f64::INFINITY,
        }
    }
}

/// Indices at which a lower or an upper bound is present.
///
/// An entry is inactive only if `lower == -∞` and `upper == +∞`.
pub fn compute_index_set(lower: &[f64], upper: &[f64]) -> OcpResult<Vec<usize>> {
    if lower.len() != upper.len() {
        return Err(OcpError::Usage(format!(
            "lower bound must have same shape as upper bound ({} vs {})",
            lower.len(),
            upper.len()
        )));
    }
    Ok(lower
        .iter()
        .zip(upper)
        .enumerate()
        .filter(|(_, (&lb, &ub))| lb != f64::NEG_INFINITY || ub != f64::INFINITY)
        .map(|(i, _)| i)
        .collect())
}

/// Scatter packed bound values back to a dense vector of length `n`.
///
/// Positions in `idx` take the packed values, all others take `fill`.
pub fn expand_packed(idx: &[usize], packed: &[f64], n: usize, fill: f64) -> Vec<f64> {
    debug_assert_eq!(idx.len(), packed.len());
    let mut dense = vec![fill; n];
    for (&i, &v) in idx.iter().zip(packed) {
        dense[i] = v;
    }
    dense
}

#[derive(Debug, Clone, PartialEq)]
struct DenseBounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl DenseBounds {
    fn unbounded(n: usize) -> Self {
        Self { lower: vec![f64::NEG_INFINITY; n], upper: vec![f64::INFINITY; n] }
    }

    fn side(&self, side: BoundSide) -> &[f64] {
        match side {
            BoundSide::Lower => &self.lower,
            BoundSide::Upper => &self.upper,
        }
    }
}

/// Index sets computed by a squeeze, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqueezePlan {
    /// `idx[stage][class]`, state first.
    idx: Vec<[Vec<usize>; 2]>,
}

impl SqueezePlan {
    /// Active bound counts `(nbx, nbu)` the plan will produce.
    pub fn counts(&self) -> (Vec<usize>, Vec<usize>) {
        let nbx = self.idx.iter().map(|s| s[0].len()).collect();
        let nbu = self.idx.iter().map(|s| s[1].len()).collect();
        (nbx, nbu)
    }

    /// Shape the QP will have once the plan is applied.
    pub fn squeezed_dims(&self, dims: &OcpQpDims) -> OcpQpDims {
        let mut out = dims.clone();
        let (nbx, nbu) = self.counts();
        out.nbx = nbx;
        out.nbu = nbu;
        out
    }
}

/// Dense bound cache for the whole horizon.
#[derive(Debug, Clone)]
pub struct BoundsManager {
    /// `cache[stage][class]`, state first.
    cache: Vec<[DenseBounds; 2]>,
}

impl BoundsManager {
    /// All-free bounds for the given shape.
    pub fn new(dims: &OcpQpDims) -> Self {
        let cache = (0..dims.num_stages())
            .map(|i| {
                [
                    DenseBounds::unbounded(dims.nx[i]),
                    DenseBounds::unbounded(dims.nu[i]),
                ]
            })
            .collect();
        Self { cache }
    }

    /// Cached dense bound vector.
    pub fn dense(&self, stage: usize, class: VarClass, side: BoundSide) -> &[f64] {
        self.cache[stage][class.slot()].side(side)
    }

    /// Active index set the cache implies for `(stage, class)`.
    pub fn implied_index_set(&self, stage: usize, class: VarClass) -> Vec<usize> {
        let c = &self.cache[stage][class.slot()];
        // Lengths agree by construction.
        compute_index_set(&c.lower, &c.upper).unwrap_or_default()
    }

    /// Overwrite one side of a dense bound.
    ///
    /// Returns `true` if the set of finite entries no longer matches the
    /// current index set, in which case the whole horizon has been expanded.
    pub(crate) fn set_side(
        &mut self,
        dims: &mut OcpQpDims,
        data: &mut OcpQpData,
        stage: usize,
        class: VarClass,
        side: BoundSide,
        values: &[f64],
    ) -> OcpResult<bool> {
        let c = &self.cache[stage][class.slot()];
        let (lower, upper) = match side {
            BoundSide::Lower => (values.to_vec(), c.upper.clone()),
            BoundSide::Upper => (c.lower.clone(), values.to_vec()),
        };
        self.set_both(dims, data, stage, class, &lower, &upper)
    }

    /// Overwrite both sides of a dense bound at once.
    pub(crate) fn set_both(
        &mut self,
        dims: &mut OcpQpDims,
        data: &mut OcpQpData,
        stage: usize,
        class: VarClass,
        lower: &[f64],
        upper: &[f64],
    ) -> OcpResult<bool> {
        let n = class.dim(dims, stage);
        if lower.len() != n || upper.len() != n {
            return Err(OcpError::Usage(format!(
                "stage {stage}: {class:?} bounds need {n} entries, got {} and {}",
                lower.len(),
                upper.len()
            )));
        }
        if lower.iter().chain(upper).any(|v| v.is_nan()) {
            return Err(OcpError::Usage(format!("stage {stage}: {class:?} bound is NaN")));
        }

        let new_idx = compute_index_set(lower, upper)?;
        let slot = &mut self.cache[stage][class.slot()];
        slot.lower.copy_from_slice(lower);
        slot.upper.copy_from_slice(upper);

        let current = current_index(data.stage(stage), class);
        let changed = current != new_idx.as_slice();
        if changed {
            debug!(stage, ?class, old = ?current, new = ?new_idx, "active bound set changed, expanding");
            self.expand(dims, data);
        }

        let slot = &self.cache[stage][class.slot()];
        let st = data.stage_mut(stage);
        match class {
            VarClass::State => {
                st.lbx = gather(&slot.lower, &st.idxbx, None);
                st.ubx = gather(&slot.upper, &st.idxbx, None);
            }
            VarClass::Control => {
                st.lbu = gather(&slot.lower, &st.idxbu, None);
                st.ubu = gather(&slot.upper, &st.idxbu, None);
            }
        }
        Ok(changed)
    }

    /// Replace the index set of `(stage, class)` without changing its length.
    ///
    /// `idx` must be strictly increasing and within the class dimension. The
    /// packed arrays of that stage are re-gathered from the dense cache.
    pub(crate) fn set_index_set(
        &self,
        dims: &OcpQpDims,
        data: &mut OcpQpData,
        stage: usize,
        class: VarClass,
        idx: &[usize],
    ) -> OcpResult<()> {
        let nb = class.num_bounds(dims, stage);
        let n = class.dim(dims, stage);
        if idx.len() != nb {
            return Err(OcpError::Usage(format!(
                "stage {stage}: {class:?} index set needs {nb} entries, got {}",
                idx.len()
            )));
        }
        if idx.windows(2).any(|w| w[0] >= w[1]) || idx.last().is_some_and(|&j| j >= n) {
            return Err(OcpError::Usage(format!(
                "stage {stage}: {class:?} index set {idx:?} must be strictly increasing and below {n}"
            )));
        }
        let c = &self.cache[stage][class.slot()];
        let st = data.stage_mut(stage);
        match class {
            VarClass::State => {
                st.idxbx = idx.to_vec();
                st.lbx = gather(&c.lower, idx, None);
                st.ubx = gather(&c.upper, idx, None);
            }
            VarClass::Control => {
                st.idxbu = idx.to_vec();
                st.lbu = gather(&c.lower, idx, None);
                st.ubu = gather(&c.upper, idx, None);
            }
        }
        Ok(())
    }

    /// Compute the minimal active index sets from the dense cache.
    pub fn plan_squeeze(&self) -> SqueezePlan {
        let idx = (0..self.cache.len())
            .map(|i| {
                [
                    self.implied_index_set(i, VarClass::State),
                    self.implied_index_set(i, VarClass::Control),
                ]
            })
            .collect();
        SqueezePlan { idx }
    }

    /// Apply a squeeze plan: resize `nbx`/`nbu` and the packed arrays.
    pub(crate) fn apply_squeeze(&self, plan: SqueezePlan, dims: &mut OcpQpDims, data: &mut OcpQpData) {
        for (i, [idx_x, idx_u]) in plan.idx.into_iter().enumerate() {
            dims.nbx[i] = idx_x.len();
            dims.nbu[i] = idx_u.len();
            let st = data.stage_mut(i);
            st.idxbx = idx_x;
            st.idxbu = idx_u;
        }
        self.project(dims, data, None);
        debug!(nbx = ?dims.nbx, nbu = ?dims.nbu, "squeezed bound dimensions");
    }

    /// Switch every stage to full-dimension index sets.
    ///
    /// The packed arrays become dense: previously active positions keep their
    /// packed value, all others are unbounded.
    pub(crate) fn expand(&self, dims: &mut OcpQpDims, data: &mut OcpQpData) {
        for i in 0..dims.num_stages() {
            let nx = dims.nx[i];
            let nu = dims.nu[i];
            let st = data.stage_mut(i);

            st.lbx = DVector::from_vec(expand_packed(&st.idxbx, st.lbx.as_slice(), nx, f64::NEG_INFINITY));
            st.ubx = DVector::from_vec(expand_packed(&st.idxbx, st.ubx.as_slice(), nx, f64::INFINITY));
            st.lbu = DVector::from_vec(expand_packed(&st.idxbu, st.lbu.as_slice(), nu, f64::NEG_INFINITY));
            st.ubu = DVector::from_vec(expand_packed(&st.idxbu, st.ubu.as_slice(), nu, f64::INFINITY));
            st.idxbx = (0..nx).collect();
            st.idxbu = (0..nu).collect();

            dims.nbx[i] = nx;
            dims.nbu[i] = nu;
        }
    }

    /// Write the packed backend bounds from the dense cache.
    ///
    /// Non-finite entries become `∓inf_bound`. `lg`/`ug` are caller data and
    /// stay as written; backends classify them through
    /// [`OcpQpData::is_lower_active`] and [`OcpQpData::is_upper_active`].
    pub(crate) fn fill_in(&self, dims: &OcpQpDims, data: &mut OcpQpData) {
        let inf = data.inf_bound;
        self.project(dims, data, Some(inf));
    }

    fn project(&self, dims: &OcpQpDims, data: &mut OcpQpData, sentinel: Option<f64>) {
        for i in 0..dims.num_stages() {
            let [cx, cu] = &self.cache[i];
            let st = data.stage_mut(i);
            st.lbx = gather(&cx.lower, &st.idxbx, sentinel.map(|s| -s));
            st.ubx = gather(&cx.upper, &st.idxbx, sentinel);
            st.lbu = gather(&cu.lower, &st.idxbu, sentinel.map(|s| -s));
            st.ubu = gather(&cu.upper, &st.idxbu, sentinel);
        }
    }
}

fn current_index(stage: &StageData, class: VarClass) -> &[usize] {
    match class {
        VarClass::State => &stage.idxbx,
        VarClass::Control => &stage.idxbu,
    }
}

fn gather(dense: &[f64], idx: &[usize], sentinel: Option<f64>) -> DVector<f64> {
    DVector::from_iterator(
        idx.len(),
        idx.iter().map(|&i| {
            let v = dense[i];
            match sentinel {
                Some(s) if !v.is_finite() => s,
                _ => v,
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const INF: f64 = f64::INFINITY;

    fn setup() -> (OcpQpDims, OcpQpData, BoundsManager) {
        let dims = OcpQpDims::new(vec![2, 2, 2], vec![1, 1, 0], vec![0, 0, 0], vec![0, 0, 0], vec![0, 0, 0])
            .unwrap();
        let data = OcpQpData::zeros(&dims);
        let bm = BoundsManager::new(&dims);
        (dims, data, bm)
    }

    #[test]
    fn test_index_set_one_sided() {
        let idx = compute_index_set(&[-1.0, -INF, -INF], &[INF, INF, 2.0]).unwrap();
        assert_eq!(idx, vec![0, 2]);
    }

    #[test]
    fn test_index_set_size_mismatch() {
        let err = compute_index_set(&[0.0], &[1.0, 2.0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn test_expand_packed() {
        let dense = expand_packed(&[1], &[5.0], 3, -INF);
        assert_eq!(dense, vec![-INF, 5.0, -INF]);
    }

    #[test]
    fn test_unchanged_active_set_does_not_expand() {
        let (mut dims, mut data, mut bm) = setup();
        // Initial index sets are empty (nbx = 0) and the bound stays free.
        let changed = bm
            .set_side(&mut dims, &mut data, 1, VarClass::State, BoundSide::Lower, &[-INF, -INF])
            .unwrap();
        assert!(!changed);
        assert_eq!(dims.nbx(), &[0, 0, 0]);
    }

    #[test]
    fn test_new_finite_bound_expands_whole_horizon() {
        let (mut dims, mut data, mut bm) = setup();
        let changed = bm
            .set_side(&mut dims, &mut data, 0, VarClass::State, BoundSide::Lower, &[-1.0, -INF])
            .unwrap();
        assert!(changed);
        assert_eq!(dims.nbx(), &[2, 2, 2]);
        assert_eq!(dims.nbu(), &[1, 1, 0]);
        assert_eq!(data.stage(2).idxbx(), &[0, 1]);

        let plan = bm.plan_squeeze();
        bm.apply_squeeze(plan, &mut dims, &mut data);
        assert_eq!(dims.nbx(), &[1, 0, 0]);
        assert_eq!(dims.nbu(), &[0, 0, 0]);
        assert_eq!(data.stage(0).idxbx(), &[0]);
        assert_eq!(data.stage(0).lbx().as_slice(), &[-1.0]);
    }

    #[test]
    fn test_fill_in_substitutes_sentinel() {
        let (mut dims, mut data, mut bm) = setup();
        bm.set_both(&mut dims, &mut data, 0, VarClass::State, &[-1.0, -INF], &[INF, 3.0]).unwrap();
        let plan = bm.plan_squeeze();
        bm.apply_squeeze(plan, &mut dims, &mut data);
        bm.fill_in(&dims, &mut data);
        let st = data.stage(0);
        assert_eq!(st.idxbx(), &[0, 1]);
        assert_eq!(st.lbx().as_slice(), &[-1.0, -data.inf_bound()]);
        assert_eq!(st.ubx().as_slice(), &[data.inf_bound(), 3.0]);
    }

    #[test]
    fn test_expanding_write_packs_new_values() {
        let (mut dims, mut data, mut bm) = setup();
        let changed = bm.set_both(&mut dims, &mut data, 0, VarClass::State, &[-1.0, -INF], &[INF, 2.0]).unwrap();
        assert!(changed);
        let st = data.stage(0);
        assert_eq!(st.idxbx(), &[0, 1]);
        assert_eq!(st.lbx().as_slice(), &[-1.0, -INF]);
        assert_eq!(st.ubx().as_slice(), &[INF, 2.0]);
    }

    #[test]
    fn test_fill_in_keeps_general_bounds() {
        let mut dims = OcpQpDims::new(vec![1, 1], vec![1, 0], vec![0, 0], vec![0, 0], vec![1, 1]).unwrap();
        let mut data = OcpQpData::zeros(&dims);
        let mut bm = BoundsManager::new(&dims);
        data.stage_mut(1).ug[0] = 4.0;
        bm.set_both(&mut dims, &mut data, 0, VarClass::Control, &[-INF], &[1.0]).unwrap();
        bm.fill_in(&dims, &mut data);
        assert_eq!(data.stage(0).lg.as_slice(), &[-INF]);
        assert_eq!(data.stage(0).ug.as_slice(), &[INF]);
        assert_eq!(data.stage(1).lg.as_slice(), &[-INF]);
        assert_eq!(data.stage(1).ug.as_slice(), &[4.0]);
        assert_eq!(data.stage(0).lbu().as_slice(), &[-data.inf_bound()]);
    }

    #[test]
    fn test_set_index_set_validation() {
        let (mut dims, mut data, mut bm) = setup();
        bm.set_both(&mut dims, &mut data, 1, VarClass::State, &[0.0, -1.0], &[INF, 1.0]).unwrap();
        // After the expand every stage has nbx = 2.
        bm.set_index_set(&dims, &mut data, 1, VarClass::State, &[0, 1]).unwrap();
        assert_eq!(data.stage(1).lbx().as_slice(), &[0.0, -1.0]);
        assert!(bm.set_index_set(&dims, &mut data, 1, VarClass::State, &[1, 0]).is_err());
        assert!(bm.set_index_set(&dims, &mut data, 1, VarClass::State, &[0, 2]).is_err());
        assert!(bm.set_index_set(&dims, &mut data, 1, VarClass::State, &[0]).is_err());
    }

    #[test]
    fn test_nan_bound_rejected() {
        let (mut dims, mut data, mut bm) = setup();
        let err = bm
            .set_both(&mut dims, &mut data, 0, VarClass::Control, &[f64::NAN], &[1.0])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(bm.dense(0, VarClass::Control, BoundSide::Lower), &[-INF]);
    }
}
