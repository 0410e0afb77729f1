//! Horizon shape of a stage-structured QP.

use std::fmt;

use crate::error::{OcpError, OcpResult};

/// Per-stage dimensions of an OCP-QP over stages `0..=N`.
///
/// The terminal stage never has controls: `nu[N]` and `nbu[N]` are forced
/// to zero on construction. `nbx`/`nbu` track the length of the active bound
/// index sets and are changed only by the bounds manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcpQpDims {
    n: usize,
    pub(crate) nx: Vec<usize>,
    pub(crate) nu: Vec<usize>,
    pub(crate) nbx: Vec<usize>,
    pub(crate) nbu: Vec<usize>,
    pub(crate) ng: Vec<usize>,
    pub(crate) ns: Vec<usize>,
}

impl OcpQpDims {
    /// Build a shape from per-stage counts (no slacks).
    pub fn new(
        nx: Vec<usize>,
        nu: Vec<usize>,
        nbx: Vec<usize>,
        nbu: Vec<usize>,
        ng: Vec<usize>,
    ) -> OcpResult<Self> {
        let ns = vec![0; nx.len()];
        Self::with_slacks(nx, nu, nbx, nbu, ng, ns)
    }

    /// Build a shape from per-stage counts including slack counts.
    pub fn with_slacks(
        nx: Vec<usize>,
        mut nu: Vec<usize>,
        nbx: Vec<usize>,
        mut nbu: Vec<usize>,
        ng: Vec<usize>,
        ns: Vec<usize>,
    ) -> OcpResult<Self> {
        if nx.is_empty() {
            return Err(OcpError::Usage("horizon must have at least one stage".into()));
        }
        let stages = nx.len();
        for (name, v) in [("nu", &nu), ("nbx", &nbx), ("nbu", &nbu), ("ng", &ng), ("ns", &ns)] {
            if v.len() != stages {
                return Err(OcpError::Usage(format!(
                    "{name} has {} entries, expected {stages} (one per stage)",
                    v.len()
                )));
            }
        }

        // No controls on the terminal stage.
        if let Some(last) = nu.last_mut() {
            *last = 0;
        }
        if let Some(last) = nbu.last_mut() {
            *last = 0;
        }

        for i in 0..stages {
            if nbx[i] > nx[i] {
                return Err(OcpError::Usage(format!(
                    "stage {i}: nbx = {} exceeds nx = {}",
                    nbx[i], nx[i]
                )));
            }
            if nbu[i] > nu[i] {
                return Err(OcpError::Usage(format!(
                    "stage {i}: nbu = {} exceeds nu = {}",
                    nbu[i], nu[i]
                )));
            }
            if ns[i] > nbx[i] + nbu[i] + ng[i] {
                return Err(OcpError::Usage(format!(
                    "stage {i}: ns = {} exceeds the number of constraints {}",
                    ns[i],
                    nbx[i] + nbu[i] + ng[i]
                )));
            }
        }

        Ok(Self { n: stages - 1, nx, nu, nbx, nbu, ng, ns })
    }

    /// Shape with identical counts on every stage of an `n`-interval horizon.
    pub fn uniform(
        n: usize,
        nx: usize,
        nu: usize,
        nbx: usize,
        nbu: usize,
        ng: usize,
        ns: usize,
    ) -> OcpResult<Self> {
        let stages = n + 1;
        Self::with_slacks(
            vec![nx; stages],
            vec![nu; stages],
            vec![nbx; stages],
            vec![nbu; stages],
            vec![ng; stages],
            vec![ns; stages],
        )
    }

    /// Number of intervals `N` (the horizon has `N + 1` stages).
    #[inline]
    pub fn horizon(&self) -> usize {
        self.n
    }

    /// Number of stages `N + 1`.
    #[inline]
    pub fn num_stages(&self) -> usize {
        self.n + 1
    }

    pub fn nx(&self) -> &[usize] {
        &self.nx
    }

    pub fn nu(&self) -> &[usize] {
        &self.nu
    }

    pub fn nbx(&self) -> &[usize] {
        &self.nbx
    }

    pub fn nbu(&self) -> &[usize] {
        &self.nbu
    }

    pub fn ng(&self) -> &[usize] {
        &self.ng
    }

    pub fn ns(&self) -> &[usize] {
        &self.ns
    }

    /// Box constraints on stage `i` (`nbu + nbx`).
    #[inline]
    pub fn nb(&self, i: usize) -> usize {
        self.nbu[i] + self.nbx[i]
    }

    /// All two-sided constraints on stage `i` (`nb + ng`).
    #[inline]
    pub fn nc(&self, i: usize) -> usize {
        self.nb(i) + self.ng[i]
    }

    /// Primal variables on stage `i` (`nu + nx`).
    #[inline]
    pub fn nv(&self, i: usize) -> usize {
        self.nu[i] + self.nx[i]
    }

    /// State dimension of the successor of stage `i` (0 on the terminal stage).
    #[inline]
    pub fn nx_next(&self, i: usize) -> usize {
        if i < self.n {
            self.nx[i + 1]
        } else {
            0
        }
    }

    /// Total number of primal variables over the horizon.
    pub fn total_vars(&self) -> usize {
        (0..self.num_stages()).map(|i| self.nv(i)).sum()
    }

    /// True if any stage has soft constraints.
    pub fn has_slacks(&self) -> bool {
        self.ns.iter().any(|&s| s > 0)
    }
}

impl fmt::Display for OcpQpDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "OCP QP with N = {}", self.n)?;
        writeln!(f, "{:>6} {:>5} {:>5} {:>5} {:>5} {:>5} {:>5}", "stage", "nx", "nu", "nbx", "nbu", "ng", "ns")?;
        for i in 0..self.num_stages() {
            writeln!(
                f,
                "{:>6} {:>5} {:>5} {:>5} {:>5} {:>5} {:>5}",
                i, self.nx[i], self.nu[i], self.nbx[i], self.nbu[i], self.ng[i], self.ns[i]
            )?;
        }
        Ok(())
    }
}
