//! Closed enumeration of addressable QP fields.

use std::fmt;
use std::str::FromStr;

use crate::dims::OcpQpDims;
use crate::error::{OcpError, OcpResult};

/// A named per-stage block of the QP.
///
/// Matrices are exchanged in column-major order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum Field {
    Q,
    S,
    R,
    q,
    r,
    A,
    B,
    b,
    lbx,
    ubx,
    lbu,
    ubu,
    C,
    D,
    lg,
    ug,
}

impl Field {
    /// Every field, in declaration order.
    pub const ALL: [Field; 16] = [
        Field::Q,
        Field::S,
        Field::R,
        Field::q,
        Field::r,
        Field::A,
        Field::B,
        Field::b,
        Field::lbx,
        Field::ubx,
        Field::lbu,
        Field::ubu,
        Field::C,
        Field::D,
        Field::lg,
        Field::ug,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Q => "Q",
            Field::S => "S",
            Field::R => "R",
            Field::q => "q",
            Field::r => "r",
            Field::A => "A",
            Field::B => "B",
            Field::b => "b",
            Field::lbx => "lbx",
            Field::ubx => "ubx",
            Field::lbu => "lbu",
            Field::ubu => "ubu",
            Field::C => "C",
            Field::D => "D",
            Field::lg => "lg",
            Field::ug => "ug",
        }
    }

    /// Dynamics blocks only exist on stages `0..N`.
    #[inline]
    pub fn is_dynamics(self) -> bool {
        matches!(self, Field::A | Field::B | Field::b)
    }

    /// Box-bound fields, owned by the bounds manager.
    #[inline]
    pub fn is_bound(self) -> bool {
        matches!(self, Field::lbx | Field::ubx | Field::lbu | Field::ubu)
    }

    /// Last stage on which this field is defined.
    #[inline]
    pub fn last_stage(self, dims: &OcpQpDims) -> Option<usize> {
        let n = dims.horizon();
        if self.is_dynamics() {
            n.checked_sub(1)
        } else {
            Some(n)
        }
    }

    /// Whether `stage` addresses an existing block of this field.
    #[inline]
    pub fn in_range(self, dims: &OcpQpDims, stage: usize) -> bool {
        self.last_stage(dims).is_some_and(|last| stage <= last)
    }

    /// `(rows, cols)` of this field at `stage`.
    pub fn shape(self, dims: &OcpQpDims, stage: usize) -> OcpResult<(usize, usize)> {
        if !self.in_range(dims, stage) {
            return Err(OcpError::Range {
                field: self.name().to_string(),
                stage,
                end: self.last_stage(dims).map_or(0, |last| last + 1),
            });
        }
        let nx = dims.nx[stage];
        let nu = dims.nu[stage];
        let ng = dims.ng[stage];
        let nx1 = dims.nx_next(stage);
        Ok(match self {
            Field::Q => (nx, nx),
            Field::S => (nu, nx),
            Field::R => (nu, nu),
            Field::q => (nx, 1),
            Field::r => (nu, 1),
            Field::A => (nx1, nx),
            Field::B => (nx1, nu),
            Field::b => (nx1, 1),
            Field::lbx | Field::ubx => (nx, 1),
            Field::lbu | Field::ubu => (nu, 1),
            Field::C => (ng, nx),
            Field::D => (ng, nu),
            Field::lg | Field::ug => (ng, 1),
        })
    }

    /// Number of elements of this field at `stage`.
    #[inline]
    pub fn num_elements(self, dims: &OcpQpDims, stage: usize) -> OcpResult<usize> {
        self.shape(dims, stage).map(|(r, c)| r * c)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Field {
    type Err = OcpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| OcpError::UnknownField(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn dims() -> OcpQpDims {
        OcpQpDims::new(vec![3, 2, 4], vec![2, 1, 0], vec![0, 0, 0], vec![0, 0, 0], vec![1, 0, 2])
            .unwrap()
    }

    #[test]
    fn test_parse_round_trip() {
        for f in Field::ALL {
            assert_eq!(f.name().parse::<Field>().unwrap(), f);
        }
    }

    #[test]
    fn test_unknown_field_is_usage_error() {
        let err = "Zl".parse::<Field>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.to_string().contains("Zl"));
    }

    #[test]
    fn test_shapes() {
        let d = dims();
        assert_eq!(Field::Q.shape(&d, 0).unwrap(), (3, 3));
        assert_eq!(Field::S.shape(&d, 0).unwrap(), (2, 3));
        assert_eq!(Field::A.shape(&d, 0).unwrap(), (2, 3));
        assert_eq!(Field::B.shape(&d, 1).unwrap(), (4, 1));
        assert_eq!(Field::b.shape(&d, 1).unwrap(), (4, 1));
        assert_eq!(Field::C.shape(&d, 2).unwrap(), (2, 4));
        assert_eq!(Field::D.shape(&d, 2).unwrap(), (2, 0));
        assert_eq!(Field::lbu.num_elements(&d, 2).unwrap(), 0);
    }

    #[test]
    fn test_dynamics_out_of_range_on_terminal_stage() {
        let d = dims();
        let err = Field::A.shape(&d, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
        assert!(Field::Q.in_range(&d, 2));
        assert!(!Field::Q.in_range(&d, 3));
    }

    #[test]
    fn test_dynamics_without_intervals_has_empty_range() {
        let d = OcpQpDims::new(vec![2], vec![0], vec![0], vec![0], vec![0]).unwrap();
        let err = Field::B.shape(&d, 0).unwrap_err();
        assert!(matches!(err, OcpError::Range { stage: 0, end: 0, .. }), "{err:?}");
        assert!(err.to_string().contains("valid: 0..0"), "{err}");
        assert!(Field::Q.shape(&d, 0).is_ok());
    }
}
