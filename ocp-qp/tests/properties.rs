//! Data-model and bound-manager properties of the OCP-QP facade.

use ocp_qp::{BackendOptions, ErrorKind, Field, OcpError, OcpQp, OcpQpDims, VarClass};
use proptest::prelude::*;

const INF: f64 = f64::INFINITY;

fn horizon() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    (1usize..5).prop_flat_map(|stages| {
        (
            prop::collection::vec(1usize..4, stages),
            prop::collection::vec(0usize..3, stages),
        )
    })
}

fn lower_entry() -> impl Strategy<Value = f64> {
    prop_oneof![Just(-INF), -10.0..0.0f64]
}

fn upper_entry() -> impl Strategy<Value = f64> {
    prop_oneof![Just(INF), 0.0..10.0f64]
}

/// A shape plus a pool of bound values large enough for any stage.
fn shape_with_bounds() -> impl Strategy<Value = (Vec<usize>, Vec<usize>, Vec<f64>, Vec<f64>)> {
    horizon().prop_flat_map(|(nx, nu)| {
        let pool = nx.len() * 6;
        (
            Just(nx),
            Just(nu),
            prop::collection::vec(lower_entry(), pool),
            prop::collection::vec(upper_entry(), pool),
        )
    })
}

fn build_qp(nx: &[usize], nu: &[usize]) -> OcpQp {
    let stages = nx.len();
    let dims = OcpQpDims::new(nx.to_vec(), nu.to_vec(), vec![0; stages], vec![0; stages], vec![0; stages])
        .unwrap();
    OcpQp::new(dims)
}

/// Write every dense bound from the value pools.
fn apply_bounds(qp: &mut OcpQp, lower: &[f64], upper: &[f64]) {
    let mut cursor = 0;
    for i in 0..qp.dims().num_stages() {
        for class in VarClass::BOTH {
            let n = match class {
                VarClass::State => qp.nx()[i],
                VarClass::Control => qp.nu()[i],
            };
            let lb = &lower[cursor..cursor + n];
            let ub = &upper[cursor..cursor + n];
            cursor += n;
            qp.set_bounds(i, class, lb, ub).unwrap();
        }
    }
}

fn index_sets(qp: &OcpQp) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
    (qp.bounds_indices(VarClass::State), qp.bounds_indices(VarClass::Control))
}

proptest! {
    #[test]
    fn terminal_stage_has_no_controls((nx, nu) in horizon(), nbu_last in 0usize..5) {
        let stages = nx.len();
        let mut nbu = vec![0; stages];
        nbu[stages - 1] = nbu_last;
        let mut nu_in = nu.clone();
        nu_in[stages - 1] = nbu_last;
        let dims = OcpQpDims::new(nx, nu_in, vec![0; stages], nbu, vec![0; stages]).unwrap();
        prop_assert_eq!(dims.nu()[stages - 1], 0);
        prop_assert_eq!(dims.nbu()[stages - 1], 0);
    }

    #[test]
    fn set_get_round_trip((nx, nu) in horizon(), seed in any::<u64>()) {
        let mut qp = build_qp(&nx, &nu);
        for field in Field::ALL {
            let Some(last) = field.last_stage(qp.dims()) else { continue };
            for stage in 0..=last {
                let len = field.num_elements(qp.dims(), stage).unwrap();
                let values: Vec<f64> = (0..len)
                    .map(|k| ((seed as f64) * 1e-3 + k as f64 + stage as f64).sin())
                    .collect();
                qp.set(field, stage, &values).unwrap();
                prop_assert_eq!(&qp.get_field(field.name()).unwrap()[stage], &values);
            }
        }
    }

    #[test]
    fn squeeze_is_idempotent((nx, nu, lower, upper) in shape_with_bounds()) {
        let mut qp = build_qp(&nx, &nu);
        apply_bounds(&mut qp, &lower, &upper);
        qp.squeeze_dimensions();
        let first = index_sets(&qp);
        let dims = qp.dims().clone();
        qp.squeeze_dimensions();
        prop_assert_eq!(index_sets(&qp), first);
        prop_assert_eq!(qp.dims(), &dims);
    }

    #[test]
    fn expand_then_squeeze_restores_active_set((nx, nu, lower, upper) in shape_with_bounds()) {
        let mut qp = build_qp(&nx, &nu);
        apply_bounds(&mut qp, &lower, &upper);
        qp.squeeze_dimensions();
        let squeezed = index_sets(&qp);
        qp.expand_dimensions();
        prop_assert_eq!(qp.nbx(), qp.nx());
        qp.squeeze_dimensions();
        prop_assert_eq!(index_sets(&qp), squeezed);
    }

    #[test]
    fn all_infinite_bounds_give_empty_index_sets((nx, nu) in horizon()) {
        let mut qp = build_qp(&nx, &nu);
        qp.expand_dimensions();
        for i in 0..nx.len() {
            for class in VarClass::BOTH {
                let n = match class {
                    VarClass::State => qp.nx()[i],
                    VarClass::Control => qp.nu()[i],
                };
                qp.set_bounds(i, class, &vec![-INF; n], &vec![INF; n]).unwrap();
            }
        }
        qp.squeeze_dimensions();
        prop_assert!(qp.nbx().iter().all(|&n| n == 0));
        prop_assert!(qp.nbu().iter().all(|&n| n == 0));
    }

    #[test]
    fn index_set_marks_finite_positions((nx, nu, lower, upper) in shape_with_bounds()) {
        let mut qp = build_qp(&nx, &nu);
        apply_bounds(&mut qp, &lower, &upper);
        qp.squeeze_dimensions();
        let (idx_x, _) = index_sets(&qp);
        for (i, idx) in idx_x.iter().enumerate() {
            let lb = qp.get_field_at("lbx", i).unwrap();
            let ub = qp.get_field_at("ubx", i).unwrap();
            let expected = ocp_qp::compute_index_set(&lb, &ub).unwrap();
            prop_assert_eq!(idx, &expected);
        }
    }
}

#[test]
fn active_set_change_requires_reinitialization() {
    let mut qp = OcpQp::uniform(2, 2, 1, 0, 0, 0).unwrap();
    qp.set_field_all("Q", &[1.0, 0.0, 0.0, 1.0]).unwrap();
    qp.set_field_all("R", &[1.0]).unwrap();
    qp.initialize_solver("riccati", &BackendOptions::new()).unwrap();
    assert!(qp.solve().is_ok());

    qp.set_field("lbx", 0, &[-1.0, -INF]).unwrap();
    assert!(qp.needs_initializing());
    let err = qp.solve().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StaleState);
    assert!(err.to_string().contains("riccati"));
}

#[test]
fn all_free_bounds_squeeze_to_zero() {
    let dims = OcpQpDims::new(vec![2, 2, 2], vec![1, 1, 0], vec![2, 2, 2], vec![1, 1, 0], vec![0, 0, 0]).unwrap();
    let mut qp = OcpQp::new(dims);
    for i in 0..3 {
        qp.set_bounds(i, VarClass::State, &[-INF, -INF], &[INF, INF]).unwrap();
    }
    qp.squeeze_dimensions();
    assert_eq!(qp.nbx(), &[0, 0, 0]);
    assert_eq!(qp.nbu(), &[0, 0, 0]);
}

#[test]
fn one_sided_first_state_bound() {
    let mut qp = OcpQp::uniform(2, 2, 1, 0, 0, 0).unwrap();
    qp.set_field("lbx", 0, &[-1.0, -INF]).unwrap();
    qp.set_field("ubx", 0, &[1.0, INF]).unwrap();
    qp.squeeze_dimensions();
    assert_eq!(qp.bounds_indices(VarClass::State)[0], vec![0]);
    assert_eq!(qp.nbx(), &[1, 0, 0]);
}

#[test]
fn unavailable_backend_is_usage_error() {
    let mut qp = OcpQp::uniform(1, 1, 1, 0, 0, 0).unwrap();
    let err = qp.initialize_solver("not_a_solver", &BackendOptions::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert!(err.to_string().contains("not_a_solver"));
    assert_eq!(qp.solver_name(), None);

    qp.initialize_solver("riccati", &BackendOptions::new()).unwrap();
    let err = qp.initialize_solver("not_a_solver", &BackendOptions::new()).unwrap_err();
    assert_eq!(err, OcpError::UnsupportedBackend("not_a_solver".into()));
    assert_eq!(qp.solver_name(), Some("riccati"));
    assert!(!qp.needs_initializing());
}

#[test]
fn custom_index_set_round_trip() {
    let mut qp = OcpQp::uniform(1, 3, 1, 0, 0, 0).unwrap();
    qp.set_bounds(0, VarClass::State, &[-1.0, -2.0, -INF], &[1.0, 2.0, INF]).unwrap();
    qp.squeeze_dimensions();
    assert_eq!(qp.bounds_indices(VarClass::State)[0], vec![0, 1]);
    qp.set_bounds_indices(VarClass::State, 0, &[1, 2]).unwrap();
    assert_eq!(qp.bounds_indices(VarClass::State)[0], vec![1, 2]);
    assert_eq!(qp.data().stage(0).lbx().as_slice(), &[-2.0, -INF]);
    assert!(qp.set_bounds_indices(VarClass::State, 0, &[2, 1]).is_err());
}
