use num_complex::Complex64;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use tangle::{DecompError, MatFree, Tensor, TensorError, TnLinearOperator};

fn random_tensor(seed: u64, dims: &[usize], inds: &[&str]) -> Tensor {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Tensor::random_f64(&mut rng, dims, inds).unwrap()
}

/// Apply the operator to an identity block, recovering its dense matrix.
fn densify(op: &TnLinearOperator) -> mdarray::DTensor<f64, 2> {
    let n = op.ncols();
    let eye = mdarray::DTensor::<f64, 2>::from_fn([n, n], |idx| {
        if idx[0] == idx[1] {
            1.0
        } else {
            0.0
        }
    });
    MatFree::<f64>::apply(op, &eye).unwrap()
}

#[test]
fn operator_matches_the_contracted_network() {
    let a = random_tensor(1, &[4, 3], &["u", "k"]);
    let b = random_tensor(2, &[3, 5], &["k", "l"]);
    let dense = a.contract_with(&b, None).unwrap();

    let op = TnLinearOperator::new(
        vec![a, b],
        vec!["u".to_string()],
        vec!["l".to_string()],
    )
    .unwrap();
    assert_eq!(op.nrows(), 4);
    assert_eq!(op.ncols(), 5);

    let mat = densify(&op);
    for i in 0..4 {
        for j in 0..5 {
            let want = Tensor::from_data_f64(
                {
                    let mut v = vec![0.0; 5];
                    v[j] = 1.0;
                    v
                },
                &[5],
                &["l"],
            )
            .unwrap();
            let col = dense.contract_with(&want, None).unwrap();
            // col has index [u]; compare entry i.
            let expected = {
                let mut pick = vec![0.0; 4];
                pick[i] = 1.0;
                let pick = Tensor::from_data_f64(pick, &[4], &["u"]).unwrap();
                col.contract_with(&pick, None).unwrap().item().unwrap().re()
            };
            assert!((mat[[i, j]] - expected).abs() < 1e-10, "entry ({i},{j})");
        }
    }
}

#[test]
fn adjoint_apply_is_the_transpose_for_real_operators() {
    let a = random_tensor(3, &[3, 2, 4], &["u", "k", "l"]);
    let op = TnLinearOperator::new(
        vec![a],
        vec!["u".to_string()],
        vec!["l".to_string(), "k".to_string()],
    )
    .unwrap();

    let x = mdarray::DTensor::<f64, 2>::from_fn([3, 1], |idx| (idx[0] + 1) as f64);
    let y = MatFree::<f64>::adjoint_apply(&op, &x).unwrap();
    assert_eq!(y.dim(0), 8);

    // <A e_c, x> == <e_c, A^T x> for every basis column.
    let mat = densify(&op);
    for c in 0..8 {
        let mut dot = 0.0;
        for r in 0..3 {
            dot += mat[[r, c]] * x[[r, 0]];
        }
        assert!((y[[c, 0]] - dot).abs() < 1e-10);
    }
}

#[test]
fn multi_index_groups_flatten_row_major() {
    let a = random_tensor(4, &[2, 3, 4], &["u1", "u2", "l"]);
    let op = TnLinearOperator::new(
        vec![a.clone()],
        vec!["u1".to_string(), "u2".to_string()],
        vec!["l".to_string()],
    )
    .unwrap();
    assert_eq!(op.nrows(), 6);

    let mat = densify(&op);
    let flat = a.transpose(&["u1", "u2", "l"]).unwrap();
    let slice_check = flat
        .fuse(&[("U".to_string(), vec!["u1".to_string(), "u2".to_string()])])
        .unwrap();
    // Locked row-major flattening: fused row r corresponds to (r / 3, r % 3).
    for r in 0..6 {
        for c in 0..4 {
            let pick_u = {
                let mut v = vec![0.0; 6];
                v[r] = 1.0;
                Tensor::from_data_f64(v, &[6], &["U"]).unwrap()
            };
            let pick_l = {
                let mut v = vec![0.0; 4];
                v[c] = 1.0;
                Tensor::from_data_f64(v, &[4], &["l"]).unwrap()
            };
            let entry = slice_check
                .contract_with(&pick_u, None)
                .unwrap()
                .contract_with(&pick_l, None)
                .unwrap()
                .item()
                .unwrap()
                .re();
            assert!((mat[[r, c]] - entry).abs() < 1e-10);
        }
    }
}

#[test]
fn real_view_of_a_complex_operator_rejects_imaginary_residue() {
    let data = vec![
        Complex64::new(1.0, 0.5),
        Complex64::new(0.0, 1.0),
        Complex64::new(2.0, 0.0),
        Complex64::new(0.0, -1.0),
    ];
    let a = Tensor::from_data_c64(data, &[2, 2], &["u", "l"]).unwrap();
    let op =
        TnLinearOperator::new(vec![a], vec!["u".to_string()], vec!["l".to_string()]).unwrap();

    let x = mdarray::DTensor::<f64, 2>::from_fn([2, 1], |_| 1.0);
    let err = MatFree::<f64>::apply(&op, &x).unwrap_err();
    assert!(matches!(
        err,
        DecompError::Tensor(TensorError::ImagResidual { .. })
    ));

    // The complex view is fine.
    let xz = mdarray::DTensor::<Complex64, 2>::from_fn([2, 1], |_| Complex64::new(1.0, 0.0));
    MatFree::<Complex64>::apply(&op, &xz).unwrap();
}

#[test]
fn internal_bonds_cannot_be_operator_indices() {
    let a = random_tensor(5, &[2, 3], &["u", "k"]);
    let b = random_tensor(6, &[3, 2], &["k", "l"]);
    let err = TnLinearOperator::new(
        vec![a, b],
        vec!["u".to_string(), "k".to_string()],
        vec!["l".to_string()],
    )
    .unwrap_err();
    assert!(matches!(err, DecompError::OperatorApply(_)));
}

#[test]
fn every_open_index_must_be_grouped() {
    let a = random_tensor(7, &[2, 3, 4], &["u", "l", "x"]);
    let err = TnLinearOperator::new(
        vec![a],
        vec!["u".to_string()],
        vec!["l".to_string()],
    )
    .unwrap_err();
    assert!(matches!(err, DecompError::OperatorApply(_)));
}
