use mdarray::{DynRank, Shape, Tensor};
use num_complex::Complex64;
use tangle_einsum::{einsum, EinsumError, PathCache};

fn t64(data: Vec<f64>, dims: &[usize]) -> Tensor<f64, DynRank> {
    Tensor::from(data).into_shape(DynRank::from_dims(dims))
}

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn dims_of<T>(t: &Tensor<T, DynRank>) -> Vec<usize> {
    t.shape().with_dims(|d| d.to_vec())
}

fn assert_close(got: &[f64], want: &[f64]) {
    assert_eq!(got.len(), want.len());
    for (g, w) in got.iter().zip(want) {
        assert!((g - w).abs() < 1e-12, "got {g}, want {w}");
    }
}

#[test]
fn matrix_chain_matches_manual_result() {
    // (2x3) @ (3x4) @ (4x2)
    let a = t64((0..6).map(|x| x as f64).collect(), &[2, 3]);
    let b = t64((0..12).map(|x| x as f64).collect(), &[3, 4]);
    let c = t64((0..8).map(|x| x as f64).collect(), &[4, 2]);

    let (ab, _) = einsum(
        &[labels(&["i", "j"]), labels(&["j", "k"])],
        None,
        vec![a.clone(), b.clone()],
        None,
    )
    .unwrap();
    let (abc, out) = einsum(
        &[
            labels(&["i", "j"]),
            labels(&["j", "k"]),
            labels(&["k", "l"]),
        ],
        None,
        vec![a, b, c.clone()],
        None,
    )
    .unwrap();
    let (abc_seq, _) = einsum(
        &[labels(&["i", "k"]), labels(&["k", "l"])],
        None,
        vec![ab, c],
        None,
    )
    .unwrap();

    assert_eq!(out, labels(&["i", "l"]));
    assert_eq!(dims_of(&abc), vec![2, 2]);
    assert_close(&abc[..], &abc_seq[..]);
}

#[test]
fn output_order_follows_first_occurrence() {
    let a = t64(vec![1.0; 6], &[2, 3]);
    let b = t64(vec![1.0; 12], &[3, 4]);
    let (r, out) = einsum(
        &[labels(&["x", "s"]), labels(&["s", "y"])],
        None,
        vec![a, b],
        None,
    )
    .unwrap();
    assert_eq!(out, labels(&["x", "y"]));
    assert_eq!(dims_of(&r), vec![2, 4]);
}

#[test]
fn explicit_output_permutes_and_sums() {
    let a = t64(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    // Keep only "j": sum over "i".
    let out = labels(&["j"]);
    let (r, _) = einsum(&[labels(&["i", "j"])], Some(&out), vec![a.clone()], None).unwrap();
    assert_close(&r[..], &[5.0, 7.0, 9.0]);

    // Pure transpose via explicit output.
    let out = labels(&["j", "i"]);
    let (r, _) = einsum(&[labels(&["i", "j"])], Some(&out), vec![a], None).unwrap();
    assert_eq!(dims_of(&r), vec![3, 2]);
    assert_close(&r[..], &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
}

#[test]
fn full_contraction_yields_rank_zero() {
    let a = t64(vec![1.0, 2.0], &[2]);
    let b = t64(vec![3.0, 5.0], &[2]);
    let (r, out) = einsum(
        &[labels(&["i"]), labels(&["i"])],
        None,
        vec![a, b],
        None,
    )
    .unwrap();
    assert!(out.is_empty());
    assert_eq!(r.rank(), 0);
    assert_close(&r[..], &[13.0]);
}

#[test]
fn complex_matmul() {
    let i = Complex64::new(0.0, 1.0);
    let one = Complex64::new(1.0, 0.0);
    let a = Tensor::from(vec![one, i, -i, one]).into_shape(DynRank::from_dims(&[2, 2]));
    let b = Tensor::from(vec![i, Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0), i])
        .into_shape(DynRank::from_dims(&[2, 2]));
    let (r, _) = einsum(
        &[labels(&["i", "j"]), labels(&["j", "k"])],
        None,
        vec![a, b],
        None,
    )
    .unwrap();
    // A * (i I) = i A
    assert!((r[..][0] - i).norm() < 1e-12);
    assert!((r[..][1] - i * i).norm() < 1e-12);
    assert!((r[..][2] - (-i) * i).norm() < 1e-12);
    assert!((r[..][3] - i).norm() < 1e-12);
}

#[test]
fn disconnected_operands_form_outer_product() {
    let a = t64(vec![1.0, 2.0], &[2]);
    let b = t64(vec![10.0, 20.0, 30.0], &[3]);
    let (r, out) = einsum(&[labels(&["i"]), labels(&["j"])], None, vec![a, b], None).unwrap();
    assert_eq!(out, labels(&["i", "j"]));
    assert_close(&r[..], &[10.0, 20.0, 30.0, 20.0, 40.0, 60.0]);
}

#[test]
fn triple_index_is_rejected() {
    let a = t64(vec![1.0, 1.0], &[2]);
    let err = einsum(
        &[labels(&["i"]), labels(&["i"]), labels(&["i"])],
        None,
        vec![a.clone(), a.clone(), a],
        None,
    )
    .unwrap_err();
    assert!(matches!(err, EinsumError::IndexRepeated { count: 3, .. }));
}

#[test]
fn shared_cache_replans_only_on_new_shapes() {
    let cache = PathCache::new(8);
    let a = t64(vec![1.0; 6], &[2, 3]);
    let b = t64(vec![1.0; 12], &[3, 4]);
    let inputs = [labels(&["i", "j"]), labels(&["j", "k"])];

    einsum(&inputs, None, vec![a.clone(), b.clone()], Some(&cache)).unwrap();
    assert_eq!(cache.len(), 1);
    einsum(&inputs, None, vec![a, b], Some(&cache)).unwrap();
    assert_eq!(cache.len(), 1);

    // Same structure, different bond dimension: a new plan.
    let a = t64(vec![1.0; 10], &[2, 5]);
    let b = t64(vec![1.0; 20], &[5, 4]);
    einsum(&inputs, None, vec![a, b], Some(&cache)).unwrap();
    assert_eq!(cache.len(), 2);
}
