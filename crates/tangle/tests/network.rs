use std::collections::HashMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use tangle::{
    Contracted, SplitOpts, Structure, TagMode, TagSet, Tensor, TensorNetwork,
};

fn random_tensor(seed: u64, dims: &[usize], inds: &[&str], tags: &str) -> Tensor {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Tensor::random_f64(&mut rng, dims, inds)
        .unwrap()
        .with_tags(tags)
}

/// v(a) M(a,b) N(b,c) w(c), a closed chain contracting to a scalar.
fn closed_chain() -> TensorNetwork {
    TensorNetwork::from_tensors([
        random_tensor(1, &[3], &["a"], "I0,L"),
        random_tensor(2, &[3, 4], &["a", "b"], "I1,L"),
        random_tensor(3, &[4, 3], &["b", "c"], "I2,R"),
        random_tensor(4, &[3], &["c"], "I3,R"),
    ])
}

fn scalar_value(tn: &TensorNetwork) -> f64 {
    match tn.contract_all(None).unwrap() {
        Contracted::Scalar(s) => s.re(),
        Contracted::Tensor(t) => panic!("expected scalar, got {t}"),
    }
}

#[test]
fn contract_all_matches_pairwise_contraction() {
    let v = random_tensor(1, &[3], &["a"], "");
    let m = random_tensor(2, &[3, 4], &["a", "b"], "");
    let w = random_tensor(3, &[4], &["b"], "");
    let by_hand = v
        .contract_with(&m, None)
        .unwrap()
        .contract_with(&w, None)
        .unwrap();

    let tn = TensorNetwork::from_tensors([v, m, w]);
    let got = tn.contract_all(None).unwrap();
    match got {
        Contracted::Scalar(s) => assert!((s.re() - by_hand.item().unwrap().re()).abs() < 1e-10),
        Contracted::Tensor(_) => panic!("expected scalar"),
    }
}

#[test]
fn outer_and_inner_inds() {
    let tn = closed_chain();
    assert!(tn.outer_inds().is_empty());
    assert_eq!(tn.inner_inds(), vec!["a".to_string(), "b".into(), "c".into()]);
    assert_eq!(tn.max_bond(), Some(4));
    tn.check().unwrap();
}

#[test]
fn select_and_partition_by_tags() {
    let tn = closed_chain();
    assert_eq!(tn.select_tids(&["L"], TagMode::Any).len(), 2);
    assert_eq!(tn.select_tids(&["I1", "L"], TagMode::All).len(), 1);

    let (inside, outside) = tn.partition(&["L"], TagMode::Any);
    assert_eq!(inside.len(), 2);
    assert_eq!(outside.len(), 2);
    // Views expose the cut bond as an outer index on both sides.
    assert!(inside.outer_inds().contains(&"b".to_string()));
    assert!(outside.outer_inds().contains(&"b".to_string()));
}

#[test]
fn tag_index_follows_tensor_edits() {
    let mut tn = closed_chain();
    let tid = tn.select_tids(&["I0"], TagMode::Any)[0];
    tn.modify_tensor(tid, |t| {
        t.remove_tag("L");
        t.add_tag("BOUNDARY");
        Ok(())
    })
    .unwrap();
    assert_eq!(tn.select_tids(&["L"], TagMode::Any).len(), 1);
    assert_eq!(tn.select_tids(&["BOUNDARY"], TagMode::Any), vec![tid]);
}

#[test]
fn contract_tags_keeps_the_rest_connected() {
    let mut tn = closed_chain();
    let full = scalar_value(&tn.clone());
    let tid = tn.contract_tags(&["L"], TagMode::Any).unwrap();
    assert_eq!(tn.len(), 3);
    let merged = tn.tensor(tid).unwrap();
    assert!(merged.has_ind("b"));
    assert!(merged.tags().contains("I0") && merged.tags().contains("I1"));
    assert!((scalar_value(&tn) - full).abs() < 1e-10);
}

#[test]
fn structured_contraction_matches_full_contraction() {
    let mut tn = closed_chain();
    tn.set_structure(Structure {
        site_tag_template: "I{}".to_string(),
        nsites: 4,
        bsz: 2,
    });
    let full = scalar_value(&tn.clone());
    tn.contract_structured(None).unwrap();
    assert_eq!(tn.len(), 1);
    assert!((scalar_value(&tn) - full).abs() < 1e-10);
}

#[test]
fn structured_ranges_count_back_from_the_end_when_negative() {
    let mut tn = closed_chain();
    tn.set_structure(Structure {
        site_tag_template: "I{}".to_string(),
        nsites: 4,
        bsz: 2,
    });
    let full = scalar_value(&tn.clone());
    tn.contract_structured(Some((0, -1))).unwrap();
    // Sites 0..3 merge into one tensor; the last site stays separate.
    assert_eq!(tn.len(), 2);
    assert!((scalar_value(&tn) - full).abs() < 1e-10);
}

#[test]
fn network_norm_matches_the_dense_norm() {
    let tn = TensorNetwork::from_tensors([
        random_tensor(21, &[2, 3], &["i", "k"], ""),
        random_tensor(22, &[3, 4], &["k", "j"], ""),
    ]);
    let dense = tn.contract_all(None).unwrap().into_tensor();
    assert!((tn.norm().unwrap() - dense.norm()).abs() < 1e-10);
}

#[test]
fn merging_networks_relabels_colliding_bonds() {
    let mut tn1 = TensorNetwork::from_tensors([
        random_tensor(1, &[2, 3], &["i", "k"], ""),
        random_tensor(2, &[3, 2], &["k", "j"], ""),
    ]);
    let tn2 = TensorNetwork::from_tensors([
        random_tensor(3, &[2, 3], &["p", "k"], ""),
        random_tensor(4, &[3, 2], &["k", "q"], ""),
    ]);
    let x1 = tn1.contract_all(None).unwrap().into_tensor();
    let x2 = tn2.contract_all(None).unwrap().into_tensor();

    tn1.add_network(&tn2).unwrap();
    tn1.check().unwrap();
    assert_eq!(tn1.len(), 4);

    // The merged network factorizes, so its contraction is the product.
    let merged = tn1
        .contract_all(Some(&["i", "j", "p", "q"]))
        .unwrap()
        .into_tensor();
    let product = x1.contract_with(&x2, None).unwrap();
    assert!(merged.almost_equals(&product, 1e-10));
}

#[test]
fn network_reindex_swaps_labels() {
    let mut tn = TensorNetwork::from_tensors([
        random_tensor(1, &[2, 2], &["i", "j"], ""),
        random_tensor(2, &[2, 2], &["j", "k"], ""),
    ]);
    let map: HashMap<String, String> = [
        ("i".to_string(), "k".to_string()),
        ("k".to_string(), "i".to_string()),
    ]
    .into_iter()
    .collect();
    tn.reindex(&map).unwrap();
    assert_eq!(tn.outer_inds().len(), 2);
    assert!(tn.outer_inds().contains(&"i".to_string()));
    assert!(tn.outer_inds().contains(&"k".to_string()));
    assert_eq!(tn.inner_inds(), vec!["j".to_string()]);
}

#[test]
fn network_retag_rebuilds_the_tag_index() {
    let mut tn = closed_chain();
    let map: HashMap<String, String> = [("L".to_string(), "LEFT".to_string())]
        .into_iter()
        .collect();
    tn.retag(&map);
    assert!(tn.select_tids(&["L"], TagMode::Any).is_empty());
    assert_eq!(tn.select_tids(&["LEFT"], TagMode::Any).len(), 2);
}

#[test]
fn selections_are_virtual_and_clones_are_deep() {
    let tn = closed_chain();
    let view = tn.select(&["I0"], TagMode::Any);
    let tid = view.tids()[0];
    let handle = view.handle(tid).unwrap();
    handle
        .write()
        .unwrap()
        .add_tag("SEEN");
    // The edit through the view is visible in the parent.
    assert_eq!(tn.select_tids(&["SEEN"], TagMode::Any).len(), 1);

    let copy = tn.clone();
    let ctid = copy.tids()[0];
    let chandle = copy.handle(ctid).unwrap();
    chandle.write().unwrap().add_tag("LOCAL");
    assert!(tn.select_tids(&["LOCAL"], TagMode::Any).is_empty());
}

#[test]
fn replace_with_identity_wires_straight_through() {
    let v = random_tensor(1, &[3], &["a"], "V");
    let w = random_tensor(2, &[3], &["b"], "W");
    let eye = Tensor::from_data_f64(
        vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        &[3, 3],
        &["a", "b"],
    )
    .unwrap()
    .with_tags("MID");

    let expected = {
        let tn = TensorNetwork::from_tensors([v.clone(), eye.clone(), w.clone()]);
        scalar_value(&tn)
    };

    let mut tn = TensorNetwork::from_tensors([v, eye, w]);
    tn.replace_with_identity(&["MID"], TagMode::Any).unwrap();
    assert_eq!(tn.len(), 2);
    assert!((scalar_value(&tn) - expected).abs() < 1e-10);
}

#[test]
fn replace_with_svd_keeps_the_region_value() {
    // Rank-2 region between 6-dimensional open indices.
    let a = random_tensor(5, &[6, 2], &["i", "k"], "REG");
    let b = random_tensor(6, &[2, 6], &["k", "j"], "REG");
    let dense = a.contract_with(&b, None).unwrap();

    let mut tn = TensorNetwork::from_tensors([a, b]);
    let opts = SplitOpts {
        max_bond: Some(2),
        cutoff: 0.0,
        seed: Some(13),
        ..SplitOpts::default()
    };
    tn.replace_with_svd(&["REG"], TagMode::Any, &["i"], &opts)
        .unwrap();
    assert_eq!(tn.len(), 2);
    assert!(tn.max_bond().map_or(false, |b| b <= 2));
    for tid in tn.tids() {
        assert!(tn.tensor(tid).unwrap().tags().contains("REG"));
    }

    let back = tn.contract_all(Some(&["i", "j"])).unwrap().into_tensor();
    assert!(back.almost_equals(&dense, 1e-8));
}

#[test]
fn compress_between_trims_a_slack_bond() {
    // A rank-2 pair padded out to a bond of 4.
    let left = random_tensor(7, &[5, 2], &["i", "r"], "");
    let right = random_tensor(8, &[2, 5], &["r", "j"], "");
    let grow = Tensor::from_data_f64(
        vec![
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0,
        ],
        &[2, 4],
        &["r", "k"],
    )
    .unwrap();
    let a = left.contract_with(&grow, None).unwrap().with_tags("A");
    let b = grow
        .reindex(&[("r".to_string(), "s".to_string())].into_iter().collect())
        .unwrap()
        .contract_with(
            &right
                .reindex(&[("r".to_string(), "s".to_string())].into_iter().collect())
                .unwrap(),
            None,
        )
        .unwrap()
        .with_tags("B");

    let mut tn = TensorNetwork::from_tensors([a, b]);
    let before = tn.contract_all(Some(&["i", "j"])).unwrap().into_tensor();
    assert_eq!(tn.max_bond(), Some(4));

    let opts = SplitOpts {
        cutoff: 1e-12,
        ..SplitOpts::default()
    };
    tn.compress_between(&["A"], &["B"], TagMode::All, &opts)
        .unwrap();
    assert!(tn.max_bond().unwrap() <= 2);
    let after = tn.contract_all(Some(&["i", "j"])).unwrap().into_tensor();
    assert!(after.almost_equals(&before, 1e-8));
}

#[test]
fn zero_environment_collapses_the_network() {
    let a = Tensor::from_data_f64(vec![0.0; 6], &[3, 2], &["i", "k"])
        .unwrap()
        .with_tags("A");
    let b = random_tensor(9, &[2, 4], &["k", "j"], "B");
    let mut tn = TensorNetwork::from_tensors([a, b]);

    tn.compress_between(&["A"], &["B"], TagMode::All, &SplitOpts::default())
        .unwrap();
    assert_eq!(tn.len(), 1);
    let t = tn.tensor(tn.tids()[0]).unwrap();
    assert_eq!(t.norm(), 0.0);
    let mut inds = t.inds().to_vec();
    inds.sort();
    assert_eq!(inds, vec!["i".to_string(), "j".into()]);
    let expected_tags: TagSet = ["A", "B"].into_iter().collect();
    assert_eq!(*t.tags(), expected_tags);
}

#[test]
fn compress_all_trims_every_slack_bond() {
    // Grows a 2-dimensional index to a slack bond of 4.
    let grow = |from: &str, to: &str| {
        Tensor::from_data_f64(
            vec![
                1.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, 0.0,
            ],
            &[2, 4],
            &[from, to],
        )
        .unwrap()
    };
    let a = random_tensor(31, &[5, 2], &["i", "r"], "A")
        .contract_with(&grow("r", "k"), None)
        .unwrap();
    let mid = grow("s", "k")
        .contract_with(&random_tensor(32, &[2, 2], &["s", "t"], "M"), None)
        .unwrap()
        .contract_with(&grow("t", "l"), None)
        .unwrap();
    let c = grow("u", "l")
        .contract_with(&random_tensor(33, &[2, 5], &["u", "j"], "C"), None)
        .unwrap();

    let mut tn = TensorNetwork::from_tensors([a, mid, c]);
    let before = tn.contract_all(Some(&["i", "j"])).unwrap().into_tensor();
    assert_eq!(tn.max_bond(), Some(4));

    tn.compress_all(&SplitOpts::default()).unwrap();
    assert!(tn.max_bond().unwrap() <= 2);
    let after = tn.contract_all(Some(&["i", "j"])).unwrap().into_tensor();
    assert!(after.almost_equals(&before, 1e-8));
}

#[test]
fn conjugated_network_contracts_to_the_conjugate_scalar() {
    use num_complex::Complex64;

    let v = Tensor::from_data_c64(
        vec![Complex64::new(1.0, 1.0), Complex64::new(0.0, -2.0)],
        &[2],
        &["a"],
    )
    .unwrap()
    .with_tags("V");
    let w = random_tensor(41, &[2], &["a"], "W");
    let tn = TensorNetwork::from_tensors([v, w]);

    let z = tn
        .contract_all(None)
        .unwrap()
        .into_scalar()
        .unwrap()
        .as_c64();
    let conj = tn.conj();
    let zc = conj
        .contract_all(None)
        .unwrap()
        .into_scalar()
        .unwrap()
        .as_c64();
    assert!((zc - z.conj()).norm() < 1e-12);
    assert_eq!(conj.tags(), tn.tags());

    // The conjugate is a deep copy; the original still contracts the same.
    let z_again = tn
        .contract_all(None)
        .unwrap()
        .into_scalar()
        .unwrap()
        .as_c64();
    assert_eq!(z_again, z);
}

#[test]
fn compress_between_requires_unique_matches() {
    let mut tn = closed_chain();
    let err = tn
        .compress_between(&["L"], &["R"], TagMode::Any, &SplitOpts::default())
        .unwrap_err();
    assert!(matches!(err, tangle::NetworkError::NotUnique { .. }));
}
