//! End-to-end scenarios for the joint scale factor / bias field estimate
//! on small synthetic phantoms.

mod common;

use common::*;
use mtnorm::normalize::{correct_tissues, DEFAULT_NORM_VALUE};
use mtnorm::{mtnormalise, mtnormalise_with_progress, ErrorKind, NormalizeParams, TissueMap};

fn independent() -> NormalizeParams {
    NormalizeParams { independent: true, ..Default::default() }
}

#[test]
fn test_uniform_tissues_split_the_norm_value() {
    let grid = phantom_grid();
    let n = grid.len();
    let tissues = vec![
        TissueMap::from_volume(vec![1.0; n]),
        TissueMap::from_volume(vec![1.0; n]),
    ];

    let out = mtnormalise(&tissues, &vec![true; n], &grid, &NormalizeParams::default()).unwrap();

    // Identical columns: the factors are tied and the bias absorbs the rest
    assert!((out.scale_factors[0] - out.scale_factors[1]).abs() < 1e-12);
    for map in &out.corrected {
        for &value in map {
            assert!((value - DEFAULT_NORM_VALUE / 2.0).abs() < 1e-9, "{}", value);
        }
    }
    for total in summed(&out.corrected) {
        assert!((total - DEFAULT_NORM_VALUE).abs() < 1e-9);
    }
    assert!(out.mask.iter().all(|&m| m));
}

#[test]
fn test_ramp_bias_and_scale_factors_are_recovered() {
    let grid = phantom_grid();
    let n = grid.len();
    let mask = vec![true; n];
    let tissues = ramp_phantom(&grid, [1.0, 2.0, 0.5]);

    let out = mtnormalise(&tissues, &mask, &grid, &independent()).unwrap();

    for (got, want) in out.scale_factors.iter().zip([1.0, 2.0, 0.5]) {
        assert!((got - want).abs() < 1e-6, "scale {:?}", out.scale_factors);
    }

    // The estimated field is the applied ramp up to the normalisation value
    let scaled: Vec<f64> = out.bias_field.image.iter().map(|b| b * DEFAULT_NORM_VALUE).collect();
    assert!(max_rel_diff(&scaled, &ramp_bias(&grid), &mask) < 1e-6);

    // Corrected maps are flat: they sum to the norm value everywhere
    let totals = summed(&out.corrected);
    let target = vec![DEFAULT_NORM_VALUE; n];
    assert!(max_rel_diff(&totals, &target, &mask) < 1e-6);
}

#[test]
fn test_shared_scale_factor_by_default() {
    let grid = phantom_grid();
    let n = grid.len();
    let tissues = ramp_phantom(&grid, [1.0, 2.0, 0.5]);

    let shared = mtnormalise(&tissues, &vec![true; n], &grid, &NormalizeParams::default()).unwrap();
    let separate = mtnormalise(&tissues, &vec![true; n], &grid, &independent()).unwrap();

    // Geometric mean of (1, 2, 0.5) is one
    for &s in &shared.scale_factors {
        assert!((s - 1.0).abs() < 1e-9);
    }
    // The mode only changes how factors are applied, not the estimate
    assert!(rmse(&shared.bias_field.image, &separate.bias_field.image, &vec![true; n]) < 1e-12);
}

#[test]
fn test_salt_voxels_are_rejected_and_ignored() {
    let grid = phantom_grid();
    let n = grid.len();
    let true_scale = [1.25, 0.8];
    let salt: Vec<usize> = SALT_VOXELS.iter().map(|&(i, j, k)| linear_index(i, j, k)).collect();

    let mut noisy = checkerboard_phantom(&grid, true_scale);
    for &v in &salt {
        noisy[0].data[v] = 4.0;
    }
    let out = mtnormalise(&noisy, &vec![true; n], &grid, &independent()).unwrap();

    for &v in &salt {
        assert!(!out.mask[v], "salt voxel {} kept", v);
    }

    // Same estimate as when the salt is excluded up front
    let clean = checkerboard_phantom(&grid, true_scale);
    let prior_mask: Vec<bool> = (0..n).map(|v| !salt.contains(&v)).collect();
    let reference = mtnormalise(&clean, &prior_mask, &grid, &independent()).unwrap();

    for (a, b) in out.scale_factors.iter().zip(&reference.scale_factors) {
        assert!((a - b).abs() < 1e-6);
    }
    for (a, b) in out.scale_factors.iter().zip(true_scale) {
        assert!((a - b).abs() < 1e-6);
    }
    assert!(max_rel_diff(&out.bias_field.image, &reference.bias_field.image, &vec![true; n]) < 1e-6);
}

#[test]
fn test_log_mean_of_scale_factors_is_zero_after_every_solve() {
    let grid = phantom_grid();
    let n = grid.len();
    let tissues = ramp_phantom(&grid, [1.0, 2.0, 0.5]);

    let mut solves = 0;
    mtnormalise_with_progress(&tissues, &vec![true; n], &grid, &independent(), |r| {
        solves += 1;
        let log_mean: f64 =
            r.scale_factors.iter().map(|s| s.ln()).sum::<f64>() / r.scale_factors.len() as f64;
        assert!(log_mean.abs() < 1e-9, "outer {} inner {}: {}", r.outer, r.inner, log_mean);
        assert!(r.scale_factors.iter().all(|&s| s > 0.0));
    })
    .unwrap();
    assert!(solves > 0);
}

#[test]
fn test_mask_only_shrinks_within_an_outer_pass() {
    let grid = phantom_grid();
    let n = grid.len();
    let mut tissues = checkerboard_phantom(&grid, [1.25, 0.8]);
    for &(i, j, k) in &SALT_VOXELS {
        tissues[0].data[linear_index(i, j, k)] = 4.0;
    }
    // Leave the bottom slab out of the input mask
    let input_mask: Vec<bool> = (0..n).map(|v| coords(v).2 > 0).collect();

    let mut previous: Option<(usize, Vec<bool>)> = None;
    mtnormalise_with_progress(&tissues, &input_mask, &grid, &independent(), |r| {
        assert_eq!(r.live_voxels, r.mask.iter().filter(|&&m| m).count());
        for v in 0..n {
            assert!(!r.mask[v] || input_mask[v], "voxel {} outside input mask", v);
        }
        if let Some((outer, before)) = &previous {
            if *outer == r.outer {
                for v in 0..n {
                    assert!(!r.mask[v] || before[v], "voxel {} re-entered the mask", v);
                }
            }
        }
        previous = Some((r.outer, r.mask.to_vec()));
    })
    .unwrap();
}

#[test]
fn test_empty_mask_is_a_data_error() {
    let grid = phantom_grid();
    let n = grid.len();
    let tissues = ramp_phantom(&grid, [1.0, 2.0, 0.5]);

    let mut solves = 0;
    let err = mtnormalise_with_progress(&tissues, &vec![false; n], &grid, &independent(), |_| {
        solves += 1
    })
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    assert_eq!(solves, 0);
}

#[test]
fn test_bias_image_is_exp_of_log_everywhere() {
    let grid = phantom_grid();
    let n = grid.len();
    // Estimate on half the volume; the field is still defined everywhere
    let mask: Vec<bool> = (0..n).map(|v| coords(v).0 < N / 2).collect();
    let tissues = ramp_phantom(&grid, [1.0, 2.0, 0.5]);

    let out = mtnormalise(&tissues, &mask, &grid, &independent()).unwrap();
    assert_eq!(out.bias_field.image.len(), n);
    for v in 0..n {
        assert_eq!(out.bias_field.image[v], out.bias_field.log[v].exp());
    }
}

#[test]
fn test_reapplying_the_estimate_reproduces_the_output() {
    let grid = phantom_grid();
    let n = grid.len();
    let tissues = ramp_phantom(&grid, [1.0, 2.0, 0.5]);

    let out = mtnormalise(&tissues, &vec![true; n], &grid, &NormalizeParams::default()).unwrap();
    let again = correct_tissues(&tissues, &out.scale_factors, &out.bias_field.image);
    assert_eq!(again, out.corrected);
}

#[test]
fn test_every_frame_of_a_4d_tissue_is_corrected() {
    let grid = phantom_grid();
    let n = grid.len();
    let mut tissues = ramp_phantom(&grid, [1.0, 2.0, 0.5]);

    // Second frame is three times the first; only the first frame is estimated from
    let first = tissues[0].data.clone();
    let mut data = first.clone();
    data.extend(first.iter().map(|v| 3.0 * v));
    tissues[0] = TissueMap::new(data, 2);

    let out = mtnormalise(&tissues, &vec![true; n], &grid, &independent()).unwrap();
    let corrected = &out.corrected[0];
    assert_eq!(corrected.len(), 2 * n);
    for v in 0..n {
        let expected = 3.0 * corrected[v];
        assert!((corrected[n + v] - expected).abs() <= 1e-12 * expected.abs().max(1.0));
    }
}
