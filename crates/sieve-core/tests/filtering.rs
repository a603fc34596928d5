//! End-to-end tests of the coarse-graining driver: constant
//! preservation, linearity, scale monotonicity, mask respect, and the
//! Π-stress contraction identity.

use ndarray::{Array1, Array4};
use sieve_core::diagnostics::{compute_pi, QuadFields};
use sieve_core::filtering::{filter_helmholtz, CollectingSink, HelmholtzInput, UiujHelmholtz};
use sieve_types::config::{KernelShape, SieveConfig};
use sieve_types::constants::R_EARTH;
use sieve_types::grid::Grid;

fn global_grid(nlat: usize, nlon: usize) -> Grid {
    let lat = Array1::linspace(
        -std::f64::consts::FRAC_PI_2 + 0.05,
        std::f64::consts::FRAC_PI_2 - 0.05,
        nlat,
    );
    let lon = Array1::linspace(
        0.0,
        std::f64::consts::TAU * (nlon as f64 - 1.0) / nlon as f64,
        nlon,
    );
    let mask = Array4::from_elem((1, 1, nlat, nlon), true);
    Grid::new(
        Array1::zeros(1),
        Array1::zeros(1),
        lat,
        lon,
        mask,
        true,
        false,
    )
    .unwrap()
}

fn config_with_scales(scales: Vec<f64>) -> SieveConfig {
    let mut config = SieveConfig::default();
    config.filter.scales = scales;
    config.filter.kernel = KernelShape::TanhRamp { delta: 0.1 };
    config.validate().unwrap();
    config
}

fn run_driver(input: &HelmholtzInput, grid: &Grid, config: &SieveConfig) -> CollectingSink {
    let mut sink = CollectingSink::default();
    filter_helmholtz(input, grid, config, &mut sink).unwrap();
    sink
}

#[test]
fn filtering_constants_returns_constants() {
    let grid = global_grid(24, 48);
    let dim = (1, 1, 24, 48);
    let input = HelmholtzInput {
        f_toroidal: Array4::from_elem(dim, 3.14),
        f_potential: Array4::from_elem(dim, -7.5),
        uiuj_helmholtz: None,
    };
    let config = config_with_scales(vec![1.5e6]);
    let sink = run_driver(&input, &grid, &config);

    let products = &sink.products[0];
    for v in products.coarse_f_tor.iter() {
        assert!(
            (v - 3.14).abs() < 1e-12 * 3.14,
            "coarse Ψ drifted from the constant: {v}"
        );
    }
    for v in products.coarse_f_pot.iter() {
        assert!(
            (v + 7.5).abs() < 1e-12 * 7.5,
            "coarse Φ drifted from the constant: {v}"
        );
    }
    // Constant potentials drive no flow.
    for v in products.toroidal.u_lon.iter() {
        assert!(v.abs() < 1e-10);
    }
}

#[test]
fn filtering_commutes_with_linear_combinations() {
    let grid = global_grid(18, 36);
    let dim = (1, 1, 18, 36);
    let f = Array4::from_shape_fn(dim, |(_, _, i, j)| {
        (grid.lat[i] * 2.0).sin() + grid.lon[j].cos()
    });
    let g = Array4::from_shape_fn(dim, |(_, _, i, j)| {
        (grid.lat[i] * 3.0).cos() * (2.0 * grid.lon[j]).sin()
    });
    let combo = f.mapv(|v| 2.0 * v) + g.mapv(|v| 3.0 * v);

    let config = config_with_scales(vec![2.0e6]);
    let zeros = Array4::zeros(dim);

    let run = |field: &Array4<f64>| -> Array4<f64> {
        let input = HelmholtzInput {
            f_toroidal: field.clone(),
            f_potential: zeros.clone(),
            uiuj_helmholtz: None,
        };
        run_driver(&input, &grid, &config).products[0]
            .coarse_f_tor
            .clone()
    };

    let coarse_f = run(&f);
    let coarse_g = run(&g);
    let coarse_combo = run(&combo);

    for ((cf, cg), cc) in coarse_f.iter().zip(coarse_g.iter()).zip(coarse_combo.iter()) {
        let expected = 2.0 * cf + 3.0 * cg;
        assert!(
            (cc - expected).abs() < 1e-10 * expected.abs().max(1.0),
            "linearity violated: {cc} vs {expected}"
        );
    }
}

#[test]
fn coarse_peak_decreases_with_scale() {
    // A Gaussian stream-function bump: the filtered peak must shrink
    // monotonically as the filter widens.
    let nlat = 36;
    let nlon = 72;
    let grid = global_grid(nlat, nlon);
    let dim = (1, 1, nlat, nlon);
    let sigma = 0.26; // ~15°
    let lon0 = std::f64::consts::PI;
    let f_toroidal = Array4::from_shape_fn(dim, |(_, _, i, j)| {
        let dlat = grid.lat[i];
        let dlon = grid.lon[j] - lon0;
        1.0e5 * (-(dlat * dlat + dlon * dlon) / (sigma * sigma)).exp()
    });
    let input = HelmholtzInput {
        f_toroidal,
        f_potential: Array4::zeros(dim),
        uiuj_helmholtz: None,
    };
    let config = config_with_scales(vec![1.0e6, 2.0e6]);
    let sink = run_driver(&input, &grid, &config);

    let peak = |a: &Array4<f64>| a.iter().fold(0.0f64, |m, &v| m.max(v));
    let peak0 = peak(&input.f_toroidal);
    let peak1 = peak(&sink.products[0].coarse_f_tor);
    let peak2 = peak(&sink.products[1].coarse_f_tor);
    assert!(
        peak1 < peak0 && peak2 < peak1,
        "peaks not monotone under widening filters: {peak0} → {peak1} → {peak2}"
    );
    assert!(peak2 > 0.0, "filtering annihilated the bump");
}

#[test]
fn diagnostics_respect_the_mask() {
    let nlat = 20;
    let nlon = 40;
    let lat = Array1::linspace(-0.9, 0.9, nlat);
    let lon = Array1::linspace(
        0.0,
        std::f64::consts::TAU * (nlon as f64 - 1.0) / nlon as f64,
        nlon,
    );
    let mut mask = Array4::from_elem((1, 1, nlat, nlon), true);
    for i in 8..12 {
        for j in 15..22 {
            mask[[0, 0, i, j]] = false;
        }
    }
    let grid = Grid::new(
        Array1::zeros(1),
        Array1::zeros(1),
        lat,
        lon,
        mask,
        true,
        false,
    )
    .unwrap();

    let dim = (1, 1, nlat, nlon);
    let input = HelmholtzInput {
        f_toroidal: Array4::from_shape_fn(dim, |(_, _, i, j)| {
            1.0e4 * (grid.lat[i] * 2.0).sin() * grid.lon[j].cos()
        }),
        f_potential: Array4::from_shape_fn(dim, |(_, _, i, j)| {
            1.0e4 * grid.lat[i].cos() * (2.0 * grid.lon[j]).sin()
        }),
        uiuj_helmholtz: None,
    };
    let mut config = config_with_scales(vec![2.0e6]);
    config.output.do_okuboweiss_analysis = true;
    let sink = run_driver(&input, &grid, &config);
    let fill = config.physics.fill_value;

    let products = &sink.products[0];
    for comp in [&products.toroidal, &products.potential, &products.total] {
        for i in 8..12 {
            for j in 15..22 {
                let idx = [0, 0, i, j];
                assert_eq!(comp.pi[idx], fill, "Π not filled on land");
                assert_eq!(comp.pi2[idx], fill, "Π₂ not filled on land");
                assert_eq!(comp.z[idx], fill, "Z not filled on land");
                assert_eq!(comp.div_j[idx], fill, "∇·J not filled on land");
                assert_eq!(comp.vort_r[idx], fill, "ω_r not filled on land");
                assert_eq!(comp.divergence[idx], fill, "divergence not filled on land");
                assert_eq!(comp.ke_filt[idx], fill, "filtered KE not filled on land");
                assert_eq!(comp.ke_fine[idx], fill, "fine KE not filled on land");
                assert_eq!(comp.ke_fine_mod[idx], fill);
                assert_eq!(comp.enstrophy[idx], fill);
                let ow = comp.okubo_weiss.as_ref().expect("OW analysis enabled");
                assert_eq!(ow[idx], fill, "Okubo-Weiss not filled on land");
            }
        }
        // Water diagnostics are real numbers.
        assert!(comp.pi[[0, 0, 3, 3]] != fill);
        assert!(comp.ke_fine[[0, 0, 3, 3]] != fill);
    }
}

#[test]
fn helmholtz_dyad_fields_ride_the_filter_pass() {
    let grid = global_grid(16, 32);
    let dim = (1, 1, 16, 32);
    let input = HelmholtzInput {
        f_toroidal: Array4::zeros(dim),
        f_potential: Array4::zeros(dim),
        uiuj_helmholtz: Some(UiujHelmholtz {
            f_r: Array4::from_elem(dim, 4.0),
            f_phi: Array4::from_elem(dim, 5.0),
            f_psi: Array4::from_elem(dim, 6.0),
        }),
    };
    let config = config_with_scales(vec![2.5e6]);
    let sink = run_driver(&input, &grid, &config);
    let coarse = sink.products[0]
        .coarse_uiuj
        .as_ref()
        .expect("dyad fields requested");
    for v in coarse.f_r.iter() {
        assert!((v - 4.0).abs() < 1e-11);
    }
    for v in coarse.f_phi.iter() {
        assert!((v - 5.0).abs() < 1e-11);
    }
    for v in coarse.f_psi.iter() {
        assert!((v - 6.0).abs() < 1e-11);
    }
}

#[test]
fn pi_matches_manual_stress_contraction() {
    // With ū_x = sin(lat) and a constant imposed stress, Π must equal
    // −ρ₀·Tᵢⱼ·∂ⱼūᵢ with the analytic gradient of sin(lat).
    let nlat = 48;
    let nlon = 96;
    let grid = global_grid(nlat, nlon);
    let dim = (1, 1, nlat, nlon);
    let u_x = Array4::from_shape_fn(dim, |(_, _, i, _)| grid.lat[i].sin());
    let u_y = Array4::zeros(dim);
    let u_z = Array4::zeros(dim);

    let t = [1.3, -0.4, 0.7]; // T_xx, T_xy, T_xz
    let mut quads = QuadFields::zeros(dim);
    for i in 0..nlat {
        for j in 0..nlon {
            let idx = [0, 0, i, j];
            quads.uxux[idx] = u_x[idx] * u_x[idx] + t[0];
            quads.uxuy[idx] = t[1];
            quads.uxuz[idx] = t[2];
        }
    }

    let rho0 = 1025.0;
    let pi = compute_pi(&grid, &u_x, &u_y, &u_z, &quads, 4, rho0, -1.0e9);

    let (i, j) = (nlat / 3, nlon / 4);
    let lat = grid.lat[i];
    let lon = grid.lon[j];
    let mag = lat.cos() / R_EARTH;
    let grad = [
        mag * (-lat.sin() * lon.cos()),
        mag * (-lat.sin() * lon.sin()),
        mag * lat.cos(),
    ];
    let expected = -rho0 * (t[0] * grad[0] + t[1] * grad[1] + t[2] * grad[2]);
    let got = pi[[0, 0, i, j]];
    assert!(
        (got - expected).abs() < 1e-3 * expected.abs().max(rho0 * mag),
        "Π = {got}, expected {expected}"
    );
}

#[test]
fn kernel_alpha_recorded_with_products() {
    let grid = global_grid(12, 24);
    let dim = (1, 1, 12, 24);
    let input = HelmholtzInput {
        f_toroidal: Array4::zeros(dim),
        f_potential: Array4::zeros(dim),
        uiuj_helmholtz: None,
    };
    let config = config_with_scales(vec![3.0e6]);
    let sink = run_driver(&input, &grid, &config);
    let alpha = sink.products[0].kernel_alpha;
    assert!(alpha > 0.0 && alpha.is_finite());
    assert_eq!(sink.products[0].scale, 3.0e6);
}
