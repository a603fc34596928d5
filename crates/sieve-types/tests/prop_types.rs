// ─────────────────────────────────────────────────────────────────────
// SCPN Ocean Sieve — Property-Based Tests (proptest) for sieve-types
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for sieve-types using proptest.
//!
//! Covers: cell areas, haversine distances, mask handling, and config
//! invariants.

use ndarray::{Array1, Array4};
use proptest::prelude::*;
use sieve_types::config::SieveConfig;
use sieve_types::constants::R_EARTH;
use sieve_types::grid::Grid;

fn build_grid(nlat: usize, nlon: usize, lat_margin: f64, periodic_x: bool) -> Grid {
    let lat = Array1::linspace(
        -std::f64::consts::FRAC_PI_2 + lat_margin,
        std::f64::consts::FRAC_PI_2 - lat_margin,
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
        periodic_x,
        false,
    )
    .unwrap()
}

proptest! {
    /// Cell areas are positive and bounded by the whole sphere.
    #[test]
    fn areas_positive_and_bounded(
        nlat in 4usize..48,
        nlon in 4usize..96,
        margin in 0.01f64..0.3,
    ) {
        let grid = build_grid(nlat, nlon, margin, true);
        let sphere = 4.0 * std::f64::consts::PI * R_EARTH * R_EARTH;
        let mut total = 0.0;
        for i in 0..nlat {
            for j in 0..nlon {
                let a = grid.area(i, j);
                prop_assert!(a > 0.0, "non-positive area at ({i},{j})");
                total += a;
            }
        }
        prop_assert!(total <= sphere * 1.01,
            "total area {total:.3e} exceeds sphere {sphere:.3e}");
    }

    /// Haversine distance is symmetric, non-negative, and bounded by
    /// half the circumference.
    #[test]
    fn distance_symmetric_and_bounded(
        lat1 in -1.5f64..1.5,
        lon1 in 0.0f64..6.28,
        lat2 in -1.5f64..1.5,
        lon2 in 0.0f64..6.28,
    ) {
        let d_ab = Grid::distance(lat1, lon1, lat2, lon2);
        let d_ba = Grid::distance(lat2, lon2, lat1, lon1);
        prop_assert!(d_ab >= 0.0);
        prop_assert!((d_ab - d_ba).abs() < 1e-6);
        prop_assert!(d_ab <= std::f64::consts::PI * R_EARTH * (1.0 + 1e-12));
    }

    /// Distance to self is zero; distance grows along a meridian.
    #[test]
    fn distance_along_meridian_is_arc_length(
        lat in -1.4f64..1.4,
        dlat in 0.001f64..0.1,
        lon in 0.0f64..6.28,
    ) {
        prop_assert!(Grid::distance(lat, lon, lat, lon) < 1e-6);
        let d = Grid::distance(lat, lon, lat + dlat, lon);
        let arc = R_EARTH * dlat;
        prop_assert!((d - arc).abs() < 1e-6 * arc.max(1.0),
            "meridian distance {d} vs arc {arc}");
    }

    /// mask_out_pole only touches pole rows.
    #[test]
    fn mask_out_pole_is_idempotent_and_local(
        nlat in 6usize..24,
        nlon in 4usize..16,
    ) {
        let mut grid = build_grid(nlat, nlon, 1e-8, false);
        grid.mask_out_pole();
        let after_once = grid.mask.clone();
        grid.mask_out_pole();
        prop_assert_eq!(&after_once, &grid.mask, "mask_out_pole not idempotent");

        for i in 0..nlat {
            let expect_land = grid.is_pole_row(i);
            for j in 0..nlon {
                prop_assert_eq!(!grid.water(0, 0, i, j), expect_land,
                    "row {} wrongly masked", i);
            }
        }
    }
}

proptest! {
    /// Any tolerance > 0 and diff order in {2,4,6} validates; the rest
    /// of the defaults are consistent.
    #[test]
    fn config_accepts_valid_solver_params(
        tol in 1e-12f64..1.0,
        ord in 1usize..4,
        tikhov in 0.0f64..10.0,
    ) {
        let mut cfg = SieveConfig::default();
        cfg.solver.tolerance = tol;
        cfg.solver.diff_order = ord * 2;
        cfg.solver.tikhov_laplace = tikhov;
        prop_assert!(cfg.validate().is_ok());
    }

    /// Serialisation round-trips the scale list exactly.
    #[test]
    fn config_roundtrips_scales(
        scales in prop::collection::vec(1.0f64..1e7, 1..8),
    ) {
        let mut cfg = SieveConfig::default();
        cfg.filter.scales = scales.clone();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SieveConfig = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back.filter.scales, scales);
    }
}
