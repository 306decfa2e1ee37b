use approx::assert_relative_eq;
use nalgebra::DMatrix;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Uniform;

use super::{Amplitude, AmplitudeParams, UpdateOrder};
use crate::error::{AmplitudeError, RangeError};
use crate::numeric::BigComplex;
use crate::state::{Configuration, Hop, HopPath};
use crate::wavefunction::{Species, TabulatedWaveFunction, WaveFunction};

fn random_wavefunction(num_sites: usize, num_orbitals: usize, seed: u64) -> TabulatedWaveFunction {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Uniform::new(-1.0, 1.0);
    let up = DMatrix::from_fn(num_sites, num_orbitals, |_, _| Complex64::new(rng.sample(dist), rng.sample(dist)));
    let down = DMatrix::from_fn(num_sites, num_orbitals, |_, _| Complex64::new(rng.sample(dist), rng.sample(dist)));
    TabulatedWaveFunction::new(up, down).unwrap()
}

fn filled_configuration(n_up: usize, n_down: usize) -> Configuration {
    Configuration::new(
        (0..n_up).collect(),
        (n_up..n_up + n_down).collect(),
        (0..n_up).collect(),
        (0..n_down).collect(),
    )
}

fn engine<W: WaveFunction>(wf: &W, config: Configuration) -> Amplitude<'_, W> {
    let mut amp = Amplitude::new(wf, config, AmplitudeParams::default()).unwrap();
    amp.init().unwrap();
    amp
}

/// Determinant product recomputed from scratch for the engine's configuration.
fn brute_force<W: WaveFunction>(wf: &W, config: &Configuration) -> Complex64 {
    Species::ALL
        .iter()
        .map(|&s| wf.slater_matrix(config.sites(s), config.orbitals(s), s).determinant())
        .product()
}

fn brute_force_species<W: WaveFunction>(wf: &W, sites: &[usize], orbitals: &[usize], species: Species) -> Complex64 {
    wf.slater_matrix(sites, orbitals, species).determinant()
}

fn assert_close(actual: Complex64, expected: Complex64, tolerance: f64) {
    let scale = expected.norm().max(1e-300);
    assert!(
        (actual - expected).norm() <= tolerance * scale,
        "{actual} differs from {expected}"
    );
}

fn value(z: BigComplex) -> Complex64 {
    z.to_complex().unwrap()
}

#[test]
fn test_identity_then_column_swap() {
    let identity = DMatrix::from_fn(2, 2, |i, j| Complex64::new(if i == j { 1.0 } else { 0.0 }, 0.0));
    let wf = TabulatedWaveFunction::new(identity.clone(), identity).unwrap();
    let config = Configuration::new(vec![0, 1], vec![], vec![0, 1], vec![]);
    let mut amp = engine(&wf, config);
    assert_eq!(value(amp.amp().unwrap()), Complex64::new(1.0, 0.0));

    let swap: HopPath = vec![Hop::new(0, 1), Hop::new(1, 0)];
    let ratios = amp.virt_update(&[vec![]], &[vec![]], &[swap.clone()], &[vec![]]).unwrap();
    assert_eq!(ratios.len(), 1);
    assert_close(value(ratios[0]), Complex64::new(-1.0, 0.0), 1e-15);

    amp.update(&[], &[], &swap, &[]).unwrap();
    assert_close(value(amp.amp().unwrap()), Complex64::new(-1.0, 0.0), 1e-15);
    assert_eq!(amp.configuration().orbitals(Species::Up), &[1, 0]);
    assert!(amp.inverse_residual(Species::Up) < 1e-14);
}

#[test]
fn test_zero_row_is_reported_singular() {
    // site 2 carries no weight in any orbital
    let table = DMatrix::from_fn(3, 2, |i, j| match (i, j) {
        (2, _) => Complex64::new(0.0, 0.0),
        (i, j) if i == j => Complex64::new(1.0, 0.0),
        _ => Complex64::new(0.25, 0.5),
    });
    let wf = TabulatedWaveFunction::new(table.clone(), table).unwrap();
    let mut amp = engine(&wf, Configuration::new(vec![0, 1], vec![], vec![0, 1], vec![]));
    let before = value(amp.amp().unwrap());

    let hop = Hop::new(0, 2);
    assert!(amp.virt_row_update(Species::Up, hop).unwrap().is_zero());
    let err = amp.row_update(Species::Up, hop).unwrap_err();
    assert!(err.is_singular(), "unexpected {err}");
    let err = amp.update(&[hop], &[], &[], &[]).unwrap_err();
    assert!(matches!(err, AmplitudeError::Singular { species: Species::Up, .. }));

    // nothing moved
    assert!(amp.is_valid());
    assert_eq!(amp.configuration().sites(Species::Up), &[0, 1]);
    assert_eq!(value(amp.amp().unwrap()), before);

    amp.set_configuration(Configuration::new(vec![2, 1], vec![], vec![0, 1], vec![])).unwrap();
    assert!(amp.init().unwrap_err().is_singular());
    assert!(!amp.is_valid());
}

#[test]
fn test_single_hop_ratios_match_brute_force() {
    for n in 1..=6 {
        let wf = random_wavefunction(9, 9, 11 + n as u64);
        let config = filled_configuration(n, 9 - n);
        let amp = engine(&wf, config.clone());
        let det = brute_force_species(&wf, config.sites(Species::Up), config.orbitals(Species::Up), Species::Up);

        for row in 0..n {
            for target in n..9 {
                let ratio = amp.virt_row_update(Species::Up, Hop::new(row, target)).unwrap();
                let mut sites = config.sites(Species::Up).to_vec();
                sites[row] = target;
                let expected = brute_force_species(&wf, &sites, config.orbitals(Species::Up), Species::Up) / det;
                assert_close(value(ratio), expected, 1e-9);

                let mut moved = config.clone();
                moved.apply_row_hops(Species::Up, &[Hop::new(row, target)]);
                assert_close(value(amp.amplitude_after(ratio).unwrap()), brute_force(&wf, &moved), 1e-9);
            }
        }
        for col in 0..n {
            for target in n..9 {
                let ratio = amp.virt_col_update(Species::Up, Hop::new(col, target)).unwrap();
                let mut orbitals = config.orbitals(Species::Up).to_vec();
                orbitals[col] = target;
                let expected = brute_force_species(&wf, config.sites(Species::Up), &orbitals, Species::Up) / det;
                assert_close(value(ratio), expected, 1e-9);

                let mut moved = config.clone();
                moved.apply_col_hops(Species::Up, &[Hop::new(col, target)]);
                assert_close(value(amp.amplitude_after(ratio).unwrap()), brute_force(&wf, &moved), 1e-9);
            }
        }
    }
}

#[test]
fn test_combined_orderings_agree() {
    let wf = random_wavefunction(10, 10, 5);
    let config = filled_configuration(5, 4);
    let amp = engine(&wf, config.clone());
    let sites = config.sites(Species::Down);
    let orbitals = config.orbitals(Species::Down);
    let det = brute_force_species(&wf, sites, orbitals, Species::Down);

    for (row, col) in [(Hop::new(0, 9), Hop::new(0, 7)), (Hop::new(3, 0), Hop::new(1, 8)), (Hop::new(2, 4), Hop::new(3, 5))] {
        let row_first = value(amp.virt_combined_update(Species::Down, row, col, UpdateOrder::RowFirst).unwrap());
        let col_first = value(amp.virt_combined_update(Species::Down, row, col, UpdateOrder::ColumnFirst).unwrap());
        assert_close(row_first, col_first, 1e-10);

        let block = amp.virt_update(&[vec![]], &[vec![row]], &[vec![]], &[vec![col]]).unwrap();
        assert_close(value(block[0]), row_first, 1e-10);

        let mut new_sites = sites.to_vec();
        new_sites[row.index] = row.target;
        let mut new_orbitals = orbitals.to_vec();
        new_orbitals[col.index] = col.target;
        let expected = brute_force_species(&wf, &new_sites, &new_orbitals, Species::Down) / det;
        assert_close(row_first, expected, 1e-9);
    }
}

#[test]
fn test_virtual_updates_are_isolated() {
    let wf = random_wavefunction(8, 8, 3);
    let amp = engine(&wf, filled_configuration(4, 4));
    let matrix = amp.matrix(Species::Up).clone();
    let inverse = amp.inverse(Species::Up).clone();
    let start = value(amp.amp().unwrap());

    let hops: Vec<Hop> = (0..4).flat_map(|i| (4..8).map(move |t| Hop::new(i, t))).collect();
    let forward: Vec<Complex64> = hops.iter()
        .map(|&h| value(amp.virt_row_update(Species::Up, h).unwrap()))
        .collect();
    let mut backward: Vec<Complex64> = hops.iter().rev()
        .map(|&h| value(amp.virt_row_update(Species::Up, h).unwrap()))
        .collect();
    backward.reverse();
    assert_eq!(forward, backward);

    let batch = amp.virt_update(&hops.iter().map(|&h| vec![h]).collect::<Vec<_>>(), &[vec![]], &[vec![]], &[vec![]]).unwrap();
    for (single, batched) in forward.iter().zip(&batch) {
        assert_close(value(*batched), *single, 1e-10);
    }

    assert_eq!(amp.matrix(Species::Up), &matrix);
    assert_eq!(amp.inverse(Species::Up), &inverse);
    assert_eq!(value(amp.amp().unwrap()), start);
    assert_eq!(amp.configuration(), &filled_configuration(4, 4));
}

#[test]
fn test_batched_enumeration_order() {
    let wf = random_wavefunction(8, 8, 21);
    let amp = engine(&wf, filled_configuration(3, 3));
    let rows_up: Vec<HopPath> = vec![vec![], vec![Hop::new(0, 6)]];
    let rows_down: Vec<HopPath> = vec![vec![Hop::new(2, 7)]];
    let cols_up: Vec<HopPath> = vec![vec![], vec![Hop::new(1, 5)], vec![Hop::new(0, 3), Hop::new(2, 4)]];
    let cols_down: Vec<HopPath> = vec![vec![], vec![Hop::new(1, 6)]];
    let ratios = amp.virt_update(&rows_up, &rows_down, &cols_up, &cols_down).unwrap();
    assert_eq!(ratios.len(), 2 * 1 * 3 * 2);

    let mut index = 0;
    for ru in &rows_up {
        for rd in &rows_down {
            for cu in &cols_up {
                for cd in &cols_down {
                    let up = amp.virt_update(&[ru.clone()], &[vec![]], &[cu.clone()], &[vec![]]).unwrap()[0];
                    let down = amp.virt_update(&[vec![]], &[rd.clone()], &[vec![]], &[cd.clone()]).unwrap()[0];
                    assert_close(value(ratios[index]), value(up * down), 1e-12);
                    index += 1;
                }
            }
        }
    }
    assert!(amp.virt_update(&[], &[vec![]], &[vec![]], &[vec![]]).unwrap().is_empty());
}

#[test]
fn test_multi_hop_update_matches_brute_force() {
    let wf = random_wavefunction(12, 12, 8);
    let mut amp = engine(&wf, filled_configuration(6, 5));
    let rows = [Hop::new(1, 11), Hop::new(4, 7)];
    let cols = [Hop::new(0, 9), Hop::new(5, 10)];
    let before = brute_force(&wf, amp.configuration());

    let virt = value(amp.virt_update(&[rows.to_vec()], &[vec![]], &[cols.to_vec()], &[vec![]]).unwrap()[0]);
    amp.update(&rows, &[], &cols, &[]).unwrap();
    let after = brute_force(&wf, amp.configuration());

    assert_eq!(amp.configuration().sites(Species::Up), &[0, 11, 2, 3, 7, 5]);
    assert_eq!(amp.configuration().orbitals(Species::Up), &[9, 1, 2, 3, 4, 10]);
    assert_close(virt, after / before, 1e-9);
    assert_close(value(amp.amp().unwrap()), after, 1e-9);
    assert!(amp.inverse_residual(Species::Up) < 1e-9);
}

#[test]
fn test_long_update_sequence_stays_consistent() {
    let wf = random_wavefunction(10, 10, 42);
    let mut amp = engine(&wf, filled_configuration(4, 4));
    let mut rng = StdRng::seed_from_u64(99);

    let mut committed = 0;
    for step in 0..60 {
        let species = if rng.gen_bool(0.5) { Species::Up } else { Species::Down };
        let config = amp.configuration().clone();
        let free_site = (0..10).find(|s| !config.sites(species).contains(s)).unwrap();
        let free_orbital = (0..10).rev().find(|f| !config.orbitals(species).contains(f)).unwrap();
        let row = Hop::new(rng.gen_range(0..4), free_site);
        let col = Hop::new(rng.gen_range(0..4), free_orbital);

        let result = match step % 3 {
            0 => amp.row_update(species, row).map(|_| ()),
            1 => amp.col_update(species, col).map(|_| ()),
            _ if species == Species::Up => amp.update(&[row], &[], &[col], &[]),
            _ => amp.update(&[], &[row], &[], &[col]),
        };
        match result {
            Ok(()) => committed += 1,
            Err(err) => assert!(err.is_singular(), "unexpected {err}"),
        }
        for s in Species::ALL {
            assert!(amp.inverse_residual(s) < 1e-7, "residual drift at step {step}");
        }
        assert_close(value(amp.amp().unwrap()), brute_force(&wf, amp.configuration()), 1e-7);
    }
    assert!(committed > 40);

    let drift = amp.refresh().unwrap();
    assert!(drift.relative_error < 1e-7);
    assert!(drift.max_residual < 1e-7);
}

#[test]
fn test_init_is_idempotent() {
    let wf = random_wavefunction(7, 7, 17);
    let mut amp = engine(&wf, filled_configuration(3, 4));
    let first = value(amp.amp().unwrap());
    amp.init().unwrap();
    let second = value(amp.amp().unwrap());
    assert_relative_eq!(first.re, second.re, max_relative = 1e-14);
    assert_relative_eq!(first.im, second.im, max_relative = 1e-14);
    assert_close(first, brute_force(&wf, amp.configuration()), 1e-10);
}

#[test]
fn test_stale_amplitude_is_reported() {
    let wf = random_wavefunction(6, 6, 1);
    let mut amp = Amplitude::new(&wf, filled_configuration(2, 2), AmplitudeParams::default()).unwrap();
    assert_eq!(amp.amp().unwrap_err(), AmplitudeError::Stale);
    assert_eq!(amp.virt_row_update(Species::Up, Hop::new(0, 5)).unwrap_err(), AmplitudeError::Stale);

    let current = value(amp.current_amp().unwrap());
    assert_close(current, brute_force(&wf, amp.configuration()), 1e-10);

    amp.set_configuration(filled_configuration(3, 1)).unwrap();
    assert_eq!(amp.amp().unwrap_err(), AmplitudeError::Stale);
    amp.init().unwrap();
    assert_close(value(amp.amp().unwrap()), brute_force(&wf, amp.configuration()), 1e-10);
}

#[test]
fn test_invalid_hops_are_rejected() {
    let wf = random_wavefunction(6, 6, 2);
    let mut amp = engine(&wf, filled_configuration(3, 3));
    assert!(matches!(
        amp.virt_col_update(Species::Up, Hop::new(3, 4)),
        Err(AmplitudeError::IndexOutOfRange { .. })
    ));
    assert!(matches!(
        amp.virt_row_update(Species::Down, Hop::new(0, 6)),
        Err(AmplitudeError::IndexOutOfRange { .. })
    ));
    assert!(matches!(
        amp.update(&[Hop::new(1, 4), Hop::new(1, 5)], &[], &[], &[]),
        Err(AmplitudeError::RepeatedIndex { .. })
    ));
    assert!(matches!(
        Amplitude::new(&wf, Configuration::new(vec![0, 1], vec![], vec![0], vec![]), AmplitudeParams::default()),
        Err(AmplitudeError::ShapeMismatch { .. })
    ));
    assert!(amp.is_valid());
}

#[test]
fn test_determinant_beyond_double_range() {
    let n = 24;
    let base = random_wavefunction(n, n, 77);
    let scaled = TabulatedWaveFunction::new(
        base.table(Species::Up) * Complex64::new(1.0e30, 0.0),
        base.table(Species::Down) * Complex64::new(1.0e30, 0.0),
    )
    .unwrap();
    let config = Configuration::new((0..n).collect(), (0..n).collect(), (0..n).collect(), (0..n).collect());
    let small = engine(&base, config.clone());
    let mut large = engine(&scaled, config);

    let amp = large.amp().unwrap();
    assert!(amp.to_complex().is_err());
    assert!(matches!(
        large.amp_complex(),
        Err(AmplitudeError::Range(RangeError::Overflow { .. }))
    ));
    assert_close(small.amp_complex().unwrap(), value(small.amp().unwrap()), 0.0);
    let expected = small.amp().unwrap().ln().re + 2.0 * n as f64 * 1.0e30f64.ln();
    assert_relative_eq!(amp.ln().re, expected, max_relative = 1e-12);

    // ratios stay ordinary numbers even when the amplitude is not
    let ratio = large.virt_row_update(Species::Up, Hop::new(0, 0)).unwrap();
    assert_close(value(ratio), Complex64::new(1.0, 0.0), 1e-10);
    large.col_update(Species::Down, Hop::new(3, 3)).unwrap();
    assert_relative_eq!(large.amp().unwrap().ln().re, expected, max_relative = 1e-12);
}
