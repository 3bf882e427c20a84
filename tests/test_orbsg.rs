use nalgebra::{Matrix3, Vector3};
use num_complex::Complex64;

use afbasis::engine::orbitals::{OrbitalGenerator, PlaneWaveGenerator};
use afbasis::io::orbsg::{read_orbitals, CodecError, OrbsgWriter, TOP_GROUP};

fn recip() -> Matrix3<f64> {
    Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0)
}

fn band(n: usize, seed: f64) -> Vec<Complex64> {
    (0..n)
        .map(|i| Complex64::new(seed + i as f64, -(i as f64) * 0.5))
        .collect()
}

#[test]
fn full_grid_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orbitals.h5");
    let kpoints = vec![Vector3::zeros(), Vector3::new(0.5, 0.0, 0.0)];
    let mesh = [2, 2, 2];

    let mut writer = OrbsgWriter::create(&path, &recip(), &kpoints, mesh).unwrap();
    writer.put_band(0, 0, &band(8, 1.0)).unwrap();
    writer.put_band(0, 1, &band(8, 2.0)).unwrap();
    writer.put_band(1, 0, &band(8, 3.0)).unwrap();
    writer.finish(&[2, 1]).unwrap();

    let data = read_orbitals(&path).unwrap();
    assert_eq!(data.kpoints.len(), 2);
    assert!((data.kpoints[1][0] - 0.5).abs() < 1e-15);
    assert_eq!(data.mesh, Some(mesh));
    assert_eq!(data.norbs, vec![2, 1]);
    assert!((data.reciprocal - recip()).norm() < 1e-15);

    assert_eq!(data.coefficients[0].len(), 2);
    assert_eq!(data.coefficients[1].len(), 1);
    for (got, want) in data.coefficients[0][1].iter().zip(band(8, 2.0)) {
        assert!((got - want).norm() < 1e-15);
    }
}

#[test]
fn mixed_layout_truncates_to_the_cutoff() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orbitals.h5");
    let kpoints = vec![Vector3::zeros()];

    let mut writer = OrbsgWriter::create(&path, &recip(), &kpoints, [2, 2, 2]).unwrap();
    let gvecs = vec![Vector3::new(0, 0, 1), Vector3::new(0, 1, 0)];
    writer.put_gvectors(0, &gvecs).unwrap();
    // Two plane-wave components followed by a zero tail.
    let mut coeffs = band(2, 1.0);
    coeffs.extend(vec![Complex64::new(0.0, 0.0); 6]);
    writer.put_band(0, 0, &coeffs).unwrap();
    writer.finish(&[1]).unwrap();

    let data = read_orbitals(&path).unwrap();
    assert_eq!(data.gvectors[0].as_ref().unwrap(), &gvecs);
    assert_eq!(data.coefficients[0][0].len(), 2);
}

#[test]
fn nonzero_beyond_cutoff_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orbitals.h5");
    let kpoints = vec![Vector3::zeros()];

    let mut writer = OrbsgWriter::create(&path, &recip(), &kpoints, [2, 2, 2]).unwrap();
    writer.put_gvectors(0, &[Vector3::new(0, 0, 1)]).unwrap();
    let mut coeffs = vec![Complex64::new(0.0, 0.0); 8];
    coeffs[0] = Complex64::new(1.0, 0.0);
    coeffs[5] = Complex64::new(1e-9, 0.0); // beyond the declared cutoff
    writer.put_band(0, 0, &coeffs).unwrap();
    writer.finish(&[1]).unwrap();

    let err = read_orbitals(&path).unwrap_err();
    assert!(matches!(
        err,
        CodecError::NonzeroBeyondCutoff { ik: 0, ib: 0, npw: 1 }
    ));
}

#[test]
fn writer_rejects_wrong_declared_counts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orbitals.h5");
    let kpoints = vec![Vector3::zeros()];

    let mut writer = OrbsgWriter::create(&path, &recip(), &kpoints, [2, 2, 2]).unwrap();
    writer.put_band(0, 0, &band(8, 1.0)).unwrap();
    let err = writer.finish(&[2]).unwrap_err();
    assert!(matches!(
        err,
        CodecError::DeclaredCountMismatch { ik: 0, declared: 2, got: 1 }
    ));
}

#[test]
fn writer_rejects_undeclared_kpoints() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orbitals.h5");
    let kpoints = vec![Vector3::zeros()];

    let mut writer = OrbsgWriter::create(&path, &recip(), &kpoints, [2, 2, 2]).unwrap();
    let err = writer.put_band(1, 0, &band(8, 1.0)).unwrap_err();
    assert!(matches!(err, CodecError::Malformed { ref name, .. } if name == "kp1_b0"));
    let err = writer.put_gvectors(1, &[Vector3::new(0, 0, 1)]).unwrap_err();
    assert!(matches!(err, CodecError::Malformed { ref name, .. } if name == "kp1_g"));
}

#[test]
fn reader_detects_missing_band_datasets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orbitals.h5");

    // Hand-build a container whose declared count exceeds what is present.
    {
        let file = hdf5::File::create(&path).unwrap();
        let group = file.create_group(TOP_GROUP).unwrap();
        let recip = ndarray::Array2::<f64>::eye(3);
        group
            .new_dataset_builder()
            .with_data(&recip)
            .create("reciprocal_vectors")
            .unwrap();
        group
            .new_dataset::<i64>()
            .create("number_of_kpoints")
            .unwrap()
            .write_scalar(&1)
            .unwrap();
        let kp = ndarray::Array2::<f64>::zeros((1, 3));
        group
            .new_dataset_builder()
            .with_data(&kp)
            .create("kpoints")
            .unwrap();
        group
            .new_dataset_builder()
            .with_data(&[2i64][..])
            .create("number_of_orbitals")
            .unwrap();
        let coeffs = ndarray::Array2::<f64>::zeros((8, 2));
        group
            .new_dataset_builder()
            .with_data(&coeffs)
            .create("kp0_b0")
            .unwrap();
    }

    let err = read_orbitals(&path).unwrap_err();
    assert!(matches!(
        err,
        CodecError::OrbitalCountMismatch { ik: 0, declared: 2, present: 1 }
    ));
}

#[tokio::test]
async fn plane_wave_generator_writes_delta_functions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orbitals.h5");
    let mesh = [4, 4, 4];

    // Simple cubic reciprocal lattice, Gamma point, kc = 1.2: exactly the six
    // |G| = 1 plane waves.
    let generator = PlaneWaveGenerator::new(recip(), vec![Vector3::zeros()], mesh, 1.2);
    let norb = generator
        .generate(dir.path(), &path, &[])
        .await
        .unwrap();
    assert_eq!(norb, 6);

    let data = read_orbitals(&path).unwrap();
    assert_eq!(data.norbs, vec![6]);
    for coeffs in &data.coefficients[0] {
        assert_eq!(coeffs.len(), 64);
        let nonzero: Vec<_> = coeffs
            .iter()
            .enumerate()
            .filter(|(_, c)| c.norm() > 0.0)
            .collect();
        assert_eq!(nonzero.len(), 1);
        assert!((nonzero[0].1 - Complex64::new(1.0, 0.0)).norm() < 1e-15);
    }
}
