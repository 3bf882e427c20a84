mod common;

use afbasis::engine::error::EngineError;
use afbasis::engine::qemp2::{Qemp2Config, Qemp2Engine};

fn full_config() -> Qemp2Config {
    Qemp2Config {
        outdir: Some("./scratch".to_string()),
        nks: Some(8),
        gto_h5: Some("pyscf.orbitals.h5".to_string()),
        ngto: Some(10),
        ..Qemp2Config::default()
    }
}

#[test]
fn one_missing_parameter_is_named() {
    let mut config = full_config();
    config.gto_h5 = None;
    let err = Qemp2Engine::new(config).unwrap_err();
    match err {
        EngineError::MissingParameters { keys } => assert_eq!(keys, vec!["gto_h5"]),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn all_missing_parameters_are_reported_at_once() {
    let mut config = full_config();
    config.outdir = None;
    config.ngto = None;
    let err = Qemp2Engine::new(config).unwrap_err();
    match err {
        EngineError::MissingParameters { keys } => {
            assert_eq!(keys, vec!["outdir", "ngto"]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn campaign_validation_ignores_per_trial_parameters() {
    let mut config = full_config();
    config.gto_h5 = None;
    config.ngto = None;
    assert!(config.validate_campaign().is_ok());

    config.outdir = None;
    config.nks = None;
    let err = config.validate_campaign().unwrap_err();
    match err {
        EngineError::MissingParameters { keys } => assert_eq!(keys, vec!["outdir", "nks"]),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn input_deck_layout_is_fixed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Qemp2Engine::new(full_config()).unwrap();
    engine.write_input(dir.path()).unwrap();

    let text = std::fs::read_to_string(dir.path().join("qemp2.in")).unwrap();
    assert!(text.starts_with("&inputpp\n"));
    assert!(text.ends_with("/\n"));
    assert!(text.contains("  outdir = './scratch'\n"));
    assert!(text.contains("  run_type = 'mp2_driver'\n"));
    assert!(text.contains("  diag_type = 'keep_occ'\n"));
    assert!(text.contains("  number_of_orbitals = 8\n"));
    assert!(text.contains("  h5_add_orbs = 'pyscf.orbitals.h5'\n"));
    assert!(text.contains("  read_from_h5 = 10\n"));
    assert!(text.contains("  verbose = .true.\n"));
}

#[cfg(unix)]
mod subprocess {
    use super::*;

    #[tokio::test]
    async fn happy_path_returns_the_energy() {
        let dir = tempfile::tempdir().unwrap();
        let script = common::mock_engine(dir.path(), -1.2345);

        let mut config = full_config();
        config.command = Some(format!("{} {{DIR}}", script.display()));
        let engine = Qemp2Engine::new(config).unwrap();

        engine.write_input(dir.path()).unwrap();
        engine.execute(dir.path()).await.unwrap();
        let result = engine.read_results(dir.path(), false).unwrap();
        assert!((result.energy - -1.2345).abs() < 1e-12);
        assert!(result.evals.is_none());
    }

    #[tokio::test]
    async fn eigenvalue_spectrum_is_captured_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let script = common::mock_engine_with_evals(dir.path(), -0.5);

        let mut config = full_config();
        config.command = Some(script.display().to_string());
        let engine = Qemp2Engine::new(config).unwrap();

        engine.execute(dir.path()).await.unwrap();
        let result = engine.read_results(dir.path(), true).unwrap();
        assert_eq!(result.evals.unwrap(), vec![-0.5312, 0.1234]);
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_execution_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = common::write_script(dir.path(), "fail.sh", "exit 1");

        let mut config = full_config();
        config.command = Some(format!("{} {{DIR}}", script.display()));
        let engine = Qemp2Engine::new(config).unwrap();

        let err = engine.execute(dir.path()).await.unwrap_err();
        match err {
            EngineError::Execution { code, command, .. } => {
                assert_eq!(code, 1);
                assert!(command.contains("fail.sh"));
                assert!(command.contains(dir.path().to_str().unwrap()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_a_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = full_config();
        config.command = Some("/nonexistent/mp2.x {DIR}".to_string());
        let engine = Qemp2Engine::new(config).unwrap();

        let err = engine.execute(dir.path()).await.unwrap_err();
        assert!(matches!(err, EngineError::Launch { .. }));
    }

    #[tokio::test]
    async fn unconfigured_command_fails_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Qemp2Engine::new(full_config()).unwrap();
        let err = engine.execute(dir.path()).await.unwrap_err();
        assert!(matches!(err, EngineError::MissingCommand { name } if name == "qemp2"));
    }
}
