#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// Writes an executable shell script into `dir` and returns its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// A mock engine that prints a well-formed result log on stdout.
#[cfg(unix)]
pub fn mock_engine(dir: &Path, energy: f64) -> PathBuf {
    write_script(
        dir,
        "mock_engine.sh",
        &format!("echo \" EMP2 (Ha) : ({energy:.6}, 0.0)\""),
    )
}

/// A mock engine that also prints an eigenvalue block before the energy.
#[cfg(unix)]
pub fn mock_engine_with_evals(dir: &Path, energy: f64) -> PathBuf {
    write_script(
        dir,
        "mock_engine_evals.sh",
        &format!(
            "echo \" MP2 eigenvalues (Ha):\"\n\
             echo \"   -0.531200 0.123400\"\n\
             echo \" EMP2 (Ha) : ({energy:.6}, 0.0)\""
        ),
    )
}

/// A mock orbital writer that touches the container file and reports `norb`
/// orbitals on stdout. Expects `{DIR} {ORBITAL_FILE}` as its two arguments.
#[cfg(unix)]
pub fn mock_orbital_writer(dir: &Path, norb: u32) -> PathBuf {
    write_script(
        dir,
        "mock_writer.sh",
        &format!(": > \"$2\"\necho {norb}"),
    )
}
