use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use afbasis::core::basis::BasisShape;
use afbasis::engine::orbitals::{OrbitalGenerator, PlaneWaveGenerator};
use afbasis::io::deck;

/// Writes a trial orbital container for a converged plane-wave scf run and
/// prints the orbital count.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Output orbital container (HDF5)
    forb: PathBuf,

    /// Scf input deck of the converged run
    scf_inp: PathBuf,

    /// Scf output log of the converged run
    scf_out: PathBuf,

    /// Angular momentum cutoff of the trial basis
    lmax: usize,

    /// Exponent source: a whitespace-separated file of floats, or the name
    /// of a tabulated basis handed through to an external writer
    fx0: String,

    /// Plane-wave momentum cutoff (1/bohr)
    #[arg(long = "kcut", short = 'k')]
    kcut: Option<f64>,
}

/// Mirrors the loadtxt-or-string convention of the historical tooling: a
/// source that does not parse as floats is a named basis, not an error.
fn load_exponents(source: &str) -> Result<Option<Vec<f64>>> {
    let Ok(text) = std::fs::read_to_string(source) else {
        return Ok(None);
    };
    let mut values = Vec::new();
    for token in text.split_whitespace() {
        match token.parse::<f64>() {
            Ok(v) => values.push(v),
            Err(_) => return Ok(None),
        }
    }
    if values.is_empty() {
        bail!("exponent file `{source}` is empty");
    }
    Ok(Some(values))
}

async fn run(args: Args) -> Result<u32> {
    let outdir = deck::read_input_value(&args.scf_inp, "outdir")
        .with_context(|| format!("reading {}", args.scf_inp.display()))?;
    log::info!("scf scratch directory: {outdir}");

    let reciprocal = deck::read_reciprocal_vectors(&args.scf_out)?;
    let mesh = deck::read_fft_mesh(&args.scf_out)?;
    let kpoints: Vec<_> = deck::read_kpoints(&args.scf_out)?
        .into_iter()
        .map(|kp| kp.kvec)
        .collect();

    let shape = BasisShape::new(args.lmax)?;
    if let Some(x) = load_exponents(&args.fx0)? {
        if !shape.is_feasible(&x)? {
            log::warn!("exponent vector violates the shell ordering; the engine may reject it");
        }
    } else {
        log::info!(
            "`{}` is not an exponent table; treating it as a named basis",
            args.fx0
        );
    }

    let Some(kcut) = args.kcut else {
        bail!(
            "only the plane-wave layout is generated in process; \
             pass --kcut or use an external orbital writer"
        );
    };

    let workdir = args
        .forb
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let generator = PlaneWaveGenerator::new(reciprocal, kpoints, mesh, kcut);
    let norb = generator.generate(&workdir, &args.forb, &[]).await?;
    Ok(norb)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let args = Args::parse();
    match run(args).await {
        Ok(norb) => println!("{norb}"),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    }
}
