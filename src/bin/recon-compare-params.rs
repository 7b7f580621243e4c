use clap::Parser;
use recon_compare::CompareParams;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
struct Args {
    /// path to run parameters file to write
    parameter_file: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match CompareParams::default().to_file(&args.parameter_file) {
        Ok(filename) => {
            println!("wrote default parameter file to {}", filename.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to write {}: {e}", args.parameter_file.display());
            ExitCode::FAILURE
        }
    }
}
