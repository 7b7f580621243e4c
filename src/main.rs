use clap::Parser;
use recon_compare::logging::init_logging;
use recon_compare::unrolled::UnrolledLoader;
use recon_compare::{compare_exec, CompareArgs, CompareParams, RunContext};
use std::process::ExitCode;
use tracing::error;

fn main() -> ExitCode {
    let args = CompareArgs::parse();
    let ctx = RunContext::from_args(&args);

    if let Err(e) = init_logging(ctx.log_level, args.logfile.as_deref()) {
        eprintln!("failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }

    let params = match &args.params {
        Some(file) => match CompareParams::from_file(file) {
            Ok(p) => p,
            Err(e) => {
                error!("failed to load run parameters from {}: {}", file.display(), e);
                eprintln!("failed to load run parameters from {}: {}", file.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => CompareParams::default(),
    };

    match compare_exec(&ctx, &args, &params, &UnrolledLoader) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("comparison failed: {}", e);
            eprintln!("comparison failed: {e}");
            ExitCode::FAILURE
        }
    }
}
