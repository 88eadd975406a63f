mod args;
mod tab;

use clap::Parser;
use log::{debug, error};
use snafu::ErrorCompat;

use crate::args::Args;
use crate::tab::Overrides;

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    debug!("main: args: {:?}", args);

    let overrides = Overrides {
        input: args.input.clone(),
        input_type: args.input_type.clone(),
        out: args.out.clone(),
        min_base: args.min_base,
        drop_flagged: args.drop_flagged,
    };
    if let Err(e) = tab::run_analysis(&args.config, args.reference.clone(), &overrides) {
        error!("surveytab failed: {}", e);
        eprintln!("An error occured: {}", e);
        if let Some(bt) = ErrorCompat::backtrace(&e) {
            eprintln!("trace: {}", bt);
        }
        std::process::exit(1);
    }
}
