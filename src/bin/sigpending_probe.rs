//! POSIX signal conformance probe
//!
//! Without arguments: run every scenario and re-execute itself.
//! With one argument (conventionally `cont`): finish the exec scenario.

use anyhow::{Context, Result};
use sigpending_probe::boundary::ExecPlan;
use sigpending_probe::errors::exit_with;
use sigpending_probe::{Mode, Probe, ProbeConfig, ProbeError, ProbeRunner};
use std::env;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() {
    let args: Vec<String> = env::args().collect();
    let mode = Mode::from_args(args.as_slice());

    if mode == Mode::Help {
        print_help();
        return;
    }

    // ログ初期化
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run(mode, &args) {
        match err.downcast_ref::<ProbeError>() {
            Some(probe_err) => exit_with(probe_err),
            None => {
                error!("{:#}", err);
                std::process::exit(2);
            }
        }
    }
}

fn run(mode: Mode, args: &[String]) -> Result<()> {
    let config = ProbeConfig::from_env().context("invalid probe configuration")?;
    let mut runner = ProbeRunner::new(Probe::new(config));

    match mode {
        Mode::Continuation => {
            runner.run_continuation()?;
            println!("All tests OK");
            Ok(())
        }
        _ => {
            let argv0 = args.first().map(String::as_str).unwrap_or("sigpending-probe");
            let plan = ExecPlan::for_current_image(argv0, |key| env::var(key).ok())
                .context("cannot prepare the continuation image")?;
            // only comes back if something failed
            match runner.run_full(&plan) {
                Ok(never) => match never {},
                Err(e) => Err(e.into()),
            }
        }
    }
}

fn print_help() {
    println!("POSIX signal conformance probe");
    println!();
    println!("Usage:");
    println!("  sigpending-probe          run every scenario, then re-exec as the continuation");
    println!("  sigpending-probe cont     post-exec continuation (started by the probe itself)");
    println!();
    println!("Any other single non-empty argument also selects the continuation;");
    println!("-h and --help are the only exceptions.");
    println!();
    println!("Environment:");
    println!("  LD_LIBRARY_PATH           required, forwarded to the re-executed image");
    println!("  RUST_LOG                  log filter, forwarded when set");
    println!("  SIGPROBE_SETTLE_MS        wait up to this long for late deliveries (default 0)");
    println!("  SIGPROBE_RAISES           raises per signal when testing coalescing/queuing (default 2)");
    println!();
    println!("Exit status: 0 on success, 1 on a violation or bad configuration,");
    println!("abort on a failed system call.");
}
