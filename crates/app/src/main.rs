mod config;
mod render;
mod server;
mod telemetry;
mod worker;

#[cfg(feature = "with-tch")]
mod pipeline;

use anyhow::Result;

const USAGE: &str = "Usage: traffic-app serve --video <path> [--video <path>...] --model <path> [options]\n\
Run `traffic-app serve` with no sources to see the full option list.";

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    telemetry::init_tracing();
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("serve") => serve(&args),
        _ => {
            println!("{USAGE}");
            Ok(())
        }
    }
}

#[cfg(feature = "with-tch")]
fn serve(args: &[String]) -> Result<()> {
    let config = config::AppConfig::from_args(args)?;
    telemetry::init_metrics_recorder();
    pipeline::run(config)
}

#[cfg(not(feature = "with-tch"))]
fn serve(args: &[String]) -> Result<()> {
    // Validate the command line even without the inference backend, so
    // configuration mistakes surface in lightweight builds too.
    let _ = config::AppConfig::from_args(args)?;
    anyhow::bail!("this build lacks the `with-tch` feature; rebuild with --features with-tch")
}
