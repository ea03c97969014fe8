// logtrail - main.rs
//
// Thin harness that loads one source's TOML configuration and runs its
// Pipeline to completion (or until killed). No CLI argument parsing beyond
// a single config path: discovering sources, merging CLI flags, and
// managing multiple concurrent pipelines is an external supervisor's
// responsibility, not this crate's (see lib.rs). This binary exists for
// tests and ad-hoc manual runs, not as a product CLI front end.

use std::path::PathBuf;

use logtrail::config;
use logtrail::pipeline::{Pipeline, PipelineConfig};
use logtrail::segment::SegmentFormat;
use logtrail::util::logging;

fn main() {
    logging::init(std::env::var("LOGTRAIL_DEBUG").is_ok());

    let config_path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("usage: logtrail <source-config.toml>");
            std::process::exit(2);
        }
    };

    let source = match config::load_source_config(&config_path) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!(error = %e, "failed to load source configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(name = %source.name, path = %config_path.display(), "starting pipeline");

    let _pipeline = Pipeline::spawn(PipelineConfig {
        source,
        format: SegmentFormat::Binary,
        limiter: None,
    });

    // No signal handling here; an external supervisor sends SIGTERM and is
    // expected to call into the library's Pipeline::stop for a graceful
    // shutdown from its own process. This harness just keeps the pipeline
    // alive until the process is killed.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
