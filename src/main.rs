// src/main.rs
mod activity;
mod calibration;
mod camera;
mod config;
mod engine;
mod metrics;
mod pose;
mod posture;
mod report;
mod voice;

use anyhow::{bail, Result};
use config::AppConfig;
use std::path::PathBuf;

#[derive(Debug, Default)]
struct CliArgs {
    calibrate: bool,
    synthetic: bool,
    show_config: bool,
    camera_index: Option<u32>,
    config_path: Option<PathBuf>,
}

const USAGE: &str = "usage: sitstraight [--calibrate] [--camera-index N] [--config PATH] [--synthetic] [--show-config]";

fn parse_args() -> Result<CliArgs> {
    let mut args = CliArgs::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--calibrate" => args.calibrate = true,
            "--synthetic" => args.synthetic = true,
            "--show-config" => args.show_config = true,
            "--camera-index" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--camera-index needs a value\n{USAGE}"))?;
                args.camera_index = Some(value.parse()?);
            }
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config needs a path\n{USAGE}"))?;
                args.config_path = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => bail!("unknown argument {other:?}\n{USAGE}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = parse_args()?;
    let config_path = args
        .config_path
        .clone()
        .unwrap_or_else(config::config_file_path);
    let first_run = !config_path.exists();
    let mut config = AppConfig::load(&config_path);
    if first_run {
        if let Err(err) = config.save(&config_path) {
            tracing::warn!(%err, path = %config_path.display(), "could not write default config");
        }
    }
    if let Some(index) = args.camera_index {
        config.camera_index = index;
    }

    if args.show_config {
        config.show();
        return Ok(());
    }

    if args.calibrate {
        engine::run_calibration(config, args.synthetic).await
    } else {
        engine::run_normal(config, args.synthetic).await
    }
}
