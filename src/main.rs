mod chart;
mod classifier;
mod cli;
mod config;
mod error;
mod model;
mod server;

use candle_core::Device;
use clap::Parser;
use classifier::ModelCache;
use cli::{Cli, Commands};
use config::Config;
use error::Result;

fn parse_device(device_str: &str) -> Result<Device> {
    match device_str {
        "cpu" => Ok(Device::Cpu),
        s if s.starts_with("cuda") => {
            let parts: Vec<&str> = s.split(':').collect();
            let ordinal = if parts.len() > 1 {
                parts[1].parse::<usize>().map_err(|_| {
                    error::Error::InvalidInput(format!("Invalid CUDA device: {}", s))
                })?
            } else {
                0
            };
            Device::new_cuda(ordinal).map_err(|e| {
                error::Error::ConfigError(format!("Failed to initialize CUDA device: {}", e))
            })
        }
        _ => Err(error::Error::InvalidInput(format!(
            "Unknown device: {}",
            device_str
        ))),
    }
}

fn format_size(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes < 1024.0 {
        format!("{} B", bytes as u64)
    } else if bytes < 1024.0 * 1024.0 {
        format!("{:.2} KB", bytes / 1024.0)
    } else {
        format!("{:.2} MB", bytes / (1024.0 * 1024.0))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Pull { force } => {
            let spec = model::builtin();
            let dir = spec.dir(&config);

            for artifact in spec.artifacts() {
                let dest = dir.join(&artifact.name);
                if force && dest.exists() {
                    std::fs::remove_file(&dest)?;
                }
                model::ensure_artifact(&dest, artifact).await?;
            }

            let mut registry = model::Registry::load(&config)?;
            registry.add_model(model::InstalledModel {
                name: spec.name.clone(),
                model_dir: dir.clone(),
                pulled_at: chrono::Utc::now().to_rfc3339(),
            });
            registry.save(&config)?;

            println!("✓ Successfully pulled model: {}", spec.name);
            println!("  Path: {:?}", dir);
        }

        Commands::Serve { device, port, host } => {
            let device = parse_device(&device)?;
            let device_name = format!("{:?}", device);

            let cache = ModelCache::new(config, device, model::builtin());
            let state = server::AppState::new(cache, device_name.clone());

            println!("🚀 Classy server starting...");
            println!("   Device: {}", device_name);
            println!("   Demo page: http://{}:{}/", host, port);
            println!("   Health: http://{}:{}/api/health", host, port);
            println!("   Classify: http://{}:{}/api/classify", host, port);
            println!("\n   The model is fetched and loaded on the first classify request");

            server::serve(&host, port, state).await?;
        }

        Commands::Run { image, device, top } => {
            let device = parse_device(&device)?;
            let image_bytes = std::fs::read(&image)?;

            let cache = ModelCache::new(config, device, model::builtin());
            let classifier = cache.get().await?;

            let confidences = classifier.predict(&image_bytes)?;
            let rows = chart::top_rows(classifier.labels(), &confidences, top);

            println!("{:?}", image);
            for row in &rows {
                println!("{}", chart::render_bar(row, 30));
            }
        }

        Commands::List => {
            let spec = model::builtin();
            let dir = spec.dir(&config);
            let registry = model::Registry::load(&config)?;

            println!("{}", spec.name);
            for artifact in spec.artifacts() {
                let dest = dir.join(&artifact.name);
                let status = if artifact.matches(&dest) {
                    format!("ok, {}", format_size(artifact.size))
                } else if dest.exists() {
                    "size mismatch, will re-download".to_string()
                } else {
                    "not downloaded".to_string()
                };
                println!("  {} ({})", artifact.name, status);
            }

            if let Ok(installed) = registry.get_model(&spec.name) {
                println!("  Pulled: {}", installed.pulled_at);
            } else {
                println!("  Use 'classy pull' to download the artifacts up front.");
            }
        }
    }

    Ok(())
}
