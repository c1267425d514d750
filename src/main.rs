use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imgwarm::application::ImageLoader;
use imgwarm::infrastructure::config::{AppConfig, CliArgs, Command, ConfigStore};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let store = ConfigStore::new()?;
    let mut config = store.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    config.engine.validate()?;
    Ok(config)
}

async fn run(loader: &ImageLoader, command: Command) -> Result<()> {
    let priority = command.priority();
    match command {
        Command::Load { urls, transform } => {
            let options = transform.options();
            let mut failed = 0usize;
            for url in &urls {
                match loader.load(url, &options).await {
                    Ok(image) => {
                        let dimensions = image
                            .dimensions()
                            .map_or_else(|| "unknown size".to_string(), |(w, h)| format!("{w}x{h}"));
                        let fallback = if image.is_fallback { " (fallback)" } else { "" };
                        println!(
                            "{url}: {}{fallback}, {} bytes, {}, {dimensions}",
                            image.source,
                            image.size_bytes(),
                            image.content_type
                        );
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "Load failed");
                        eprintln!("{url}: {e}");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                return Err(eyre!("{failed} of {} images failed to load", urls.len()));
            }
        }
        Command::Preload { urls, transform, .. } => {
            let options = transform.options();
            for url in &urls {
                loader.preload_with_priority(url, options, priority);
            }
            loader.wait_idle().await;
            println!("{}", loader.stats());
        }
        Command::Stats => println!("{}", loader.stats()),
        Command::Sweep => {
            let removed = loader.sweep_expired().await;
            println!("Removed {removed} expired images");
        }
        Command::Clear => {
            loader.clear_all().await;
            println!("Cache cleared");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = imgwarm::VERSION, "Starting imgwarm");

    let loader = ImageLoader::with_defaults(config.engine).await?;
    let result = run(&loader, args.command).await;
    loader.flush().await;

    result
}
