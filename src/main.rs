use clap::Parser;
use publish_preview::classify::write_failure;
use publish_preview::config::load_config;
use publish_preview::runner::{self, PreviewError};
use publish_preview::signals::Trigger;
use std::path::PathBuf;
use std::process::ExitCode;

/// Serve a generated site folder on localhost until ENTER or Ctrl-C.
#[derive(Parser, Debug)]
#[command(name = "publish-preview", version, about)]
pub struct Cli {
    /// Site root containing the generated output folder
    #[arg(value_name = "SITE", default_value = ".")]
    site: PathBuf,

    /// Port to serve on (default: from config, else 8000)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Output folder name under the site root (overrides config)
    #[arg(long)]
    output_folder: Option<String>,

    /// Config file path (default: <SITE>/preview.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print resolved settings, don't start the server
    #[arg(long)]
    dry_run: bool,

    /// Log server output and shutdown decisions
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "publish_preview=debug"
    } else {
        "publish_preview=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.site.join("preview.toml"));
    let mut config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => return report_error(&PreviewError::from(e)),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(output_folder) = cli.output_folder {
        config.server.output_folder = output_folder;
    }

    if cli.dry_run {
        println!("publish-preview v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file: {}", config_path.display());
        println!(
            "Serving: {}",
            cli.site.join(&config.server.output_folder).display()
        );
        println!("Port: {}", config.server.port);
        println!(
            "Command: {} {}",
            config.server.command,
            config.server.args.join(" ")
        );
        println!("Dry run mode, server not started.");
        return ExitCode::SUCCESS;
    }

    match runner::run(&config, &cli.site).await {
        Ok(report) => {
            if let Some(diagnostic) = &report.diagnostic {
                write_failure(&mut std::io::stderr(), diagnostic);
            }
            if report.trigger == Trigger::Interrupt {
                std::process::exit(report.status.code().into());
            }
            report.status.into()
        }
        Err(e) => report_error(&e),
    }
}

fn report_error(error: &PreviewError) -> ExitCode {
    match error {
        PreviewError::Launch(diagnostic) => write_failure(&mut std::io::stderr(), diagnostic),
        other => eprintln!("\n❌ {other}"),
    }
    ExitCode::FAILURE
}
