use clap::{Parser, Subcommand};
use log::{error, info};
use ovpn_monitor::configuration::{Config, ConfigArgs};
use ovpn_monitor::controller::Controller;

#[derive(Parser)]
#[command(name = "ovpn-monitor")]
#[command(version)]
#[command(about = "Tracks OpenVPN client sessions from the server's status file")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reconciliation cycle and print the clients online
    Once,
    /// Run a cycle every poll interval until interrupted
    Poll,
    /// Serve the HTTP API with a background poller
    Serve,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = Args::parse();

    let config = match Config::resolve(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration loaded, status file {}", config.status_log.display());

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to prepare data files: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Once => {
            let output = controller
                .run_once()
                .and_then(|clients| Ok(serde_json::to_string_pretty(&clients)?));
            match output {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    error!("{}", e);
                    std::process::exit(1);
                }
            }
        }
        Command::Poll => controller.poll(shutdown_signal()).await,
        Command::Serve => controller.serve(shutdown_signal()).await,
    }
}
