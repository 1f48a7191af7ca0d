use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "exposure-cli",
    version,
    about = "Inspect and drive the exposure-notification core"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Persisted state inspection
    State {
        #[command(subcommand)]
        action: commands::state::StateAction,
    },
    /// Feed detection outcomes through the core
    Detect {
        #[command(subcommand)]
        action: commands::detect::DetectAction,
    },
    /// App lifecycle triggers
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
    /// User decisions on the current status
    Event {
        #[command(subcommand)]
        action: commands::event::EventAction,
    },
    /// One-time codes and diagnosis key upload
    Otp {
        #[command(subcommand)]
        action: commands::otp::OtpAction,
    },
    /// Dummy upload traffic
    Dummy {
        #[command(subcommand)]
        action: commands::dummy::DummyAction,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("EXPOSURE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Config { action } => commands::config::run(action),
        Commands::State { action } => commands::state::run(action).await,
        Commands::Detect { action } => commands::detect::run(action).await,
        Commands::Session { action } => commands::session::run(action).await,
        Commands::Event { action } => commands::event::run(action).await,
        Commands::Otp { action } => commands::otp::run(action).await,
        Commands::Dummy { action } => commands::dummy::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
