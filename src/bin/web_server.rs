use std::path::PathBuf;

use clap::Parser;
use lms_server::{
    account::bootstrap_admin,
    config::Config,
    db,
    server::{AppState, build_app, serve},
    utils::init_log,
};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file, defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Path to database file
    #[arg(short, long)]
    database: Option<PathBuf>,
    #[arg(short = 'H', long)]
    host: Option<String>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Directory for log files
    #[arg(short, long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(database) = args.database {
        config.database = database;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(log_dir) = args.log_dir {
        config.log_dir = Some(log_dir);
    }

    let _guard = init_log(config.log_dir.clone())?;
    let database = db::connect(&config.database).await?;
    bootstrap_admin(&database).await?;
    let app = build_app(AppState::new(database, config.clone())).await?;
    serve(app, &config).await
}
