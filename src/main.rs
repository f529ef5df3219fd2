mod cli;

use anyhow::Context;
use clap::Parser;
use kvdb::{Config, Db, server::Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let mode = args.mode.unwrap_or(cli::Mode::Repl { aof: None });
    let config = mode.config()?;

    init_tracing(&config.log_level);

    let db = open_db(&config)?;
    match mode {
        cli::Mode::Serve { .. } => {
            Server::bind(&config.bind, db)
                .await
                .with_context(|| format!("failed to bind {}", config.bind))?
                .with_flush_interval(config.flush_interval())
                .run_until_ctrl_c()
                .await?;
        }
        cli::Mode::Repl { .. } => cli::run_repl(db),
    }

    Ok(())
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_db(config: &Config) -> anyhow::Result<Db> {
    if !config.appendonly {
        info!("persistence disabled, running in memory");
        return Ok(Db::in_memory());
    }

    let db = Db::open(&config.aof_path)
        .with_context(|| format!("failed to load log '{}'", config.aof_path.display()))?;
    info!(path = %config.aof_path.display(), keys = db.keyspace().snapshot().len(), "database ready");
    Ok(db)
}
