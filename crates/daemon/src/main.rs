// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `mhd`: the module dispatch server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use mh_daemon::{env, logsink, modules, Supervisor, SupervisorConfig};

#[derive(Debug, Parser)]
#[command(name = "mhd", about = "TCP dispatch server for hardware-control modules")]
struct Args {
    /// Server name used in log output
    name: String,

    /// Path to the module config file
    config: PathBuf,

    /// Bind address
    #[arg(long, default_value = env::DEFAULT_ADDR)]
    addr: String,

    /// Listening port
    #[arg(long, default_value_t = env::DEFAULT_PORT)]
    port: u16,

    /// Default log filter for the stdout stream (MH_LOG overrides)
    #[arg(long, default_value = "debug")]
    log_level: String,

    /// Size-rotated JSON log file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log = logsink::init(&args.log_level, args.log_file.as_deref())?;

    let mut cfg = SupervisorConfig::new(args.name, args.config);
    cfg.addr = args.addr;
    cfg.port = args.port;

    let supervisor = Supervisor::bind(cfg, Arc::new(modules::builtin_registry())).await?;
    supervisor.run().await?;
    Ok(())
}
