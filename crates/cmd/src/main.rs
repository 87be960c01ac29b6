// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use snafu::{ResultExt, Whatever};

mod build_info;
use pmq_app::AppConfig;
use pmq_common_telemetry::{init_global_logging, set_panic_hook};
use tracing::info;

#[derive(Debug, Parser)]
#[clap(
name = "pmq",
about= "Persistent point-to-multi-consumer message queue",
author = build_info::AUTHOR,
version = build_info::FULL_VERSION)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Server(ServerArgs),
}

#[derive(Debug, Clone, Args)]
#[command(flatten_help = true)]
#[command(long_about = r"

Starts the pmq broker and runs it until Ctrl-C or SIGTERM.
Settings come from built-in defaults, then the --config file, then
PMQ__<SECTION>__<KEY> environment variables.
Examples:

pmq server
pmq server --config /etc/pmq/pmq.toml
PMQ__SERVER__SEGMENTS_ROOT=/var/lib/pmq/segments pmq server

")]
struct ServerArgs {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl ServerArgs {
    async fn run(&self) -> Result<(), Whatever> {
        let config = AppConfig::load(self.config.as_deref())
            .whatever_context("Failed to load configuration")?;

        let _guards = init_global_logging("pmq", &config.logging);
        set_panic_hook();
        info!(version = build_info::FULL_VERSION, "starting pmq");

        let app = config.open()?;
        app.run().await
    }
}

#[tokio::main]
async fn main() -> Result<(), Whatever> {
    let cli = Cli::parse();
    match cli.commands {
        Commands::Server(sa) => sa.run().await,
    }
}
