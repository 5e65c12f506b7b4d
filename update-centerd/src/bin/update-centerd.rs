// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable for update-centerd: the update-center status daemon

use std::sync::Arc;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use update_centerd::{Config, Server};
use update_center::runtime::{FileLifecycle, InMemoryPluginRuntime};

#[derive(Debug, Parser)]
#[command(version)]
struct UpdateCenterdApp {
    #[clap(subcommand)]
    subcommand: UpdateCenterdCommand,
}

#[derive(Debug, Subcommand)]
enum UpdateCenterdCommand {
    /// Start an update-centerd server.
    Run {
        #[clap(long, action)]
        config_file_path: Utf8PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let app = UpdateCenterdApp::parse();
    match app.subcommand {
        UpdateCenterdCommand::Run { config_file_path } => {
            let config = Config::from_file(&config_file_path)
                .with_context(|| {
                    format!("failed to load config {config_file_path}")
                })?;

            let log = config
                .log
                .to_logger("update-centerd")
                .context("failed to set up logging")?;

            // The standalone daemon has no live controller to talk to, so it
            // runs with an in-memory plugin runtime and a file-backed
            // lifecycle. An embedding controller calls `Server::start` with
            // its own implementations instead.
            let runtime = Arc::new(InMemoryPluginRuntime::new(
                config.update_center.plugin_dir(),
            ));
            let lifecycle =
                Arc::new(FileLifecycle::new(config.core_path.clone()));

            let server = Server::start(config, runtime, lifecycle, log)
                .await
                .context("failed to start server")?;
            server.wait_for_finish().await
        }
    }
}
