// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod config;
mod context;
mod http_entrypoints;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use dropshot::{ConfigDropshot, HandlerTaskMode, HttpServer};
use slog::Logger;
use update_center::config::UpdateCenterConfig;
use update_center::downloadables::Downloadable;
use update_center::fetch::Fetcher;
use update_center::registry::SiteRegistry;
use update_center::runtime::{Lifecycle, PluginRuntime};
use update_center::site::AcceptAllValidator;
use update_center::UpdateCenter;

pub use config::{Config, ConfigError};
pub(crate) use context::ServerContext;

/// How often the downloadable refresher looks for due metadata files.
const DOWNLOADABLE_CHECK_PERIOD: Duration = Duration::from_secs(60 * 60);

pub struct Server {
    http_server: HttpServer<ServerContext>,
    update_center: UpdateCenter,
}

impl Server {
    /// Run an instance of the update-centerd server.
    ///
    /// The embedding controller passes its live plugin runtime and process
    /// lifecycle; the standalone binary wires in development stand-ins.
    pub async fn start(
        config: Config,
        runtime: Arc<dyn PluginRuntime>,
        lifecycle: Arc<dyn Lifecycle>,
        log: Logger,
    ) -> Result<Self> {
        let uc_config = config.update_center.clone().apply_env_overrides();

        let registry = SiteRegistry::load(
            &uc_config,
            Arc::new(AcceptAllValidator),
            &log,
        )
        .context("failed to load the site registry")?;

        let update_center = UpdateCenter::new(
            uc_config.clone(),
            registry,
            runtime,
            lifecycle,
            &log,
        )
        .context("failed to construct the update center")?;

        spawn_downloadable_refresher(
            &config,
            uc_config,
            update_center.clone(),
            &log,
        )?;

        let dropshot_config = ConfigDropshot {
            bind_address: config.bind_address,
            default_request_body_max_bytes: 1024 * 1024,
            default_handler_task_mode: HandlerTaskMode::Detached,
            log_headers: vec![],
        };

        let http_server = {
            let ds_log = log.new(slog::o!("component" => "dropshot"));
            dropshot::ServerBuilder::new(
                http_entrypoints::api(),
                ServerContext {
                    update_center: update_center.clone(),
                    admin_token: config.admin_token.clone(),
                    log: log.clone(),
                },
                ds_log,
            )
            .config(dropshot_config)
            .start()
            .map_err(|err| anyhow!(err).context("initializing http server"))?
        };

        Ok(Self { http_server, update_center })
    }

    /// Close the running server, persisting in-flight install state so an
    /// interrupted wave can be reported after the next start.
    pub async fn close(self) -> Result<()> {
        self.update_center.persist_install_status();
        self.http_server
            .close()
            .await
            .map_err(|err| anyhow!("error closing http server: {err}"))
    }

    pub async fn wait_for_finish(self) -> Result<()> {
        match self.http_server.await {
            Ok(()) => Err(anyhow!("http server exited unexpectedly")),
            Err(err) => Err(anyhow!("running http server: {err}")),
        }
    }
}

/// Keep the configured downloadable metadata files refreshed on their
/// intervals.
fn spawn_downloadable_refresher(
    config: &Config,
    uc_config: UpdateCenterConfig,
    update_center: UpdateCenter,
    log: &Logger,
) -> Result<()> {
    if config.downloadables.is_empty() {
        return Ok(());
    }
    let log = log.new(slog::o!("component" => "downloadable refresher"));
    let downloadables: Vec<Downloadable> = config
        .downloadables
        .iter()
        .map(|id| Downloadable::new(id, &uc_config, &log))
        .collect();
    let fetcher = Fetcher::new(&log)?;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DOWNLOADABLE_CHECK_PERIOD);
        loop {
            ticker.tick().await;
            for downloadable in &downloadables {
                if !downloadable.is_due() {
                    continue;
                }
                if let Err(err) = downloadable
                    .update_now(
                        update_center.registry(),
                        &fetcher,
                        &uc_config,
                    )
                    .await
                {
                    slog::warn!(
                        log, "downloadable refresh failed";
                        "id" => downloadable.id(),
                        "err" => %err,
                    );
                }
            }
        }
    });
    Ok(())
}
