// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodically refreshed metadata files.
//!
//! Beyond the catalog itself, update sites serve auxiliary JSON documents
//! under `updates/` (tool installers, version mappings). Each is cached at
//! `<home>/updates/<id>` with its mtime tracking the fetch time, and is due
//! for refresh once `mtime + interval` has passed.

use std::time::{Duration, SystemTime};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use slog::Logger;

use crate::config::UpdateCenterConfig;
use crate::envelope::extract_post_message;
use crate::errors::RefreshError;
use crate::fetch::Fetcher;
use crate::registry::SiteRegistry;
use crate::site::SignatureVerdict;

#[derive(Debug)]
pub struct Downloadable {
    id: String,
    interval: Duration,
    data_file: Utf8PathBuf,
    log: Logger,
}

impl Downloadable {
    pub fn new(
        id: impl Into<String>,
        config: &UpdateCenterConfig,
        log: &Logger,
    ) -> Self {
        let id = id.into();
        let data_file = config.updates_dir().join(&id);
        let log = log.new(slog::o!("downloadable" => id.clone()));
        Self { id, interval: config.default_interval, data_file, log }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data_file(&self) -> &Utf8PathBuf {
        &self.data_file
    }

    /// The cached document, or `None` when it has never been fetched. An
    /// unparseable cache file is deleted so it cannot fail repeatedly.
    pub fn data(&self) -> Option<serde_json::Value> {
        let text = std::fs::read_to_string(&self.data_file).ok()?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(err) => {
                slog::warn!(
                    self.log, "deleting unparseable metadata cache";
                    "err" => %err,
                );
                _ = std::fs::remove_file(&self.data_file);
                None
            }
        }
    }

    /// When the next refresh is due. A missing cache file is due
    /// immediately.
    pub fn due(&self) -> DateTime<Utc> {
        let modified = std::fs::metadata(&self.data_file)
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        DateTime::<Utc>::from(modified)
            + chrono::Duration::from_std(self.interval)
                .unwrap_or_else(|_| chrono::Duration::days(1))
    }

    pub fn is_due(&self) -> bool {
        self.due() <= Utc::now()
    }

    /// Fetch this downloadable from every registered site, keeping the first
    /// result that parses and passes the signature check.
    pub async fn update_now(
        &self,
        registry: &SiteRegistry,
        fetcher: &Fetcher,
        config: &UpdateCenterConfig,
    ) -> Result<bool, RefreshError> {
        if config.never_update {
            return Err(RefreshError::Disabled);
        }

        for site in registry.sites() {
            let Some(metadata_url) = site.metadata_url_for(&self.id) else {
                slog::warn!(
                    self.log,
                    "update site '{}' does not look like an update center",
                    site.id(),
                );
                continue;
            };
            let url = format!(
                "{metadata_url}.html?id={}&version={}",
                self.id, config.controller_version,
            );

            let fetched = match fetcher
                .fetch_text(&url, config.plugin_download_read_timeout)
                .await
            {
                Ok(fetched) => fetched,
                Err(err) => {
                    slog::debug!(
                        self.log, "could not load metadata";
                        "url" => url.as_str(),
                        "err" => %err,
                    );
                    continue;
                }
            };

            let json_text = match extract_post_message(&fetched.body) {
                Ok(text) => text,
                Err(err) => {
                    slog::debug!(
                        self.log, "malformed metadata envelope";
                        "url" => url.as_str(),
                        "err" => %err,
                    );
                    continue;
                }
            };

            let document: serde_json::Value =
                match serde_json::from_str(json_text) {
                    Ok(document) => document,
                    Err(err) => {
                        slog::debug!(
                            self.log, "malformed metadata";
                            "url" => url.as_str(),
                            "err" => %err,
                        );
                        continue;
                    }
                };

            if config.signature_check {
                match site.validate_document(&document) {
                    SignatureVerdict::Ok => {}
                    SignatureVerdict::Warning(warning) => {
                        slog::warn!(
                            self.log, "metadata signature warning";
                            "warning" => warning,
                        );
                    }
                    SignatureVerdict::Rejected(reason) => {
                        slog::warn!(
                            self.log, "metadata signature check failed";
                            "site" => site.id(),
                            "reason" => reason,
                        );
                        continue;
                    }
                }
            }

            self.write_data(json_text, Utc::now()).map_err(|source| {
                RefreshError::Cache {
                    path: self.data_file.clone(),
                    source,
                }
            })?;
            slog::info!(self.log, "obtained the updated data file");
            return Ok(true);
        }

        slog::warn!(self.log, "no update site served this downloadable");
        Ok(false)
    }

    fn write_data(
        &self,
        json_text: &str,
        timestamp: DateTime<Utc>,
    ) -> std::io::Result<()> {
        if let Some(parent) = self.data_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.data_file, json_text)?;
        let file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.data_file)?;
        file.set_times(
            std::fs::FileTimes::new()
                .set_modified(SystemTime::from(timestamp)),
        )?;
        Ok(())
    }
}
