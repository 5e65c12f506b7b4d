// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The ordered, persistent collection of update sites.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slog::Logger;

use crate::config::UpdateCenterConfig;
use crate::errors::{RefreshError, RegistryError};
use crate::fetch::Fetcher;
use crate::runtime::PluginRuntime;
use crate::site::{PluginEntry, SignatureValidator, UpdateSite};
use crate::version::VersionNumber;

/// On-disk shape of the registry document.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedRegistry {
    version: u32,
    #[serde(default, rename = "site")]
    sites: Vec<PersistedSite>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSite {
    /// Entries written before sites had ids lack this field; they are the
    /// legacy default and are dropped on load.
    #[serde(default)]
    id: Option<String>,
    url: String,
}

const REGISTRY_VERSION: u32 = 1;

/// Outcome of refreshing one site during [`SiteRegistry::update_all_sites`].
#[derive(Debug)]
pub struct SiteRefreshResult {
    pub site_id: String,
    pub result: Result<(), RefreshError>,
}

#[derive(Debug)]
pub struct SiteRegistry {
    config: UpdateCenterConfig,
    validator: Arc<dyn SignatureValidator>,
    sites: Mutex<Vec<Arc<UpdateSite>>>,
    log: Logger,
}

impl SiteRegistry {
    /// Load the registry from disk, dropping legacy entries and ensuring the
    /// default site is present.
    pub fn load(
        config: &UpdateCenterConfig,
        validator: Arc<dyn SignatureValidator>,
        log: &Logger,
    ) -> Result<Self, RegistryError> {
        let log = log.new(slog::o!("component" => "site registry"));
        let path = config.registry_path();

        let mut persisted = match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str::<PersistedRegistry>(&text)
                .map_err(|source| RegistryError::Parse {
                    path: path.clone(),
                    source,
                })?
                .sites,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Vec::new()
            }
            Err(source) => {
                return Err(RegistryError::Read { path, source });
            }
        };

        let before = persisted.len();
        persisted.retain(|entry| entry.id.is_some());
        if persisted.len() != before {
            slog::info!(
                log,
                "dropped {} legacy update site entr{}",
                before - persisted.len(),
                if before - persisted.len() == 1 { "y" } else { "ies" },
            );
        }

        let mut sites = Vec::with_capacity(persisted.len() + 1);
        for entry in persisted {
            let id = entry.id.unwrap();
            sites.push(Arc::new(UpdateSite::new(
                id,
                entry.url,
                config,
                Arc::clone(&validator),
                &log,
            )));
        }

        let registry = Self {
            config: config.clone(),
            validator,
            sites: Mutex::new(sites),
            log,
        };

        let has_default = registry
            .sites
            .lock()
            .unwrap()
            .iter()
            .any(|site| site.id() == config.default_site_id);
        if !has_default {
            registry
                .sites
                .lock()
                .unwrap()
                .push(Arc::new(registry.new_default_site()));
            registry.save()?;
        }

        Ok(registry)
    }

    fn new_default_site(&self) -> UpdateSite {
        UpdateSite::new(
            &self.config.default_site_id,
            self.config.default_site_url(),
            &self.config,
            Arc::clone(&self.validator),
            &self.log,
        )
    }

    /// Snapshot of the ordered site list.
    pub fn sites(&self) -> Vec<Arc<UpdateSite>> {
        self.sites.lock().unwrap().clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<UpdateSite>> {
        self.sites
            .lock()
            .unwrap()
            .iter()
            .find(|site| site.id() == id)
            .cloned()
    }

    /// Append a site and persist the registry.
    pub fn add_site(
        &self,
        id: &str,
        url: &str,
    ) -> Result<Arc<UpdateSite>, RegistryError> {
        let site = {
            let mut sites = self.sites.lock().unwrap();
            if sites.iter().any(|site| site.id() == id) {
                return Err(RegistryError::DuplicateId { id: id.to_string() });
            }
            let site = Arc::new(UpdateSite::new(
                id,
                url,
                &self.config,
                Arc::clone(&self.validator),
                &self.log,
            ));
            sites.push(Arc::clone(&site));
            site
        };
        self.save()?;
        Ok(site)
    }

    /// Remove a site by id and persist the registry. Returns whether a site
    /// was removed.
    pub fn remove_site(&self, id: &str) -> Result<bool, RegistryError> {
        let removed = {
            let mut sites = self.sites.lock().unwrap();
            let before = sites.len();
            sites.retain(|site| site.id() != id);
            sites.len() != before
        };
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    fn save(&self) -> Result<(), RegistryError> {
        let path = self.config.registry_path();
        let persisted = PersistedRegistry {
            version: REGISTRY_VERSION,
            sites: self
                .sites
                .lock()
                .unwrap()
                .iter()
                .map(|site| PersistedSite {
                    id: Some(site.id().to_string()),
                    url: site.url().to_string(),
                })
                .collect(),
        };
        let text = toml::to_string_pretty(&persisted)
            .expect("registry document always serializes");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| {
                RegistryError::Write { path: path.clone(), source }
            })?;
        }
        std::fs::write(&path, text)
            .map_err(|source| RegistryError::Write { path, source })
    }

    /// The first site whose catalog carries a core entry.
    pub fn core_source(&self) -> Option<Arc<UpdateSite>> {
        self.sites()
            .into_iter()
            .find(|site| site.data().is_some_and(|data| data.core.is_some()))
    }

    /// The named plugin from the first site to offer it.
    pub fn plugin(&self, name: &str) -> Option<PluginEntry> {
        self.sites().into_iter().find_map(|site| site.get_plugin(name))
    }

    /// Like [`SiteRegistry::plugin`], but skipping sites whose offering is
    /// older than `min_version`.
    pub fn plugin_with_min_version(
        &self,
        name: &str,
        min_version: &str,
    ) -> Option<PluginEntry> {
        let min = VersionNumber::new(min_version);
        self.sites().into_iter().find_map(|site| {
            site.get_plugin(name)
                .filter(|entry| VersionNumber::new(&entry.version) >= min)
        })
    }

    /// Newest catalog timestamp across all sites.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.sites().iter().filter_map(|site| site.data_timestamp()).max()
    }

    /// Merged "available plugins" view across all sites.
    pub fn availables(&self, runtime: &dyn PluginRuntime) -> Vec<PluginEntry> {
        merge_entries(
            self.sites().iter().map(|site| site.get_availables(runtime)),
        )
    }

    /// Merged "updates" view across all sites.
    pub fn updates(&self, runtime: &dyn PluginRuntime) -> Vec<PluginEntry> {
        merge_entries(self.sites().iter().map(|site| site.get_updates(runtime)))
    }

    /// Refresh every site concurrently, returning one result per site.
    pub async fn update_all_sites(
        &self,
        fetcher: &Fetcher,
        verify_signature: bool,
    ) -> Vec<SiteRefreshResult> {
        let tasks = self.sites().into_iter().map(|site| {
            let fetcher = fetcher.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                let result =
                    site.refresh(&fetcher, &config, verify_signature).await;
                SiteRefreshResult {
                    site_id: site.id().to_string(),
                    result,
                }
            })
        });

        let mut results = Vec::new();
        for task in tasks.collect::<Vec<_>>() {
            // Refresh tasks do not panic; a cancelled task would mean the
            // runtime is shutting down.
            if let Ok(result) = task.await {
                if let Err(err) = &result.result {
                    slog::warn!(
                        self.log, "site refresh failed";
                        "site" => result.site_id.as_str(),
                        "err" => %display_error_chain::DisplayErrorChain::new(err),
                    );
                }
                results.push(result);
            }
        }
        results
    }

    /// Invalidate every site's catalog.
    pub fn invalidate_all(&self) {
        for site in self.sites() {
            site.invalidate();
        }
    }
}

/// Collapse per-site plugin lists into a single view.
///
/// The first site offering a name wins the primary slot; a later site
/// contributing a *different* version of the same name is retained under the
/// synthetic key `name:version` so alternate versions stay visible without
/// duplicating rows.
fn merge_entries(
    per_site: impl Iterator<Item = Vec<PluginEntry>>,
) -> Vec<PluginEntry> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, PluginEntry> = HashMap::new();

    for entries in per_site {
        for entry in entries {
            match merged.get(&entry.name) {
                None => {
                    order.push(entry.name.clone());
                    merged.insert(entry.name.clone(), entry);
                }
                Some(existing) if existing.version != entry.version => {
                    let alt_key = format!("{}:{}", entry.name, entry.version);
                    if !merged.contains_key(&alt_key) {
                        order.push(alt_key.clone());
                        merged.insert(alt_key, entry);
                    }
                }
                Some(_) => {}
            }
        }
    }

    order
        .into_iter()
        .map(|key| merged.remove(&key).expect("every ordered key was inserted"))
        .collect()
}
