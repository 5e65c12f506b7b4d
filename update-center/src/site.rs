// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A single remote update site and its cached catalog.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slog::Logger;

use crate::config::UpdateCenterConfig;
use crate::envelope::{extract_jsonp, extract_post_message};
use crate::errors::RefreshError;
use crate::fetch::Fetcher;
use crate::runtime::PluginRuntime;
use crate::verify::ExpectedChecksums;
use crate::version::is_newer_than;

/// Suffix every canonical update-site URL ends with. The prefix before it is
/// the site's base URL.
pub const CATALOG_SUFFIX: &str = "update-center.json";

/// One plugin offered by an update site.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginEntry {
    #[serde(default)]
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "labels")]
    pub categories: Vec<String>,
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub sha512: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,
    /// Id of the site this entry came from. Not part of the published
    /// catalog; filled in when the catalog is loaded.
    #[serde(default, skip_deserializing)]
    pub source_id: String,
}

impl PluginEntry {
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn expected_checksums(&self) -> ExpectedChecksums {
        ExpectedChecksums {
            sha1: self.sha1.clone(),
            sha256: self.sha256.clone(),
            sha512: self.sha512.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PluginDependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

/// The core (host binary) release offered by an update site.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreEntry {
    pub version: String,
    pub url: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub sha512: Option<String>,
}

impl CoreEntry {
    pub fn expected_checksums(&self) -> ExpectedChecksums {
        ExpectedChecksums {
            sha1: self.sha1.clone(),
            sha256: self.sha256.clone(),
            sha512: self.sha512.clone(),
        }
    }
}

/// A parsed site catalog.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub connection_check_url: Option<String>,
    #[serde(default)]
    pub core: Option<CoreEntry>,
    #[serde(default)]
    pub plugins: std::collections::BTreeMap<String, PluginEntry>,
}

/// Verdict from the signature validator bound to a site.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SignatureVerdict {
    Ok,
    /// Verified, with something worth logging.
    Warning(String),
    Rejected(String),
}

/// Validates the detached signature carried inside a catalog document.
///
/// The verification scheme (certificate chains, digest recomputation) belongs
/// to the host; the update center only consumes the verdict.
pub trait SignatureValidator: std::fmt::Debug + Send + Sync {
    fn verify(&self, document: &serde_json::Value) -> SignatureVerdict;
}

/// Accepts every document. Used when the host has not bound a validator and
/// in tests; refusing to load any site at all would be worse than loading
/// unverified metadata in those contexts.
#[derive(Debug)]
pub struct AcceptAllValidator;

impl SignatureValidator for AcceptAllValidator {
    fn verify(&self, _document: &serde_json::Value) -> SignatureVerdict {
        SignatureVerdict::Ok
    }
}

/// Rejects every document with a fixed reason.
#[derive(Debug)]
pub struct RejectAllValidator {
    pub reason: String,
}

impl SignatureValidator for RejectAllValidator {
    fn verify(&self, _document: &serde_json::Value) -> SignatureVerdict {
        SignatureVerdict::Rejected(self.reason.clone())
    }
}

#[derive(Debug, Default)]
struct SiteState {
    /// Whether we have attempted to load the cached catalog from disk.
    cache_checked: bool,
    data: Option<Arc<SiteData>>,
    data_timestamp: Option<DateTime<Utc>>,
}

/// One remote update site.
///
/// Cheap to share via `Arc`; the catalog snapshot is swapped atomically
/// under a mutex with very small critical sections, so readers always see
/// either the previous complete catalog or the new one.
#[derive(Debug)]
pub struct UpdateSite {
    id: String,
    url: String,
    cache_file: Utf8PathBuf,
    validator: Arc<dyn SignatureValidator>,
    state: Mutex<SiteState>,
    log: Logger,
}

impl UpdateSite {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        config: &UpdateCenterConfig,
        validator: Arc<dyn SignatureValidator>,
        log: &Logger,
    ) -> Self {
        let id = id.into();
        let cache_file = config.updates_dir().join(format!("{id}.json"));
        let log = log.new(slog::o!("site" => id.clone()));
        Self {
            id,
            url: url.into(),
            cache_file,
            validator,
            state: Mutex::new(SiteState::default()),
            log,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Base URL of the site: the prefix before `update-center.json`, or
    /// `None` when the site URL does not have the expected shape.
    pub fn base_url(&self) -> Option<&str> {
        self.url.strip_suffix(CATALOG_SUFFIX)
    }

    /// URL of the per-downloadable metadata file served by this site.
    pub fn metadata_url_for(&self, downloadable_id: &str) -> Option<String> {
        let base = self.base_url()?;
        Some(format!("{base}updates/{downloadable_id}.json"))
    }

    /// Current catalog snapshot, lazily restored from the on-disk cache the
    /// first time it is asked for.
    pub fn data(&self) -> Option<Arc<SiteData>> {
        let mut state = self.state.lock().unwrap();
        if !state.cache_checked {
            state.cache_checked = true;
            match self.load_cache() {
                Ok(Some((data, timestamp))) => {
                    state.data = Some(Arc::new(data));
                    state.data_timestamp = Some(timestamp);
                }
                Ok(None) => {}
                Err(err) => {
                    slog::warn!(
                        self.log, "failed to load cached catalog";
                        "path" => self.cache_file.as_str(),
                        "err" => %err,
                    );
                }
            }
        }
        state.data.clone()
    }

    pub fn data_timestamp(&self) -> Option<DateTime<Utc>> {
        // Loading the cache sets the timestamp as a side effect.
        self.data();
        self.state.lock().unwrap().data_timestamp
    }

    /// URL probed to establish general internet connectivity, published in
    /// the catalog itself. Absent until the first successful refresh, and
    /// absent for sites that do not declare one.
    pub fn connection_check_url(&self) -> Option<String> {
        self.data().and_then(|data| data.connection_check_url.clone())
    }

    /// Run the bound signature validator against an arbitrary document
    /// served by this site.
    pub fn validate_document(
        &self,
        document: &serde_json::Value,
    ) -> SignatureVerdict {
        self.validator.verify(document)
    }

    /// Fetch and replace the catalog.
    pub async fn refresh(
        &self,
        fetcher: &Fetcher,
        config: &UpdateCenterConfig,
        verify_signature: bool,
    ) -> Result<(), RefreshError> {
        if config.never_update {
            return Err(RefreshError::Disabled);
        }

        let fetched = fetcher
            .fetch_text(&self.url, config.plugin_download_read_timeout)
            .await?;

        // Newer sites publish the postMessage HTML shape; older ones JSONP.
        let json_text = extract_post_message(&fetched.body)
            .or_else(|_| extract_jsonp(&fetched.body))?;

        let document: serde_json::Value = serde_json::from_str(json_text)
            .map_err(|source| RefreshError::MalformedJson {
                url: self.url.clone(),
                source,
            })?;

        if verify_signature {
            match self.validator.verify(&document) {
                SignatureVerdict::Ok => {}
                SignatureVerdict::Warning(message) => {
                    slog::warn!(
                        self.log, "catalog signature verified with warnings";
                        "warning" => message,
                    );
                }
                SignatureVerdict::Rejected(reason) => {
                    return Err(RefreshError::SignatureRejected {
                        id: self.id.clone(),
                        reason,
                    });
                }
            }
        }

        let mut data: SiteData = serde_json::from_value(document)
            .map_err(|source| RefreshError::MalformedJson {
                url: self.url.clone(),
                source,
            })?;
        for (name, entry) in data.plugins.iter_mut() {
            if entry.name.is_empty() {
                entry.name = name.clone();
            }
            entry.source_id = self.id.clone();
        }

        let timestamp = Utc::now();
        self.write_cache(json_text, timestamp).map_err(|source| {
            RefreshError::Cache { path: self.cache_file.clone(), source }
        })?;

        let mut state = self.state.lock().unwrap();
        state.cache_checked = true;
        state.data = Some(Arc::new(data));
        state.data_timestamp = Some(timestamp);
        drop(state);

        slog::info!(self.log, "catalog refreshed"; "url" => self.url.as_str());
        Ok(())
    }

    /// Drop the catalog and its cache; the next refresh behaves like a
    /// first load.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap();
        state.data = None;
        state.data_timestamp = None;
        state.cache_checked = true;
        drop(state);
        match std::fs::remove_file(&self.cache_file) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                slog::warn!(
                    self.log, "failed to remove cached catalog";
                    "path" => self.cache_file.as_str(),
                    "err" => %err,
                );
            }
        }
    }

    pub fn get_plugin(&self, name: &str) -> Option<PluginEntry> {
        self.data()?.plugins.get(name).cloned()
    }

    /// Plugins offered by this site that are not installed.
    pub fn get_availables(&self, runtime: &dyn PluginRuntime) -> Vec<PluginEntry> {
        let Some(data) = self.data() else { return Vec::new() };
        data.plugins
            .values()
            .filter(|entry| runtime.installed_plugin(&entry.name).is_none())
            .cloned()
            .collect()
    }

    /// Plugins installed at a strictly lower version than this site offers.
    pub fn get_updates(&self, runtime: &dyn PluginRuntime) -> Vec<PluginEntry> {
        let Some(data) = self.data() else { return Vec::new() };
        data.plugins
            .values()
            .filter(|entry| {
                runtime
                    .installed_plugin(&entry.name)
                    .is_some_and(|installed| {
                        is_newer_than(&entry.version, &installed.version)
                    })
            })
            .cloned()
            .collect()
    }

    fn load_cache(
        &self,
    ) -> std::io::Result<Option<(SiteData, DateTime<Utc>)>> {
        let text = match std::fs::read_to_string(&self.cache_file) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let mut data: SiteData = serde_json::from_str(&text)
            .map_err(|err| std::io::Error::other(err))?;
        for (name, entry) in data.plugins.iter_mut() {
            if entry.name.is_empty() {
                entry.name = name.clone();
            }
            entry.source_id = self.id.clone();
        }
        let modified = std::fs::metadata(&self.cache_file)?.modified()?;
        Ok(Some((data, DateTime::<Utc>::from(modified))))
    }

    fn write_cache(
        &self,
        json_text: &str,
        timestamp: DateTime<Utc>,
    ) -> std::io::Result<()> {
        if let Some(parent) = self.cache_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.cache_file, json_text)?;
        let file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.cache_file)?;
        file.set_times(
            std::fs::FileTimes::new()
                .set_modified(SystemTime::from(timestamp)),
        )?;
        Ok(())
    }
}

/// Convert an update-center URL into the URL probed for connectivity
/// checking: `?uctest` is appended, or `&uctest` when the URL already has a
/// query.
pub fn connection_check_probe_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        if url.contains('?') {
            format!("{url}&uctest")
        } else {
            format!("{url}?uctest")
        }
    } else {
        url.to_string()
    }
}
