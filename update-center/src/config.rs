// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration for an [`UpdateCenter`](crate::UpdateCenter) instance.
//!
//! All of the knobs the original system scattered across process-wide system
//! properties live here as plain fields, constructed once and handed to the
//! update center. Environment variables override the defaults for operators
//! who cannot edit the config file.

use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// The update site URL baked in when no override is configured.
pub const BUILTIN_UPDATE_CENTER_URL: &str = "https://updates.example.io/";

/// Reserved id of the default update site.
pub const PREDEFINED_UPDATE_SITE_ID: &str = "default";

/// Reserved id of the synthetic site representing manually uploaded plugins.
/// Jobs owned by this site skip connection checks and checksum verification.
pub const ID_UPLOAD: &str = "_upload";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpdateCenterConfig {
    /// Directory under which the plugin dir, metadata cache, registry
    /// document, and resume store live.
    pub home: Utf8PathBuf,

    /// Disable all outbound metadata updates.
    pub never_update: bool,

    /// Verify catalog signatures on refresh. Disabling this is for test use
    /// only.
    pub signature_check: bool,

    /// Default refresh interval for downloadable metadata files.
    #[serde(with = "duration_millis")]
    pub default_interval: Duration,

    /// Base URL used to construct the default update site.
    pub update_center_url: String,

    /// Id of the default update site.
    pub default_site_id: String,

    /// Read timeout for plugin downloads, applied per chunk.
    #[serde(with = "duration_secs")]
    pub plugin_download_read_timeout: Duration,

    /// Escape hatch disabling the admin-only check on the HTTP surface.
    pub skip_permission_check: bool,

    /// Version string of the running controller, reported to update sites
    /// when fetching downloadable metadata.
    pub controller_version: String,
}

impl Default for UpdateCenterConfig {
    fn default() -> Self {
        Self {
            home: Utf8PathBuf::from("."),
            never_update: false,
            signature_check: true,
            default_interval: Duration::from_secs(24 * 60 * 60),
            update_center_url: BUILTIN_UPDATE_CENTER_URL.to_string(),
            default_site_id: PREDEFINED_UPDATE_SITE_ID.to_string(),
            plugin_download_read_timeout: Duration::from_secs(60),
            skip_permission_check: false,
            controller_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl UpdateCenterConfig {
    /// A config rooted at `home` with everything else defaulted.
    pub fn new(home: impl Into<Utf8PathBuf>) -> Self {
        Self { home: home.into(), ..Default::default() }
    }

    /// Apply environment-variable overrides on top of the current values.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = env_bool("UPDATE_CENTER_NEVER") {
            self.never_update = v;
        }
        if let Some(v) = env_bool("UPDATE_CENTER_NO_SIGNATURE_CHECK") {
            self.signature_check = !v;
        }
        if let Some(v) = env_parse::<u64>("UPDATE_CENTER_DEFAULT_INTERVAL_MS") {
            self.default_interval = Duration::from_millis(v);
        }
        if let Ok(v) = std::env::var("UPDATE_CENTER_URL") {
            if !v.is_empty() {
                self.update_center_url = v;
            }
        }
        if let Ok(v) = std::env::var("UPDATE_CENTER_DEFAULT_SITE_ID") {
            if !v.is_empty() {
                self.default_site_id = v;
            }
        }
        if let Some(v) =
            env_parse::<u64>("UPDATE_CENTER_PLUGIN_DOWNLOAD_READ_TIMEOUT_SECS")
        {
            self.plugin_download_read_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_bool("UPDATE_CENTER_SKIP_PERMISSION_CHECK") {
            self.skip_permission_check = v;
        }
        self
    }

    /// Directory holding active plugin files.
    pub fn plugin_dir(&self) -> Utf8PathBuf {
        self.home.join("plugins")
    }

    /// Directory holding cached downloadable metadata.
    pub fn updates_dir(&self) -> Utf8PathBuf {
        self.home.join("updates")
    }

    /// Path of the persisted site registry document.
    pub fn registry_path(&self) -> Utf8PathBuf {
        self.home.join("update-sites.toml")
    }

    /// Path of the install-resume store.
    pub fn resume_path(&self) -> Utf8PathBuf {
        self.home.join("install-state.json")
    }

    /// URL of the default update site's catalog.
    pub fn default_site_url(&self) -> String {
        format!("{}update-center.json", self.update_center_url)
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        d: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        d: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
