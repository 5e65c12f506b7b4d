// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration related types used by update-centerd

use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;
use update_center::UpdateCenterConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Bearer token required on every endpoint. When unset the surface is
    /// open, for deployments where an upstream proxy authenticates.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Path of the live host binary, handed to the lifecycle.
    pub core_path: Utf8PathBuf,
    /// Ids of downloadable metadata files to keep refreshed.
    #[serde(default)]
    pub downloadables: Vec<String>,
    #[serde(default)]
    pub update_center: UpdateCenterConfig,
    pub log: ConfigLogging,
}

impl Config {
    /// Load a `Config` from the given TOML file
    ///
    /// This config object can be used to create an update-centerd server.
    pub fn from_file(path: &Utf8PathBuf) -> Result<Config, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::Io { path: path.clone(), source }
        })?;
        toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
