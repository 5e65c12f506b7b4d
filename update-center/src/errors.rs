// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types shared across the update center.

use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::verify::ChecksumAlgorithm;

/// Errors raised while talking to an update site or downloading an artifact.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed{}", redirect_suffix(.final_url))]
    Network {
        url: String,
        /// Final URL after redirects, if it differs from the requested one.
        final_url: Option<String>,
        /// Whether retrying is plausible (timeouts, connection resets).
        transient: bool,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to validate the TLS certificate of {url}")]
    Certificate {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(
        "read timed out after {timeout:?} while downloading {url} \
         ({bytes_fetched} bytes fetched)"
    )]
    ReadTimeout { url: String, timeout: Duration, bytes_fetched: u64 },

    #[error(
        "inconsistent file length for {url}: expected {expected} bytes \
         but got {actual}"
    )]
    LengthMismatch { url: String, expected: u64, actual: u64 },

    #[error("unexpected HTTP status {status} from {url}")]
    Status { url: String, status: reqwest::StatusCode },

    #[error("error writing to {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn redirect_suffix(final_url: &Option<String>) -> String {
    match final_url {
        Some(url) => format!(" (redirected to: {url})"),
        None => String::new(),
    }
}

/// Errors extracting the JSON payload out of one of the two historical
/// transport envelopes.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum EnvelopeError {
    #[error("could not find a JSON object in the JSONP envelope")]
    MalformedJsonp,

    #[error("could not find a postMessage payload in the HTML envelope")]
    MalformedPostMessage,
}

/// Errors verifying the integrity of a downloaded file against the digests
/// published in site metadata.
#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error(
        "downloaded file {path} does not match expected {algorithm}, \
         expected '{expected}', actual '{actual}'"
    )]
    Mismatch {
        path: Utf8PathBuf,
        algorithm: ChecksumAlgorithm,
        expected: String,
        actual: String,
    },

    #[error("failed to compute SHA-1 of downloaded file {path}, refusing installation")]
    NotComputed { path: Utf8PathBuf },

    #[error("unable to confirm integrity of downloaded file {path}, refusing installation")]
    Unverifiable { path: Utf8PathBuf },
}

/// Errors refreshing one update site's metadata. These stay local to the
/// site that produced them; other sites and the installer queue are
/// unaffected.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("updates are administratively disabled")]
    Disabled,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("failed to parse update site metadata from {url}")]
    MalformedJson {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("update site '{id}' rejected: signature verification failed: {reason}")]
    SignatureRejected { id: String, reason: String },

    #[error("error writing metadata cache {path}")]
    Cache {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors terminating a single installer job. Recorded on the job as a
/// `Failure` status; never propagated to the worker loop.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error("plugin '{plugin}' does not declare a download URL")]
    NoDownloadUrl { plugin: String },

    #[error("download URL for '{plugin}' is not absolute: {url}")]
    RelativeUrl { plugin: String, url: String },

    #[error("plugin '{plugin}' is missing required dependencies: {}", .dependencies.join(", "))]
    MissingDependency { plugin: String, dependencies: Vec<String> },

    #[error("failed to rename {from} to {to}")]
    Replace {
        from: Utf8PathBuf,
        to: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no update site provides a core entry")]
    NoCoreSource,

    #[error("core backup does not exist, downgrade is not possible")]
    NoCoreBackup,

    #[error("core rewrite not supported in this running mode")]
    CoreRewriteUnsupported,

    #[error(transparent)]
    Runtime(#[from] anyhow::Error),
}

/// Errors loading or persisting the site registry document.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read site registry {path}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse site registry {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write site registry {path}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("duplicate update site id '{id}'")]
    DuplicateId { id: String },
}
