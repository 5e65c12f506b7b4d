// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Proxy-aware HTTP fetching.
//!
//! A single shared `reqwest::Client` serves catalog fetches, connectivity
//! probes, and artifact downloads. The client follows redirects and honors
//! the process proxy environment; read timeouts are applied per chunk so a
//! stalled transfer fails after the configured quiet period rather than
//! capping total transfer time.

use std::time::Duration;

use camino::Utf8Path;
use futures::StreamExt;
use slog::Logger;

use crate::digest::{ComputedChecksums, DigestWriter};
use crate::errors::FetchError;

/// Timeout for establishing a TCP connection, separate from read timeouts.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone, Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    log: Logger,
}

/// A fully-read textual response.
#[derive(Clone, Debug)]
pub struct FetchedText {
    pub body: String,
    /// URL the response actually came from, after redirects.
    pub final_url: String,
}

/// A completed artifact download.
#[derive(Debug)]
pub struct Download {
    pub checksums: ComputedChecksums,
    pub bytes_written: u64,
    pub final_url: String,
}

impl Fetcher {
    pub fn new(log: &Logger) -> anyhow::Result<Self> {
        let log = log.new(slog::o!("component" => "fetcher"));
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| anyhow::anyhow!(err).context("failed to construct reqwest Client"))?;
        Ok(Self { client, log })
    }

    /// Fetch a URL and return its body as text.
    pub async fn fetch_text(
        &self,
        url: &str,
        read_timeout: Duration,
    ) -> Result<FetchedText, FetchError> {
        let response = self.send(url).await?;
        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status });
        }

        let body = tokio::time::timeout(read_timeout, response.text())
            .await
            .map_err(|_| FetchError::ReadTimeout {
                url: url.to_string(),
                timeout: read_timeout,
                bytes_fetched: 0,
            })?
            .map_err(|err| classify(url, Some(final_url.clone()), err))?;

        Ok(FetchedText { body, final_url })
    }

    /// Establish that a URL answers successfully. The body is discarded.
    pub async fn probe(&self, url: &str) -> Result<(), FetchError> {
        let response = self.send(url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status });
        }
        // Drain the body so keep-alive connections can be reused.
        _ = response.bytes().await;
        Ok(())
    }

    /// Download a URL to `dest`, computing digests as bytes arrive.
    ///
    /// `progress` is invoked after each chunk with the completed percentage
    /// when the server declared a content length. On any error the partially
    /// written `dest` is left for the caller to discard; it is never renamed
    /// into place by this function.
    pub async fn download(
        &self,
        url: &str,
        dest: &Utf8Path,
        read_timeout: Duration,
        mut progress: impl FnMut(Option<u8>),
    ) -> Result<Download, FetchError> {
        let response = self.send(url).await?;
        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url: url.to_string(), status });
        }
        let declared_length = response.content_length();

        slog::info!(
            self.log, "downloading";
            "url" => url,
            "dest" => dest.as_str(),
            "content_length" => ?declared_length,
        );

        let mut writer = DigestWriter::create(dest).await?;
        let mut stream = response.bytes_stream();

        loop {
            match tokio::time::timeout(read_timeout, stream.next()).await {
                Ok(Some(Ok(chunk))) => {
                    writer.write_chunk(&chunk).await?;
                    progress(percentage(writer.bytes_written(), declared_length));
                }
                Ok(Some(Err(err))) => {
                    return Err(classify(url, Some(final_url), err));
                }
                Ok(None) => break,
                Err(_) => {
                    return Err(FetchError::ReadTimeout {
                        url: url.to_string(),
                        timeout: read_timeout,
                        bytes_fetched: writer.bytes_written(),
                    });
                }
            }
        }

        let outcome = writer.finish(url, declared_length).await?;
        Ok(Download {
            checksums: outcome.checksums,
            bytes_written: outcome.bytes_written,
            final_url,
        })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|err| classify(url, None, err))
    }
}

fn percentage(written: u64, total: Option<u64>) -> Option<u8> {
    match total {
        Some(total) if total > 0 => Some((written * 100 / total).min(100) as u8),
        _ => None,
    }
}

fn classify(
    url: &str,
    final_url: Option<String>,
    error: reqwest::Error,
) -> FetchError {
    if chain_mentions(&error, &["certificate", "CertificateUnknown", "UnknownIssuer"]) {
        return FetchError::Certificate { url: url.to_string(), source: error };
    }
    let transient = error.is_timeout() || error.is_connect();
    // Only report the redirected URL when it differs from what was asked for.
    let final_url = final_url.filter(|f| f != url);
    FetchError::Network { url: url.to_string(), final_url, transient, source: error }
}

fn chain_mentions(error: &reqwest::Error, needles: &[&str]) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = source {
        let message = err.to_string();
        if needles.iter().any(|needle| message.contains(needle)) {
            return true;
        }
        source = err.source();
    }
    false
}

impl FetchError {
    /// True when the failure is a name-resolution problem, which gets a
    /// distinct operator-facing hint.
    pub fn is_unknown_host(&self) -> bool {
        let (FetchError::Network { source, .. }
        | FetchError::Certificate { source, .. }) = self
        else {
            return false;
        };
        chain_mentions(
            source,
            &["dns error", "failed to lookup address", "Name or service not known"],
        )
    }
}
