// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Streaming multi-digest writer.
//!
//! Downloads are written to a temporary file while SHA-1, SHA-256, and
//! SHA-512 are computed over the same bytes in a single pass. The published
//! site metadata carries base64-encoded digests, so that is what we expose.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::errors::FetchError;

/// Base64-encoded digests of a downloaded file.
///
/// All three algorithms are computed unconditionally here; the fields stay
/// optional because the verification policy treats "not computed" as a
/// first-class state and status reporting carries whatever was produced.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ComputedChecksums {
    pub sha1: Option<String>,
    pub sha256: Option<String>,
    pub sha512: Option<String>,
}

pub(crate) struct DigestWriter {
    file: File,
    path: Utf8PathBuf,
    sha1: Sha1,
    sha256: Sha256,
    sha512: Sha512,
    bytes_written: u64,
}

#[derive(Debug)]
pub(crate) struct DigestOutcome {
    pub checksums: ComputedChecksums,
    pub bytes_written: u64,
}

impl DigestWriter {
    pub(crate) async fn create(path: &Utf8Path) -> Result<Self, FetchError> {
        let file = File::create(path).await.map_err(|source| {
            FetchError::Io { path: path.to_owned(), source }
        })?;
        Ok(Self {
            file,
            path: path.to_owned(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            sha512: Sha512::new(),
            bytes_written: 0,
        })
    }

    pub(crate) async fn write_chunk(
        &mut self,
        chunk: &[u8],
    ) -> Result<(), FetchError> {
        self.file.write_all(chunk).await.map_err(|source| {
            FetchError::Io { path: self.path.clone(), source }
        })?;
        self.sha1.update(chunk);
        self.sha256.update(chunk);
        self.sha512.update(chunk);
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush the file and return the digests. If the server declared a
    /// content length, it must match the number of bytes written.
    pub(crate) async fn finish(
        mut self,
        url: &str,
        declared_length: Option<u64>,
    ) -> Result<DigestOutcome, FetchError> {
        self.file.flush().await.map_err(|source| FetchError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.file.sync_all().await.map_err(|source| FetchError::Io {
            path: self.path.clone(),
            source,
        })?;

        if let Some(expected) = declared_length {
            if expected != self.bytes_written {
                return Err(FetchError::LengthMismatch {
                    url: url.to_string(),
                    expected,
                    actual: self.bytes_written,
                });
            }
        }

        let checksums = ComputedChecksums {
            sha1: Some(BASE64.encode(self.sha1.finalize())),
            sha256: Some(BASE64.encode(self.sha256.finalize())),
            sha512: Some(BASE64.encode(self.sha512.finalize())),
        };
        Ok(DigestOutcome { checksums, bytes_written: self.bytes_written })
    }
}
