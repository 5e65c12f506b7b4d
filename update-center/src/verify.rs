// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Layered checksum verification for downloaded artifacts.
//!
//! The strongest algorithm the site published wins: SHA-512 first, then
//! SHA-256, then SHA-1. An explicit mismatch at any level is fatal; the
//! policy only falls through when an algorithm was not published or could
//! not be computed.

use std::fmt;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use slog::Logger;

use crate::digest::ComputedChecksums;
use crate::errors::ChecksumError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChecksumAlgorithm::Sha1 => "SHA-1",
            ChecksumAlgorithm::Sha256 => "SHA-256",
            ChecksumAlgorithm::Sha512 => "SHA-512",
        };
        f.write_str(name)
    }
}

/// The digests a site published for one downloadable artifact.
#[derive(Clone, Debug, Default)]
pub struct ExpectedChecksums {
    pub sha1: Option<String>,
    pub sha256: Option<String>,
    pub sha512: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum VerificationResult {
    Pass,
    NotProvided,
    NotComputed,
    Fail,
}

fn verify_one(
    expected: Option<&str>,
    actual: Option<&str>,
    case_sensitive: bool,
) -> VerificationResult {
    let Some(expected) = expected else {
        return VerificationResult::NotProvided;
    };
    let Some(actual) = actual else {
        return VerificationResult::NotComputed;
    };
    let matches = if case_sensitive {
        expected == actual
    } else {
        expected.eq_ignore_ascii_case(actual)
    };
    if matches { VerificationResult::Pass } else { VerificationResult::Fail }
}

fn mismatch(
    algorithm: ChecksumAlgorithm,
    expected: Option<&str>,
    actual: Option<&str>,
    path: &Utf8Path,
) -> ChecksumError {
    ChecksumError::Mismatch {
        path: path.to_owned(),
        algorithm,
        expected: expected.unwrap_or_default().to_string(),
        actual: actual.unwrap_or_default().to_string(),
    }
}

/// Apply the layered verification policy to a downloaded file.
///
/// SHA-512 and SHA-256 comparisons are case-insensitive; SHA-1 comparison is
/// case-sensitive, preserving long-observed behavior.
pub fn verify_checksums(
    log: &Logger,
    expected: &ExpectedChecksums,
    computed: &ComputedChecksums,
    path: &Utf8Path,
) -> Result<(), ChecksumError> {
    let result512 = verify_one(
        expected.sha512.as_deref(),
        computed.sha512.as_deref(),
        false,
    );
    match result512 {
        VerificationResult::Pass => return Ok(()),
        VerificationResult::Fail => {
            return Err(mismatch(
                ChecksumAlgorithm::Sha512,
                expected.sha512.as_deref(),
                computed.sha512.as_deref(),
                path,
            ));
        }
        VerificationResult::NotComputed => {
            slog::warn!(
                log,
                "could not verify {path} using SHA-512 since it was not \
                 computed, falling back to weaker algorithms"
            );
        }
        VerificationResult::NotProvided => {}
    }

    let result256 = verify_one(
        expected.sha256.as_deref(),
        computed.sha256.as_deref(),
        false,
    );
    match result256 {
        VerificationResult::Pass => return Ok(()),
        VerificationResult::Fail => {
            return Err(mismatch(
                ChecksumAlgorithm::Sha256,
                expected.sha256.as_deref(),
                computed.sha256.as_deref(),
                path,
            ));
        }
        VerificationResult::NotComputed | VerificationResult::NotProvided => {}
    }

    if result512 == VerificationResult::NotProvided
        && result256 == VerificationResult::NotProvided
    {
        slog::info!(
            log,
            "update site published neither SHA-512 nor SHA-256 for {path}, \
             falling back to SHA-1"
        );
    }

    match verify_one(expected.sha1.as_deref(), computed.sha1.as_deref(), true) {
        VerificationResult::Pass => Ok(()),
        VerificationResult::Fail => Err(mismatch(
            ChecksumAlgorithm::Sha1,
            expected.sha1.as_deref(),
            computed.sha1.as_deref(),
            path,
        )),
        VerificationResult::NotComputed => {
            Err(ChecksumError::NotComputed { path: path.to_owned() })
        }
        VerificationResult::NotProvided => {
            Err(ChecksumError::Unverifiable { path: path.to_owned() })
        }
    }
}
