// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lenient ordering for plugin and core version strings.
//!
//! Plugin versions are dotted numerics with occasional textual tails
//! (`1.2`, `2.303.1`, `4.0-beta-2`) and are not semver. Comparison is
//! token-wise: numeric tokens by value, textual tokens lexicographically,
//! and a numeric token outranks a textual one so that `1.0` sorts after
//! `1.0-beta`.

use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Debug, Eq, PartialEq)]
enum Token {
    Num(u64),
    Text(String),
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Token::Num(a), Token::Num(b)) => a.cmp(b),
            (Token::Text(a), Token::Text(b)) => a.cmp(b),
            (Token::Num(_), Token::Text(_)) => Ordering::Greater,
            (Token::Text(_), Token::Num(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Debug)]
pub struct VersionNumber {
    raw: String,
    tokens: Vec<Token>,
}

impl VersionNumber {
    pub fn new(raw: &str) -> Self {
        let tokens = raw
            .split(['.', '-', '_'])
            .filter(|t| !t.is_empty())
            .map(|t| match t.parse::<u64>() {
                Ok(n) => Token::Num(n),
                Err(_) => Token::Text(t.to_ascii_lowercase()),
            })
            .collect();
        Self { raw: raw.to_string(), tokens }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Ord for VersionNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.tokens.len().max(other.tokens.len());
        for i in 0..len {
            // A missing token counts as zero: "1.0" == "1.0.0", and
            // "1.0" > "1.0-beta".
            let a = self.tokens.get(i).cloned().unwrap_or(Token::Num(0));
            let b = other.tokens.get(i).cloned().unwrap_or(Token::Num(0));
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for VersionNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionNumber {}

/// True when `candidate` is strictly newer than `installed`.
pub fn is_newer_than(candidate: &str, installed: &str) -> bool {
    VersionNumber::new(candidate) > VersionNumber::new(installed)
}
