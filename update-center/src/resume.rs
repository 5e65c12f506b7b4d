// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Durable record of in-flight installations.
//!
//! While any installation is still non-successful, the name-to-status map is
//! written out so a restart in the middle of an install wave can be reported
//! and resumed. Once every install has succeeded the record is cleared.

use std::collections::BTreeMap;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use slog::Logger;

#[derive(Debug)]
pub struct ResumeStore {
    path: Utf8PathBuf,
    // Serializes writers; readers tolerate a missing file so they take no
    // lock.
    write_lock: Mutex<()>,
    log: Logger,
}

impl ResumeStore {
    pub fn new(path: Utf8PathBuf, log: &Logger) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
            log: log.new(slog::o!("component" => "resume store")),
        }
    }

    /// Persist the current install statuses.
    pub fn persist(&self, statuses: &BTreeMap<String, String>) {
        let _guard = self.write_lock.lock().unwrap();
        let result = (|| {
            let text = serde_json::to_string_pretty(statuses)?;
            let tmp = Utf8PathBuf::from(format!("{}.tmp", self.path));
            std::fs::write(&tmp, text)?;
            std::fs::rename(&tmp, &self.path)?;
            Ok::<_, std::io::Error>(())
        })();
        if let Err(err) = result {
            slog::warn!(
                self.log, "failed to persist install status";
                "path" => self.path.as_str(),
                "err" => %err,
            );
        }
    }

    /// Remove the persisted record, if any.
    pub fn clear(&self) {
        let _guard = self.write_lock.lock().unwrap();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                slog::warn!(
                    self.log, "failed to clear install status";
                    "path" => self.path.as_str(),
                    "err" => %err,
                );
            }
        }
    }

    /// The statuses persisted by the previous process, or an empty map.
    pub fn load(&self) -> BTreeMap<String, String> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
                slog::warn!(
                    self.log, "ignoring unparseable install status";
                    "path" => self.path.as_str(),
                    "err" => %err,
                );
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }
}
