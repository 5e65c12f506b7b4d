// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The update center: discovery, verification, and installation of plugin
//! packages and core upgrades from remote update sites.
//!
//! The [`UpdateCenter`] owns a strictly serialized installer queue and a set
//! of concurrently refreshed [`site::UpdateSite`]s, persisted through the
//! [`registry::SiteRegistry`]. Loading plugins into the live process and
//! rewriting or restarting the host binary are delegated to the
//! [`runtime::PluginRuntime`] and [`runtime::Lifecycle`] collaborators.

mod center;
pub mod config;
pub mod digest;
pub mod downloadables;
pub mod envelope;
pub mod errors;
pub mod fetch;
pub mod jobs;
pub mod registry;
pub mod resume;
pub mod runtime;
pub mod site;
pub mod verify;
pub mod version;

pub use center::{
    InstallJobSummary, InstallStatusResponse, SiteSummary, StatusError,
    UpdateCenter,
};
pub use config::UpdateCenterConfig;
