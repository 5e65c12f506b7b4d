// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User provided dropshot server context

use update_center::UpdateCenter;

pub struct ServerContext {
    pub update_center: UpdateCenter,
    pub admin_token: Option<String>,
    pub log: slog::Logger,
}
