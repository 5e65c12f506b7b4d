// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP entrypoint functions for update-centerd

use std::collections::BTreeMap;

use dropshot::endpoint;
use dropshot::ApiDescription;
use dropshot::ClientErrorStatusCode;
use dropshot::HttpError;
use dropshot::HttpResponseOk;
use dropshot::HttpResponseUpdatedNoContent;
use dropshot::Query;
use dropshot::RequestContext;
use schemars::JsonSchema;
use serde::Deserialize;
use update_center::errors::JobError;
use update_center::jobs::ConnectionStates;
use update_center::{InstallStatusResponse, SiteSummary, StatusError};
use uuid::Uuid;

use crate::ServerContext;

type UpdateCenterdApiDescription = ApiDescription<ServerContext>;

/// Return a description of the update-centerd api for use in generating an
/// OpenAPI spec
pub fn api() -> UpdateCenterdApiDescription {
    fn register_endpoints(
        api: &mut UpdateCenterdApiDescription,
    ) -> Result<(), dropshot::ApiDescriptionRegisterError> {
        api.register(get_connection_status)?;
        api.register(get_install_status)?;
        api.register(get_incomplete_install_status)?;
        api.register(get_sites)?;
        api.register(post_invalidate_data)?;
        api.register(post_safe_restart)?;
        api.register(post_cancel_restart)?;
        api.register(post_upgrade)?;
        api.register(post_downgrade)?;
        Ok(())
    }

    let mut api = UpdateCenterdApiDescription::new();
    if let Err(err) = register_endpoints(&mut api) {
        panic!("failed to register entrypoints: {}", err);
    }
    api
}

/// Every endpoint is administrator-only; requests must carry the configured
/// bearer token. Permission failures surface as HTTP errors and never create
/// jobs.
fn require_admin(
    rqctx: &RequestContext<ServerContext>,
) -> Result<(), HttpError> {
    let ctx = rqctx.context();
    if ctx.update_center.config().skip_permission_check {
        return Ok(());
    }
    let Some(token) = &ctx.admin_token else {
        return Ok(());
    };
    let expected = format!("Bearer {token}");
    let presented = rqctx
        .request
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok());
    if presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(HttpError::for_client_error(
            None,
            ClientErrorStatusCode::FORBIDDEN,
            "administrator access required".to_string(),
        ))
    }
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct ConnectionStatusParams {
    /// Site to report on; the default site when omitted.
    pub site_id: Option<String>,
}

/// Get the current connection status of one update site.
#[endpoint {
    method = GET,
    path = "/connection-status",
}]
async fn get_connection_status(
    rqctx: RequestContext<ServerContext>,
    params: Query<ConnectionStatusParams>,
) -> Result<HttpResponseOk<ConnectionStates>, HttpError> {
    require_admin(&rqctx)?;
    let params = params.into_inner();
    let states = rqctx
        .context()
        .update_center
        .connection_status(params.site_id.as_deref())
        .await
        .map_err(|err| match err {
            StatusError::UnknownSite { .. } => {
                HttpError::for_not_found(None, err.to_string())
            }
        })?;
    Ok(HttpResponseOk(states))
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct InstallStatusParams {
    /// Restrict to the install wave with this correlation id.
    pub correlation_id: Option<Uuid>,
}

/// Get the current installation status of a plugin set.
#[endpoint {
    method = GET,
    path = "/install-status",
}]
async fn get_install_status(
    rqctx: RequestContext<ServerContext>,
    params: Query<InstallStatusParams>,
) -> Result<HttpResponseOk<InstallStatusResponse>, HttpError> {
    require_admin(&rqctx)?;
    let params = params.into_inner();
    let response =
        rqctx.context().update_center.install_status(params.correlation_id);
    Ok(HttpResponseOk(response))
}

/// Report plugins whose installation was interrupted by a restart, with
/// their last persisted status.
#[endpoint {
    method = GET,
    path = "/incomplete-install-status",
}]
async fn get_incomplete_install_status(
    rqctx: RequestContext<ServerContext>,
) -> Result<HttpResponseOk<BTreeMap<String, String>>, HttpError> {
    require_admin(&rqctx)?;
    Ok(HttpResponseOk(rqctx.context().update_center.incomplete_install_status()))
}

/// The ordered list of registered update sites.
#[endpoint {
    method = GET,
    path = "/sites",
}]
async fn get_sites(
    rqctx: RequestContext<ServerContext>,
) -> Result<HttpResponseOk<Vec<SiteSummary>>, HttpError> {
    require_admin(&rqctx)?;
    Ok(HttpResponseOk(rqctx.context().update_center.site_summaries()))
}

/// Invalidate every site's cached catalog, forcing re-retrieval.
#[endpoint {
    method = POST,
    path = "/invalidate-data",
}]
async fn post_invalidate_data(
    rqctx: RequestContext<ServerContext>,
) -> Result<HttpResponseUpdatedNoContent, HttpError> {
    require_admin(&rqctx)?;
    rqctx.context().update_center.invalidate_data();
    Ok(HttpResponseUpdatedNoContent())
}

/// Schedule a restart of the controller. Idempotent while a restart is
/// already scheduled.
#[endpoint {
    method = POST,
    path = "/safe-restart",
}]
async fn post_safe_restart(
    rqctx: RequestContext<ServerContext>,
) -> Result<HttpResponseUpdatedNoContent, HttpError> {
    require_admin(&rqctx)?;
    let ctx = rqctx.context();
    slog::info!(ctx.log, "restart requested over the status surface");
    ctx.update_center.schedule_restart("admin");
    Ok(HttpResponseUpdatedNoContent())
}

/// Cancel all scheduled restarts.
#[endpoint {
    method = POST,
    path = "/cancel-restart",
}]
async fn post_cancel_restart(
    rqctx: RequestContext<ServerContext>,
) -> Result<HttpResponseUpdatedNoContent, HttpError> {
    require_admin(&rqctx)?;
    rqctx.context().update_center.cancel_restarts();
    Ok(HttpResponseUpdatedNoContent())
}

/// Schedule a core upgrade from the first site offering one.
#[endpoint {
    method = POST,
    path = "/upgrade",
}]
async fn post_upgrade(
    rqctx: RequestContext<ServerContext>,
) -> Result<HttpResponseUpdatedNoContent, HttpError> {
    require_admin(&rqctx)?;
    rqctx.context().update_center.upgrade_core().map_err(job_error)?;
    Ok(HttpResponseUpdatedNoContent())
}

/// Schedule a core downgrade to the backed-up previous version.
#[endpoint {
    method = POST,
    path = "/downgrade",
}]
async fn post_downgrade(
    rqctx: RequestContext<ServerContext>,
) -> Result<HttpResponseUpdatedNoContent, HttpError> {
    require_admin(&rqctx)?;
    rqctx.context().update_center.downgrade_core().map_err(job_error)?;
    Ok(HttpResponseUpdatedNoContent())
}

fn job_error(err: JobError) -> HttpError {
    match err {
        JobError::NoCoreSource
        | JobError::NoCoreBackup
        | JobError::CoreRewriteUnsupported => {
            HttpError::for_bad_request(None, err.to_string())
        }
        other => HttpError::for_internal_error(other.to_string()),
    }
}
