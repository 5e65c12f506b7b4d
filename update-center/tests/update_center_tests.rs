// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end scenarios against mock update sites.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use camino::Utf8PathBuf;
use httptest::{Expectation, Server, matchers::request, responders::status_code};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use update_center::config::UpdateCenterConfig;
use update_center::errors::RefreshError;
use update_center::jobs::{ConnectionState, JobKind};
use update_center::registry::SiteRegistry;
use update_center::runtime::{FileLifecycle, InMemoryPluginRuntime};
use update_center::site::{AcceptAllValidator, PluginEntry, RejectAllValidator};
use update_center::UpdateCenter;

fn log() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

fn sha256_b64(data: &[u8]) -> String {
    BASE64.encode(Sha256::digest(data))
}

/// Wrap a catalog in the postMessage HTML envelope sites serve.
fn envelope(json: &serde_json::Value) -> String {
    format!(
        "<html><script>window.parent.postMessage(JSON.stringify({json}),'*');\
         </script></html>"
    )
}

struct TestEnv {
    center: UpdateCenter,
    runtime: Arc<InMemoryPluginRuntime>,
    core_path: Utf8PathBuf,
    _dir: camino_tempfile::Utf8TempDir,
}

/// Build an update center whose registry holds exactly the given sites, all
/// bound to an accept-everything signature validator.
fn new_env(sites: &[(&str, String)]) -> TestEnv {
    let dir = camino_tempfile::tempdir().unwrap();
    let config = UpdateCenterConfig::new(dir.path());
    let registry =
        SiteRegistry::load(&config, Arc::new(AcceptAllValidator), &log())
            .unwrap();
    registry.remove_site("default").unwrap();
    for (id, url) in sites {
        registry.add_site(id, url).unwrap();
    }

    let runtime = Arc::new(InMemoryPluginRuntime::new(config.plugin_dir()));
    let core_path = dir.path().join("controller.bin");
    std::fs::write(&core_path, b"running-core").unwrap();
    let lifecycle = Arc::new(FileLifecycle::new(core_path.clone()));

    let center =
        UpdateCenter::new(config, registry, runtime.clone(), lifecycle, &log())
            .unwrap();
    TestEnv { center, runtime, core_path, _dir: dir }
}

/// A plugin entry as it would be snapshotted from a catalog, pointing at a
/// mock server. The source site is deliberately unregistered so connection
/// checks fail fast without touching the network.
fn entry(name: &str, version: &str, url: String, sha256: &str) -> PluginEntry {
    PluginEntry {
        name: name.to_string(),
        version: version.to_string(),
        title: None,
        categories: Vec::new(),
        url,
        sha1: None,
        sha256: Some(sha256.to_string()),
        sha512: None,
        dependencies: Vec::new(),
        source_id: "local".to_string(),
    }
}

#[tokio::test]
async fn two_site_refresh_merges_alternate_versions() {
    let server_a = Server::run();
    let server_b = Server::run();

    let catalog_a = serde_json::json!({
        "id": "site-a",
        "plugins": {
            "foo": { "version": "1.0", "url": "https://a.example.com/foo.jpi" },
            "bar": { "version": "3.0", "url": "https://a.example.com/bar.jpi" },
        },
    });
    let catalog_b = serde_json::json!({
        "id": "site-b",
        "plugins": {
            "foo": { "version": "2.0", "url": "https://b.example.com/foo.jpi" },
        },
    });
    server_a.expect(
        Expectation::matching(request::method_path("GET", "/update-center.json"))
            .times(1..)
            .respond_with(status_code(200).body(envelope(&catalog_a))),
    );
    server_b.expect(
        Expectation::matching(request::method_path("GET", "/update-center.json"))
            .times(1..)
            .respond_with(status_code(200).body(envelope(&catalog_b))),
    );

    let env = new_env(&[
        ("site-a", server_a.url_str("/update-center.json")),
        ("site-b", server_b.url_str("/update-center.json")),
    ]);

    let results = env.center.update_all_sites().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.result.is_ok()));

    let availables = env.center.availables();
    let view: Vec<(String, String, String)> = availables
        .iter()
        .map(|e| (e.name.clone(), e.version.clone(), e.source_id.clone()))
        .collect();
    assert_eq!(
        view,
        vec![
            // Site A wins the primary "foo" slot; site B's alternate
            // version is retained under its own row.
            ("bar".into(), "3.0".into(), "site-a".into()),
            ("foo".into(), "1.0".into(), "site-a".into()),
            ("foo".into(), "2.0".into(), "site-b".into()),
        ]
    );
}

#[tokio::test]
async fn duplicate_install_downloads_exactly_once() {
    let server = Server::run();
    let body = b"foo plugin bytes".to_vec();
    server.expect(
        Expectation::matching(request::method_path("GET", "/foo.jpi"))
            .times(1)
            .respond_with(
                status_code(200).body(String::from_utf8(body.clone()).unwrap()),
            ),
    );

    let env = new_env(&[]);
    let plugin = entry(
        "foo",
        "1.0",
        server.url_str("/foo.jpi"),
        &sha256_b64(&body),
    );

    let first = env.center.install_plugin(plugin.clone(), false, None, None);
    let second = env.center.install_plugin(plugin, false, None, None);

    let first_status = first.wait_terminal().await;
    let second_status = second.wait_terminal().await;

    assert_eq!(first_status.kind(), "SuccessButRequiresRestart");
    assert_eq!(second_status.kind(), "Skipped");
    assert!(env.center.requires_restart());

    let dest = env.center.config().plugin_dir().join("foo.jpi");
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    // Dropping the server verifies the .jpi was fetched exactly once.
}

#[tokio::test]
async fn checksum_mismatch_leaves_previous_plugin_untouched() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/foo.jpi"))
            .times(1)
            .respond_with(status_code(200).body("tampered bytes")),
    );

    let env = new_env(&[]);
    let plugin_dir = env.center.config().plugin_dir();
    std::fs::create_dir_all(&plugin_dir).unwrap();
    std::fs::write(plugin_dir.join("foo.jpi"), b"previous version").unwrap();

    let plugin = entry(
        "foo",
        "1.0",
        server.url_str("/foo.jpi"),
        &sha256_b64(b"what the site promised"),
    );
    let job = env.center.install_plugin(plugin, false, None, None);
    let status = job.wait_terminal().await;

    assert_eq!(status.kind(), "Failure");
    assert!(job.error_message().unwrap().contains("SHA-256"));
    assert_eq!(
        std::fs::read(plugin_dir.join("foo.jpi")).unwrap(),
        b"previous version"
    );
    assert!(!plugin_dir.join("foo.jpi.tmp").exists());
    assert!(!env.center.requires_restart());
}

#[tokio::test]
async fn core_upgrade_checksum_mismatch_leaves_core_unchanged() {
    let server = Server::run();
    let catalog = serde_json::json!({
        "id": "default",
        "core": {
            "version": "99.1",
            "url": server.url_str("/core.bin"),
            // Not what /core.bin actually hashes to.
            "sha512": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA==",
        },
        "plugins": {},
    });
    server.expect(
        Expectation::matching(request::method_path("GET", "/update-center.json"))
            .times(1..)
            .respond_with(status_code(200).body(envelope(&catalog))),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/core.bin"))
            .times(1)
            .respond_with(status_code(200).body("new core bytes")),
    );

    let env = new_env(&[("default", server.url_str("/update-center.json"))]);
    env.center.update_all_sites().await;

    let job = env.center.upgrade_core().unwrap();
    let status = job.wait_terminal().await;

    assert_eq!(status.kind(), "Failure");
    assert!(job.error_message().unwrap().contains("SHA-512"));
    assert_eq!(std::fs::read(&env.core_path).unwrap(), b"running-core");
    assert!(!Utf8PathBuf::from(format!("{}.tmp", env.core_path)).exists());
    assert!(!env.center.requires_restart());
}

#[tokio::test]
async fn core_upgrade_succeeds_with_matching_checksum() {
    let server = Server::run();
    let core_bytes = b"new core bytes".to_vec();
    let catalog = serde_json::json!({
        "id": "default",
        "core": {
            "version": "99.1",
            "url": server.url_str("/core.bin"),
            "sha256": sha256_b64(&core_bytes),
        },
        "plugins": {},
    });
    server.expect(
        Expectation::matching(request::method_path("GET", "/update-center.json"))
            .times(1..)
            .respond_with(status_code(200).body(envelope(&catalog))),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/core.bin"))
            .times(1)
            .respond_with(
                status_code(200)
                    .body(String::from_utf8(core_bytes.clone()).unwrap()),
            ),
    );

    let env = new_env(&[("default", server.url_str("/update-center.json"))]);
    env.center.update_all_sites().await;
    assert!(env.center.core_update_available().is_some());

    let job = env.center.upgrade_core().unwrap();
    let status = job.wait_terminal().await;

    assert_eq!(status.kind(), "SuccessButRequiresRestart");
    assert!(env.center.requires_restart());
    assert_eq!(std::fs::read(&env.core_path).unwrap(), core_bytes);
    // The previous core was rotated aside, so a downgrade is now possible.
    assert!(env.center.is_downgradable());
    assert_eq!(
        std::fs::read(format!("{}.bak", env.core_path)).unwrap(),
        b"running-core"
    );
}

#[tokio::test]
async fn connection_check_without_probe_url_skips_internet() {
    let server = Server::run();
    let catalog = serde_json::json!({ "id": "default", "plugins": {} });
    server.expect(
        Expectation::matching(request::method_path("GET", "/update-center.json"))
            .times(1..)
            .respond_with(status_code(200).body(envelope(&catalog))),
    );

    let env = new_env(&[("default", server.url_str("/update-center.json"))]);
    env.center.update_all_sites().await;

    // First job against the site schedules its connection check.
    let states = env.center.connection_status(Some("default")).await.unwrap();
    assert_eq!(states.internet, ConnectionState::Precheck);

    let check = env.center.connection_check_job("default").unwrap();
    check.wait_terminal().await;
    let JobKind::ConnectionCheck(check) = &check.kind else { unreachable!() };
    let states = check.states();
    assert_eq!(states.internet, ConnectionState::Skipped);
    assert_eq!(states.updatesite, ConnectionState::Ok);
}

#[tokio::test]
async fn connection_check_probes_declared_internet_url() {
    let server = Server::run();
    let catalog = serde_json::json!({
        "id": "default",
        "connectionCheckUrl": server.url_str("/ping"),
        "plugins": {},
    });
    server.expect(
        Expectation::matching(request::method_path("GET", "/update-center.json"))
            .times(1..)
            .respond_with(status_code(200).body(envelope(&catalog))),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/ping"))
            .times(1)
            .respond_with(status_code(200)),
    );

    let env = new_env(&[("default", server.url_str("/update-center.json"))]);
    env.center.update_all_sites().await;

    env.center.connection_status(Some("default")).await.unwrap();
    let check = env.center.connection_check_job("default").unwrap();
    check.wait_terminal().await;
    let JobKind::ConnectionCheck(check) = &check.kind else { unreachable!() };
    let states = check.states();
    assert_eq!(states.internet, ConnectionState::Ok);
    assert_eq!(states.updatesite, ConnectionState::Ok);
}

#[tokio::test]
async fn signature_rejection_refuses_the_site_catalog() {
    let server = Server::run();
    let catalog = serde_json::json!({ "id": "default", "plugins": {} });
    server.expect(
        Expectation::matching(request::method_path("GET", "/update-center.json"))
            .times(1..)
            .respond_with(status_code(200).body(envelope(&catalog))),
    );

    let dir = camino_tempfile::tempdir().unwrap();
    let config = UpdateCenterConfig::new(dir.path());
    let registry = SiteRegistry::load(
        &config,
        Arc::new(RejectAllValidator { reason: "certificate expired".into() }),
        &log(),
    )
    .unwrap();
    registry.remove_site("default").unwrap();
    let site = registry
        .add_site("default", &server.url_str("/update-center.json"))
        .unwrap();

    let fetcher = update_center::fetch::Fetcher::new(&log()).unwrap();
    let err = site.refresh(&fetcher, &config, true).await.unwrap_err();
    assert!(matches!(err, RefreshError::SignatureRejected { .. }));
    assert!(site.data().is_none());

    // With verification turned off the same catalog loads.
    site.refresh(&fetcher, &config, false).await.unwrap();
    assert!(site.data().is_some());
}

#[tokio::test]
async fn dynamic_load_restart_required_maps_to_success_but_requires_restart() {
    let server = Server::run();
    let body = b"foo plugin bytes".to_vec();
    server.expect(
        Expectation::matching(request::method_path("GET", "/foo.jpi"))
            .times(1)
            .respond_with(
                status_code(200).body(String::from_utf8(body.clone()).unwrap()),
            ),
    );

    let env = new_env(&[]);
    env.runtime.set_restart_required_on_load("class loading conflict");

    let plugin = entry(
        "foo",
        "1.0",
        server.url_str("/foo.jpi"),
        &sha256_b64(&body),
    );
    let job = env.center.install_plugin(plugin, true, None, None);
    let status = job.wait_terminal().await;

    assert_eq!(status.kind(), "SuccessButRequiresRestart");
    assert!(env.center.requires_restart());

    let response = env.center.install_status(None);
    assert_eq!(response.state, "RESTART_REQUIRED");
    assert_eq!(response.jobs.len(), 1);
    assert!(response.jobs[0].requires_restart);
}

#[tokio::test]
async fn dynamic_load_activates_without_restart() {
    let server = Server::run();
    let body = b"foo plugin bytes".to_vec();
    server.expect(
        Expectation::matching(request::method_path("GET", "/foo.jpi"))
            .times(1)
            .respond_with(
                status_code(200).body(String::from_utf8(body.clone()).unwrap()),
            ),
    );

    let env = new_env(&[]);
    let plugin = entry(
        "foo",
        "1.0",
        server.url_str("/foo.jpi"),
        &sha256_b64(&body),
    );
    let job = env.center.install_plugin(plugin, true, None, None);
    let status = job.wait_terminal().await;

    assert_eq!(status.kind(), "Success");
    assert!(!env.center.requires_restart());
    let loads = env.runtime.dynamic_loads();
    assert_eq!(loads.len(), 1);
    assert!(loads[0].as_str().ends_with("foo.jpi"));
}

#[tokio::test]
async fn interrupted_install_is_reported_after_restart() {
    let server = Server::run();
    let body = b"foo plugin bytes".to_vec();
    server.expect(
        Expectation::matching(request::method_path("GET", "/foo.jpi"))
            .times(2)
            .respond_with(
                status_code(200).body(String::from_utf8(body.clone()).unwrap()),
            ),
    );

    let dir = camino_tempfile::tempdir().unwrap();

    // First process: the install fails (bad published checksum) and its
    // status is persisted.
    {
        let config = UpdateCenterConfig::new(dir.path());
        let registry = SiteRegistry::load(
            &config,
            Arc::new(AcceptAllValidator),
            &log(),
        )
        .unwrap();
        let runtime =
            Arc::new(InMemoryPluginRuntime::new(config.plugin_dir()));
        let lifecycle =
            Arc::new(FileLifecycle::new(dir.path().join("controller.bin")));
        let center = UpdateCenter::new(
            config,
            registry,
            runtime,
            lifecycle,
            &log(),
        )
        .unwrap();

        let plugin = entry(
            "foo",
            "1.0",
            server.url_str("/foo.jpi"),
            &sha256_b64(b"not these bytes"),
        );
        let job = center.install_plugin(plugin, false, None, None);
        assert_eq!(job.wait_terminal().await.kind(), "Failure");
        center.persist_install_status();
    }

    // Second process over the same home: the incomplete install surfaces,
    // and re-enqueueing it with the corrected checksum completes the wave.
    let config = UpdateCenterConfig::new(dir.path());
    let registry =
        SiteRegistry::load(&config, Arc::new(AcceptAllValidator), &log())
            .unwrap();
    let runtime = Arc::new(InMemoryPluginRuntime::new(config.plugin_dir()));
    let lifecycle =
        Arc::new(FileLifecycle::new(dir.path().join("controller.bin")));
    let center =
        UpdateCenter::new(config, registry, runtime, lifecycle, &log())
            .unwrap();

    let incomplete = center.incomplete_install_status();
    assert_eq!(incomplete.get("foo").map(String::as_str), Some("Failure"));

    let plugin = entry(
        "foo",
        "1.0",
        server.url_str("/foo.jpi"),
        &sha256_b64(&body),
    );
    let job = center.install_plugin(plugin, false, None, None);
    assert_eq!(
        job.wait_terminal().await.kind(),
        "SuccessButRequiresRestart"
    );

    // Every install is now successful, so the resume record is cleared.
    assert!(center.incomplete_install_status().is_empty());
}

#[tokio::test]
async fn install_wave_completes_with_batch_job() {
    let server = Server::run();
    let foo = b"foo bytes".to_vec();
    let bar = b"bar bytes".to_vec();
    server.expect(
        Expectation::matching(request::method_path("GET", "/foo.jpi"))
            .times(1)
            .respond_with(
                status_code(200).body(String::from_utf8(foo.clone()).unwrap()),
            ),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/bar.jpi"))
            .times(1)
            .respond_with(
                status_code(200).body(String::from_utf8(bar.clone()).unwrap()),
            ),
    );

    let env = new_env(&[]);
    let wave = Uuid::new_v4();
    let batch = vec!["foo".to_string(), "bar".to_string()];
    let started = std::time::Instant::now();

    let first = env.center.install_plugin(
        entry("foo", "1.0", server.url_str("/foo.jpi"), &sha256_b64(&foo)),
        true,
        Some(wave),
        Some(batch.clone()),
    );
    let second = env.center.install_plugin(
        entry("bar", "1.0", server.url_str("/bar.jpi"), &sha256_b64(&bar)),
        true,
        Some(wave),
        Some(batch.clone()),
    );
    let completion = env.center.complete_batch(batch.clone(), started, wave);

    assert_eq!(first.wait_terminal().await.kind(), "Success");
    assert_eq!(second.wait_terminal().await.kind(), "Success");
    assert_eq!(completion.wait_terminal().await.kind(), "Success");
    assert_eq!(env.runtime.started_batches(), vec![batch]);

    let response = env.center.install_status(Some(wave));
    assert_eq!(response.jobs.len(), 2);
    assert!(response.jobs.iter().all(|job| job.install_status == "Success"));
}
