mod common;

use common::{DEVICE, config_for, harness, unreachable_config};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::path::PathBuf;
use vecna_license::{
    ActivationError, ActivationOutcome, ConfigSnapshot, SessionState, TamperReason,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_activation(server: &MockServer, status: u16, body: Value) {
    Mock::given(method("POST"))
        .and(path("/api/keys/activate-mac"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_heartbeat(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/api/keys/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

// ── Activation ──────────────────────────────────────────────────

#[tokio::test]
async fn activation_success_persists_key() {
    let server = MockServer::start().await;
    mount_activation(&server, 200, json!({})).await;
    let h = harness(config_for(&server));

    let outcome = h.session.activate("ABCD-1234", DEVICE).await.unwrap();

    assert_eq!(outcome, ActivationOutcome::NeedsInstall);
    assert_eq!(h.session.state(), SessionState::Active);
    assert_eq!(h.session.install_path(), None);
    assert_eq!(h.store.load().license_key.as_deref(), Some("ABCD-1234"));
    assert_eq!(h.fatal.count(), 0);
}

#[tokio::test]
async fn activation_normalizes_key() {
    let server = MockServer::start().await;
    mount_activation(&server, 200, json!({})).await;
    let h = harness(config_for(&server));

    h.session.activate("  abcd-1234 ", DEVICE).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["key"], "ABCD-1234");
    assert_eq!(h.session.key().as_deref(), Some("ABCD-1234"));
}

#[tokio::test]
async fn activation_resumes_existing_install() {
    let server = MockServer::start().await;
    mount_activation(&server, 200, json!({})).await;
    let h = harness(config_for(&server));
    let folder = h.dir.path().join("VecnaExtension");
    std::fs::create_dir_all(&folder).unwrap();
    h.store
        .save(&ConfigSnapshot {
            license_key: Some("ABCD-1234".into()),
            install_folder: Some(folder.clone()),
        })
        .unwrap();

    let outcome = h.session.activate("ABCD-1234", DEVICE).await.unwrap();

    assert_eq!(
        outcome,
        ActivationOutcome::Resumed {
            install_path: folder.clone()
        }
    );
    assert_eq!(h.session.install_path(), Some(folder.clone()));
    assert_eq!(h.store.load().install_folder, Some(folder));
}

#[tokio::test]
async fn activation_ignores_vanished_install_folder() {
    let server = MockServer::start().await;
    mount_activation(&server, 200, json!({})).await;
    let h = harness(config_for(&server));
    h.store
        .save(&ConfigSnapshot {
            license_key: None,
            install_folder: Some(h.dir.path().join("gone")),
        })
        .unwrap();

    let outcome = h.session.activate("KEY", DEVICE).await.unwrap();
    assert_eq!(outcome, ActivationOutcome::NeedsInstall);
    assert_eq!(h.session.install_path(), None);
}

#[tokio::test]
async fn invalid_key_leaves_config_unchanged() {
    let server = MockServer::start().await;
    mount_activation(&server, 404, json!({"error": "Invalid license key"})).await;
    let h = harness(config_for(&server));
    let before = ConfigSnapshot {
        license_key: Some("OLD-KEY".into()),
        install_folder: Some(PathBuf::from("/somewhere")),
    };
    h.store.save(&before).unwrap();

    let err = h.session.activate("BAD", DEVICE).await.unwrap_err();

    assert_eq!(err, ActivationError::InvalidKey);
    assert_eq!(h.session.state(), SessionState::Unactivated);
    assert_eq!(h.session.install_path(), None);
    assert_eq!(h.store.load(), before);
}

#[tokio::test]
async fn expired_purges_install_once() {
    let server = MockServer::start().await;
    mount_activation(&server, 403, json!({"error": "License key has Expired"})).await;
    let h = harness(config_for(&server));
    let before = ConfigSnapshot {
        license_key: Some("ABCD-1234".into()),
        install_folder: Some(h.dir.path().join("VecnaExtension")),
    };
    h.store.save(&before).unwrap();

    let err = h.session.activate("ABCD-1234", DEVICE).await.unwrap_err();

    assert_eq!(err, ActivationError::Expired);
    assert_eq!(h.session.state(), SessionState::Expired);
    assert_eq!(h.session.install_path(), None);
    assert_eq!(h.purger.count(), 1);
    assert_eq!(h.fatal.count(), 0, "expiry is local-only");
    assert_eq!(h.store.load(), before);
}

#[tokio::test]
async fn expired_without_install_skips_purge() {
    let server = MockServer::start().await;
    mount_activation(&server, 403, json!({"error": "expired"})).await;
    let h = harness(config_for(&server));

    let err = h.session.activate("ABCD-1234", DEVICE).await.unwrap_err();
    assert_eq!(err, ActivationError::Expired);
    assert_eq!(h.purger.count(), 0);
}

#[tokio::test]
async fn forbidden_without_expiry_suspends() {
    let server = MockServer::start().await;
    mount_activation(&server, 403, json!({"error": "Key disabled"})).await;
    let h = harness(config_for(&server));
    h.store
        .save(&ConfigSnapshot {
            license_key: Some("K".into()),
            install_folder: Some(h.dir.path().to_path_buf()),
        })
        .unwrap();

    let err = h.session.activate("K", DEVICE).await.unwrap_err();

    assert_eq!(err, ActivationError::Suspended);
    assert_eq!(h.session.state(), SessionState::Suspended);
    assert_eq!(h.purger.count(), 0);
}

#[tokio::test]
async fn conflict_is_device_mismatch() {
    let server = MockServer::start().await;
    mount_activation(&server, 409, json!({"error": "bound"})).await;
    let h = harness(config_for(&server));

    let err = h.session.activate("K", DEVICE).await.unwrap_err();
    assert_eq!(err, ActivationError::DeviceMismatch);
    assert_eq!(h.store.load(), ConfigSnapshot::default());
}

#[tokio::test]
async fn other_status_is_server_error() {
    let server = MockServer::start().await;
    mount_activation(&server, 502, json!({})).await;
    let h = harness(config_for(&server));

    let err = h.session.activate("K", DEVICE).await.unwrap_err();
    assert_eq!(err, ActivationError::ServerError(502));
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    let h = harness(unreachable_config());

    let err = h.session.activate("K", DEVICE).await.unwrap_err();
    assert_eq!(err, ActivationError::NetworkUnreachable);
    assert_eq!(h.session.state(), SessionState::Unactivated);
    assert_eq!(h.store.load(), ConfigSnapshot::default());
}

#[tokio::test]
async fn activation_kill_flag_fires_defense() {
    let server = MockServer::start().await;
    mount_activation(&server, 200, json!({"kill": true})).await;
    let h = harness(config_for(&server));

    let err = h.session.activate("K", DEVICE).await.unwrap_err();

    assert_eq!(err, ActivationError::TamperDetected);
    assert_eq!(h.session.state(), SessionState::Killed);
    assert_eq!(h.session.install_path(), None);
    assert_eq!(
        h.fatal.reasons.lock().unwrap().as_slice(),
        &[TamperReason::KillFlag]
    );
}

// ── Heartbeat ───────────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_without_activation_is_false() {
    let server = MockServer::start().await;
    mount_heartbeat(&server, json!({})).await;
    let h = harness(config_for(&server));

    assert!(!h.session.send_heartbeat(false).await);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn heartbeat_success_keeps_session() {
    let server = MockServer::start().await;
    mount_activation(&server, 200, json!({})).await;
    mount_heartbeat(&server, json!({"success": true})).await;
    let h = harness(config_for(&server));
    h.session.activate("K", DEVICE).await.unwrap();

    assert!(h.session.send_heartbeat(false).await);
    assert_eq!(h.session.state(), SessionState::Active);
}

#[tokio::test]
async fn heartbeat_failure_is_false_and_harmless() {
    let server = MockServer::start().await;
    mount_activation(&server, 200, json!({})).await;
    Mock::given(method("POST"))
        .and(path("/api/keys/heartbeat"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let h = harness(config_for(&server));
    h.session.activate("K", DEVICE).await.unwrap();

    assert!(!h.session.send_heartbeat(false).await);
    assert_eq!(h.session.state(), SessionState::Active);
    assert_eq!(h.fatal.count(), 0);
}

#[tokio::test]
async fn heartbeat_offline_network_is_false() {
    let server = MockServer::start().await;
    mount_activation(&server, 200, json!({})).await;
    let h = harness(config_for(&server));
    h.session.activate("K", DEVICE).await.unwrap();
    drop(server);

    assert!(!h.session.send_heartbeat(false).await);
    assert_eq!(h.session.state(), SessionState::Active);
}

#[tokio::test]
async fn heartbeat_kill_flag_fires_defense_once() {
    let server = MockServer::start().await;
    mount_activation(&server, 200, json!({})).await;
    mount_heartbeat(&server, json!({"kill": true})).await;
    let h = harness(config_for(&server));
    h.session.activate("K", DEVICE).await.unwrap();

    assert!(h.session.send_heartbeat(false).await);
    assert!(h.session.send_heartbeat(false).await);

    assert_eq!(h.session.state(), SessionState::Killed);
    assert_eq!(h.fatal.count(), 1);
}

#[tokio::test]
async fn racing_kill_flags_fire_defense_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/keys/activate-mac"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let h = harness(config_for(&server));
    h.session.activate("K", DEVICE).await.unwrap();

    mount_activation(&server, 200, json!({"kill": true})).await;
    mount_heartbeat(&server, json!({"kill": true})).await;

    let (activation, first, second) = tokio::join!(
        h.session.activate("K", DEVICE),
        h.session.send_heartbeat(false),
        h.session.send_heartbeat(false),
    );

    assert_eq!(activation, Err(ActivationError::TamperDetected));
    assert!(first && second);
    assert_eq!(h.session.state(), SessionState::Killed);
    assert_eq!(h.fatal.count(), 1);
}

#[tokio::test]
async fn killed_session_never_reactivates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/keys/activate-mac"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kill": true})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_activation(&server, 200, json!({})).await;
    let h = harness(config_for(&server));

    let _ = h.session.activate("K", DEVICE).await;
    let _ = h.session.activate("K", DEVICE).await;

    assert_eq!(h.session.state(), SessionState::Killed);
    assert_eq!(h.session.install_path(), None);
}

#[tokio::test]
async fn stop_returns_to_unactivated() {
    let server = MockServer::start().await;
    mount_activation(&server, 200, json!({})).await;
    let h = harness(config_for(&server));
    let folder = h.dir.path().join("payload");
    std::fs::create_dir_all(&folder).unwrap();
    h.store
        .save(&ConfigSnapshot {
            license_key: None,
            install_folder: Some(folder),
        })
        .unwrap();
    h.session.activate("K", DEVICE).await.unwrap();

    h.session.stop();

    assert_eq!(h.session.state(), SessionState::Unactivated);
    assert_eq!(h.session.install_path(), None);
}
