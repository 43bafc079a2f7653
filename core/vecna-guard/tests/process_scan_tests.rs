mod common;

use common::{FakePlatform, RecordingFatal};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use vecna_guard::process_scan::{self, DENYLIST};
use vecna_license::TamperReason;

#[test]
fn clean_process_list() {
    assert_eq!(process_scan::scan(&FakePlatform::clean()), None);
}

#[test]
fn match_is_case_insensitive() {
    let platform = FakePlatform {
        processes: vec!["chrome.exe".into(), "ProcExp64.EXE".into()],
        ..FakePlatform::clean()
    };
    assert_eq!(
        process_scan::scan(&platform),
        Some("ProcExp64.EXE".to_string())
    );
}

#[test]
fn match_is_exact() {
    let platform = FakePlatform {
        processes: vec!["taskmgr.exe.bak".into(), "my-wireshark.exe".into(), "ida".into()],
        ..FakePlatform::clean()
    };
    assert_eq!(process_scan::scan(&platform), None);
}

#[test]
fn denylist_is_lowercase() {
    assert!(DENYLIST.iter().all(|name| *name == name.to_lowercase()));
    assert!(DENYLIST.contains(&"x64dbg.exe"));
}

#[tokio::test]
async fn run_fires_defense_on_match() {
    let platform = Arc::new(FakePlatform {
        processes: vec!["Wireshark.exe".into()],
        ..FakePlatform::clean()
    });
    let fatal = Arc::new(RecordingFatal::default());
    let (_stop_tx, stop_rx) = watch::channel(false);

    tokio::time::timeout(
        Duration::from_secs(5),
        process_scan::run(platform, fatal.clone(), Duration::from_millis(10), stop_rx),
    )
    .await
    .unwrap();

    assert_eq!(
        fatal.reasons(),
        vec![TamperReason::Process("Wireshark.exe".into())]
    );
}

#[tokio::test]
async fn run_stops_on_request() {
    let fatal = Arc::new(RecordingFatal::default());
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(process_scan::run(
        Arc::new(FakePlatform::clean()),
        fatal.clone(),
        Duration::from_secs(3600),
        stop_rx,
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_tx.send_replace(true);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fatal.count(), 0);
}
