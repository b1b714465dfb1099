//! Integration tests for keeping a local store in sync
//!
//! Records run against an in-memory server through the public `Connector`
//! seam, so every transfer decision can be counted.

mod mock;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use databrew::app::record::{effective_jobs, WorkerPool};
use databrew::app::{
    download_file, Connector, DateSelector, PathTemplate, Record, RecordSettings, TransferOutcome,
};
use databrew::errors::{AppError, DownloadError, RemoteError};

use mock::MemoryConnector;

const NETCDF: &[u8] = b"CDF\x01\0\0\0\0payload";
const REMOTE: &str = "ftp://mock/data/{t:%Y}/file_{t:%Y%m%d}*.nc";

fn remote_file(day: u32) -> String {
    format!("ftp://mock/data/2020/file_202001{day:02}_v2.nc")
}

fn three_days() -> MemoryConnector {
    MemoryConnector::with_files(&[
        (remote_file(1).as_str(), NETCDF),
        (remote_file(2).as_str(), NETCDF),
        (remote_file(3).as_str(), NETCDF),
    ])
}

fn auto_settings(jobs: usize) -> RecordSettings {
    RecordSettings {
        auto_download: true,
        jobs,
        show_progress: false,
    }
}

fn record(store: &TempDir, connector: &MemoryConnector) -> Record {
    let local = format!("{}/{{t:%Y}}/file_{{t:%Y%m%d}}.nc", store.path().display());
    Record::new(
        "test",
        PathTemplate::new(REMOTE).unwrap(),
        PathTemplate::new(local).unwrap(),
        Arc::new(connector.clone()),
    )
    .unwrap()
    .with_settings(auto_settings(1))
}

fn selector() -> DateSelector {
    DateSelector::parse("2020-01-01:2020-01-03").unwrap()
}

fn expected_paths(store: &TempDir) -> Vec<PathBuf> {
    (1..=3)
        .map(|d| store.path().join(format!("2020/file_202001{d:02}.nc")))
        .collect()
}

#[tokio::test]
async fn test_fetches_three_days_in_date_order() {
    let store = TempDir::new().unwrap();
    let connector = three_days();
    let mut rec = record(&store, &connector);

    let paths = rec.ensure_local(&selector()).await.unwrap();

    assert_eq!(paths, expected_paths(&store));
    for path in &paths {
        assert_eq!(std::fs::read(path).unwrap(), NETCDF);
    }
    let report = rec.download_report();
    assert_eq!(report.count(TransferOutcome::Downloaded), 3);
    assert_eq!(
        report.remotes(TransferOutcome::Downloaded)[0],
        "ftp://mock/data/2020/file_20200101*.nc"
    );

    // one directory, listed once on one connection
    let activity = connector.activity();
    assert_eq!(activity.connects, 1);
    assert_eq!(activity.listings, 1);
    assert_eq!(activity.fetches, 3);
}

#[tokio::test]
async fn test_second_call_transfers_nothing() {
    let store = TempDir::new().unwrap();
    let connector = three_days();
    let mut rec = record(&store, &connector);

    let first = rec.ensure_local(&selector()).await.unwrap();
    let before = connector.activity();
    let second = rec.ensure_local(&selector()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(connector.activity(), before);
    let report = rec.download_report();
    assert_eq!(report.count(TransferOutcome::Downloaded), 0);
    assert_eq!(report.count(TransferOutcome::LocalExists), 3);
}

#[tokio::test]
async fn test_deleted_file_is_fetched_again() {
    let store = TempDir::new().unwrap();
    let connector = three_days();
    let mut rec = record(&store, &connector);

    let paths = rec.ensure_local(&selector()).await.unwrap();
    std::fs::remove_file(&paths[1]).unwrap();
    let before = connector.activity();

    let again = rec.ensure_local(&selector()).await.unwrap();

    assert_eq!(again, paths);
    assert_eq!(connector.activity().fetches, before.fetches + 1);
    assert_eq!(
        rec.download_report().remotes(TransferOutcome::Downloaded),
        [remote_file(2).replace("_v2.nc", "*.nc")]
    );
}

#[tokio::test]
async fn test_empty_netcdf_is_refetched() {
    let store = TempDir::new().unwrap();
    let connector = three_days();
    let mut rec = record(&store, &connector);

    let stale = store.path().join("2020/file_20200102.nc");
    std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
    std::fs::write(&stale, b"").unwrap();

    let sel = DateSelector::parse("2020-01-02").unwrap();
    let paths = rec.ensure_local(&sel).await.unwrap();

    assert_eq!(paths, vec![stale.clone()]);
    assert_eq!(std::fs::read(&stale).unwrap(), NETCDF);
    assert_eq!(rec.download_report().count(TransferOutcome::Downloaded), 1);
}

#[tokio::test]
async fn test_ambiguous_remote_is_an_error() {
    let store = TempDir::new().unwrap();
    let connector = MemoryConnector::with_files(&[
        ("ftp://mock/data/2020/file_20200101_v1.nc", NETCDF),
        ("ftp://mock/data/2020/file_20200101_v2.nc", NETCDF),
    ]);
    let mut rec = record(&store, &connector);

    let sel = DateSelector::parse("2020-01-01").unwrap();
    let err = rec.ensure_local(&sel).await.unwrap_err();

    match err {
        AppError::Download(DownloadError::Transfer {
            source: RemoteError::AmbiguousMatch { matches, .. },
            ..
        }) => assert_eq!(matches.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!store.path().join("2020/file_20200101.nc").exists());
}

#[tokio::test]
async fn test_missing_remote_is_remembered() {
    let store = TempDir::new().unwrap();
    let connector = MemoryConnector::with_files(&[
        (remote_file(1).as_str(), NETCDF),
        (remote_file(3).as_str(), NETCDF),
    ]);
    let mut rec = record(&store, &connector);

    let paths = rec.ensure_local(&selector()).await.unwrap();
    let expected = expected_paths(&store);
    assert_eq!(paths, vec![expected[0].clone(), expected[2].clone()]);
    assert_eq!(rec.download_report().count(TransferOutcome::RemoteMissing), 1);

    let before = connector.activity();
    let again = rec.ensure_local(&selector()).await.unwrap();

    assert_eq!(again, paths);
    // nothing left to ask the server for
    assert_eq!(connector.activity(), before);
    assert_eq!(rec.download_report().count(TransferOutcome::RemoteMissing), 1);
    assert_eq!(rec.download_report().count(TransferOutcome::LocalExists), 2);
}

#[tokio::test]
async fn test_declined_prompt_fetches_nothing() {
    let store = TempDir::new().unwrap();
    let connector = three_days();
    let asked = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&asked);

    let mut rec = record(&store, &connector)
        .with_settings(RecordSettings {
            auto_download: false,
            ..auto_settings(1)
        })
        .with_confirm(Arc::new(move |count| {
            seen.store(count, Ordering::SeqCst);
            false
        }));

    let err = rec.ensure_local(&selector()).await.unwrap_err();

    assert!(matches!(err, AppError::Download(DownloadError::NotFound { .. })));
    assert_eq!(asked.load(Ordering::SeqCst), 3);
    assert_eq!(connector.activity().connects, 0);
}

#[tokio::test]
async fn test_accepted_prompt_fetches_missing_only() {
    let store = TempDir::new().unwrap();
    let connector = three_days();
    let mut rec = record(&store, &connector);
    rec.ensure_local(&DateSelector::parse("2020-01-01").unwrap())
        .await
        .unwrap();

    let asked = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&asked);
    let mut rec = record(&store, &connector)
        .with_settings(RecordSettings {
            auto_download: false,
            ..auto_settings(1)
        })
        .with_confirm(Arc::new(move |count| {
            seen.store(count, Ordering::SeqCst);
            true
        }));

    let paths = rec.ensure_local(&selector()).await.unwrap();
    assert_eq!(paths, expected_paths(&store));
    assert_eq!(asked.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_parallel_workers_fetch_everything() {
    let store = TempDir::new().unwrap();
    let files: Vec<(String, &[u8])> = (1..=6).map(|d| (remote_file(d), NETCDF)).collect();
    let files: Vec<(&str, &[u8])> = files.iter().map(|(r, b)| (r.as_str(), *b)).collect();
    let connector = MemoryConnector::with_files(&files);
    let mut rec = record(&store, &connector).with_settings(auto_settings(4));

    let sel = DateSelector::parse("2020-01-01:2020-01-06").unwrap();
    let paths = rec.ensure_local(&sel).await.unwrap();

    assert_eq!(paths.len(), 6);
    assert!(paths.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(rec.download_report().count(TransferOutcome::Downloaded), 6);
    assert_eq!(connector.activity().connects, effective_jobs(4).min(6));
}

#[tokio::test]
async fn test_failed_transfer_keeps_completed_files() {
    let store = TempDir::new().unwrap();
    let connector = three_days();
    connector.fail_on(&remote_file(2));
    let mut rec = record(&store, &connector);

    let err = rec.ensure_local(&selector()).await.unwrap_err();

    assert!(matches!(
        err,
        AppError::Download(DownloadError::Transfer {
            source: RemoteError::ConnectionLost { .. },
            ..
        })
    ));
    let report = rec.download_report();
    assert_eq!(report.count(TransferOutcome::Downloaded), 1);
    let paths = expected_paths(&store);
    assert!(paths[0].exists());
    assert!(!paths[1].exists());
    assert!(!store.path().join("2020/file_20200102.nc.tmp").exists());
}

#[tokio::test]
async fn test_download_visits_every_pair() {
    let store = TempDir::new().unwrap();
    let connector = three_days();
    let mut rec = record(&store, &connector);
    rec.ensure_local(&DateSelector::parse("2020-01-02").unwrap())
        .await
        .unwrap();

    let report = rec.download(&selector()).await.unwrap();

    assert_eq!(report.total(), 3);
    assert_eq!(report.count(TransferOutcome::Downloaded), 2);
    assert_eq!(report.count(TransferOutcome::LocalExists), 1);
}

#[tokio::test]
async fn test_failed_worker_leaves_siblings_running() {
    let store = TempDir::new().unwrap();
    let files: Vec<(String, &[u8])> = (1..=6).map(|d| (remote_file(d), NETCDF)).collect();
    let files: Vec<(&str, &[u8])> = files.iter().map(|(r, b)| (r.as_str(), *b)).collect();
    let connector = MemoryConnector::with_files(&files);
    connector.fail_on(&remote_file(2));

    let pairs = record(&store, &connector)
        .pairs(&DateSelector::parse("2020-01-01:2020-01-06").unwrap())
        .unwrap();
    let pool = WorkerPool::new(Arc::new(connector.clone()), 3);
    let outcomes = pool.run(pairs, None).await;

    // chunks are [1, 2], [3, 4] and [5, 6]
    assert_eq!(outcomes.len(), 3);
    assert!(matches!(
        outcomes[0].error,
        Some(DownloadError::Transfer {
            source: RemoteError::ConnectionLost { .. },
            ..
        })
    ));
    assert_eq!(outcomes[0].records.len(), 1);
    for sibling in &outcomes[1..] {
        assert!(sibling.error.is_none());
        assert_eq!(sibling.records.len(), 2);
        assert!(sibling
            .records
            .iter()
            .all(|r| r.outcome == TransferOutcome::Downloaded));
    }

    let paths = expected_six(&store);
    assert!(paths[0].exists());
    assert!(!paths[1].exists());
    assert!(paths[2..].iter().all(|p| p.exists()));
    assert_eq!(connector.activity().connects, 3);
}

#[tokio::test]
async fn test_dropped_transfer_leaves_no_partial_file() {
    let store = TempDir::new().unwrap();
    let connector = three_days();
    connector.stall_on(&remote_file(2));

    let pair = record(&store, &connector)
        .pairs(&DateSelector::parse("2020-01-02").unwrap())
        .unwrap()
        .remove(0);
    let mut backend = connector.connect().await.unwrap();

    let result =
        tokio::time::timeout(Duration::from_millis(100), download_file(backend.as_mut(), &pair))
            .await;

    assert!(result.is_err());
    assert_eq!(connector.activity().fetches, 1);
    assert!(!pair.local.exists());
    assert!(!store.path().join("2020/file_20200102.nc.tmp").exists());
}

#[tokio::test]
async fn test_interrupted_fetch_leaves_no_partial_file() {
    let store = TempDir::new().unwrap();
    let connector = three_days();
    connector.stall_on(&remote_file(3));
    let mut rec = record(&store, &connector);

    let result = tokio::time::timeout(Duration::from_millis(200), rec.ensure_local(&selector())).await;
    assert!(result.is_err());

    // aborted workers are dropped the next time the runtime schedules them
    tokio::time::sleep(Duration::from_millis(50)).await;

    let paths = expected_paths(&store);
    assert!(paths[0].exists());
    assert!(paths[1].exists());
    assert!(!paths[2].exists());
    assert!(!store.path().join("2020/file_20200103.nc.tmp").exists());
}

fn expected_six(store: &TempDir) -> Vec<PathBuf> {
    (1..=6)
        .map(|d| store.path().join(format!("2020/file_202001{d:02}.nc")))
        .collect()
}
