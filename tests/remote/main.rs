//! Integration tests for the HTTP and Climate Data Store backends
//!
//! A minimal HTTP/1.1 server on a loopback port serves canned responses per
//! request path.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use databrew::app::remote::CdsBackend;
use databrew::app::{
    BackendConnector, CancelFlag, Credentials, DateSelector, PathTemplate, Protocol, Record,
    RecordSettings, RemoteBackend, RemoteSettings, TransferOutcome,
};
use databrew::errors::RemoteError;

const NETCDF: &[u8] = b"CDF\x01\0\0\0\0payload";

type Routes = HashMap<String, (u16, Vec<u8>)>;

async fn serve(routes: Routes) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let routes = Arc::clone(&routes);
            tokio::spawn(async move {
                let _ = respond(socket, &routes).await;
            });
        }
    });
    addr
}

async fn respond(mut socket: TcpStream, routes: &Routes) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&chunk[..n]);
        if let Some(i) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            break i + 4;
        }
    };

    let head = String::from_utf8_lossy(&request[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while request.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&chunk[..n]);
    }

    let path = head.split_whitespace().nth(1).unwrap_or("/");
    let (status, body) = routes.get(path).cloned().unwrap_or((404, Vec::new()));
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        503 => "Service Unavailable",
        _ => "Status",
    };
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    socket.write_all(header.as_bytes()).await?;
    socket.write_all(&body).await?;
    socket.shutdown().await
}

fn settings(protocol: Protocol, host: &str) -> RemoteSettings {
    RemoteSettings {
        protocol,
        host: host.to_string(),
        credentials: Credentials::anonymous(),
        request_timeout: Duration::from_secs(10),
        cds_poll_interval: Duration::from_millis(10),
        cds_max_wait: Duration::from_millis(100),
    }
}

#[tokio::test]
async fn test_unavailable_date_is_missing_and_later_dates_arrive() {
    let mut routes = Routes::new();
    routes.insert("/sst/sst_20200101.nc".into(), (200, NETCDF.to_vec()));
    routes.insert("/sst/sst_20200102.nc".into(), (503, b"busy".to_vec()));
    routes.insert("/sst/sst_20200103.nc".into(), (200, NETCDF.to_vec()));
    let addr = serve(routes).await;

    let store = TempDir::new().unwrap();
    let remote = format!("http://{addr}/sst/sst_{{t:%Y%m%d}}.nc");
    let local = format!("{}/sst_{{t:%Y%m%d}}.nc", store.path().display());
    let mut rec = Record::new(
        "sst",
        PathTemplate::new(remote).unwrap(),
        PathTemplate::new(local).unwrap(),
        Arc::new(BackendConnector::new(settings(Protocol::Http, "127.0.0.1"))),
    )
    .unwrap()
    .with_settings(RecordSettings {
        auto_download: true,
        jobs: 1,
        show_progress: false,
    });

    let paths = rec
        .ensure_local(&DateSelector::parse("2020-01-01:2020-01-03").unwrap())
        .await
        .unwrap();

    let expected: Vec<PathBuf> = ["sst_20200101.nc", "sst_20200103.nc"]
        .iter()
        .map(|name| store.path().join(name))
        .collect();
    assert_eq!(paths, expected);
    assert_eq!(std::fs::read(&paths[1]).unwrap(), NETCDF);

    let report = rec.download_report();
    assert_eq!(report.count(TransferOutcome::Downloaded), 2);
    assert_eq!(report.count(TransferOutcome::RemoteMissing), 1);
    assert!(rec
        .remembered_missing()
        .contains(&format!("http://{addr}/sst/sst_20200102.nc")));
    assert!(!store.path().join("sst_20200102.nc.tmp").exists());
}

#[tokio::test]
async fn test_cds_task_stuck_in_queue_gives_up() {
    let queued = br#"{"state": "queued", "request_id": "r1"}"#.to_vec();
    let mut routes = Routes::new();
    routes.insert("/api/resources/ds".into(), (200, queued.clone()));
    routes.insert("/api/tasks/r1".into(), (200, queued));
    let addr = serve(routes).await;

    let dir = TempDir::new().unwrap();
    let destination = dir.path().join("era5.nc.tmp");
    let mut backend = CdsBackend::new(&settings(Protocol::Cds, "cds.example.org"))
        .unwrap()
        .with_api_base(format!("http://{addr}/api"));

    let err = backend
        .fetch(
            "cds://cds.example.org/ds?year=2020&month=01",
            &destination,
            &CancelFlag::new(),
        )
        .await
        .unwrap_err();

    match err {
        RemoteError::Cds { dataset, message } => {
            assert_eq!(dataset, "ds");
            assert!(message.contains("r1"));
            assert!(message.contains("queued"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!destination.exists());
}
