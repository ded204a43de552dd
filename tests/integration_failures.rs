use anyhow::Result;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use transport_bench::{
    transport::{Target, TransportConfig},
    BenchmarkRunner, FailureKind, RunConfig, TransportKind,
};

fn config(target: String, trials: usize, timeout: Duration) -> RunConfig {
    let mut config = RunConfig::new(TransportConfig::new(TransportKind::Http1, Target::new(target)));
    config.warmup_trials = 1;
    config.trials = trials;
    config.timeout = timeout;
    config.probe_scheduling = false;
    config
}

/// Every trial against a closed port fails with a connection error, and the
/// summary still reports counts without any latency figures.
#[tokio::test]
async fn connection_refused_yields_all_failed_summary() -> Result<()> {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };

    let results = BenchmarkRunner::new(config(
        format!("http://127.0.0.1:{}/", port),
        5,
        Duration::from_secs(2),
    ))
    .run()
    .await?;

    assert_eq!(results.records.len(), 5);
    assert_eq!(results.summary.success_count, 0);
    assert_eq!(results.summary.failure_count, 5);
    assert_eq!(results.summary.failures.connection, 5);
    assert!(results
        .records
        .iter()
        .all(|r| r.failure_reason().map(|f| f.kind) == Some(FailureKind::Connection)));
    assert!(results.summary.latency.is_none());
    assert!(results.summary.throughput.is_none());
    assert!(results.summary.require_latency().is_err());
    Ok(())
}

/// A server that accepts but never answers produces per-trial timeouts.
#[tokio::test]
async fn silent_server_times_out_each_trial() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let timeout = Duration::from_millis(200);
    let results = BenchmarkRunner::new(config(format!("http://{}/", addr), 2, timeout))
        .run()
        .await?;

    assert_eq!(results.summary.failures.timeout, 2);
    assert!(results.records.iter().all(|r| r.elapsed() >= timeout));
    Ok(())
}

/// Opening a malformed target is the one run-level failure.
#[tokio::test]
async fn malformed_target_fails_before_any_trial() {
    let err = BenchmarkRunner::new(config("not a url".to_string(), 1, Duration::from_secs(1)))
        .run()
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to open HTTP/1.1 transport"));
}

/// A body cut off partway is a read failure and its partial bytes are dropped.
#[tokio::test]
async fn truncated_body_is_a_read_failure() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = "HTTP/1.1 200 OK\r\nContent-Length: 100000\r\n\r\n";
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&[b'x'; 64]).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    let results = BenchmarkRunner::new(config(format!("http://{}/", addr), 3, Duration::from_secs(5)))
        .run()
        .await?;

    assert_eq!(results.records.len(), 3);
    assert_eq!(results.summary.failures.read, 3);
    assert!(results
        .records
        .iter()
        .all(|r| r.failure_reason().map(|f| f.kind) == Some(FailureKind::Read)));
    assert!(results.records.iter().all(|r| r.bytes() == 0));
    assert_eq!(results.summary.total_bytes, 0);
    assert!(results.summary.latency.is_none());
    Ok(())
}
