use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use hotelplan::hub::HubHandle;
use hotelplan::session;
use hotelplan::storage::FileStorage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("HOTELPLAN_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    hotelplan::observability::init(metrics_port)?;

    let port = std::env::var("HOTELPLAN_PORT").unwrap_or_else(|_| "8081".into());
    let bind = std::env::var("HOTELPLAN_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("HOTELPLAN_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let max_connections: usize = std::env::var("HOTELPLAN_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(256);
    let compact_threshold: u64 = std::env::var("HOTELPLAN_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(hotelplan::limits::DEFAULT_COMPACT_THRESHOLD);

    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("hotelplan.wal");
    let storage = FileStorage::open(&wal_path, compact_threshold)?;
    let hub = Arc::new(HubHandle::spawn(storage)?);
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("hotelplan listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  max_connections: {max_connections}");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight sessions
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(hotelplan::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(hotelplan::observability::CONNECTIONS_TOTAL).increment(1);
                let hub = hub.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until the session closes
                    if let Err(e) = session::process_connection(socket, hub).await {
                        tracing::error!("session error from {peer}: {e}");
                    }
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Stopping the hub closes every session outbox, which ends the sessions.
    let stopping = hub.clone();
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;

    info!("draining sessions...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all sessions drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} sessions still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("hotelplan stopped");
    Ok(())
}
