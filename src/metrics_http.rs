//! Prometheus scrape endpoint for a running station.
//!
//! Speaks just enough HTTP/1.1 to answer `GET /metrics`: every connection is
//! served on its own task, reads the request head, answers once and closes.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::station::Station;

const METRICS_PATH: &str = "/metrics";
/// Upper bound on header lines drained per request.
const MAX_HEADER_LINES: usize = 64;
/// A scraper that has not sent its request head by then is dropped.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Bind `addr` (e.g. "127.0.0.1:9091") and serve until the cancel token fires.
pub async fn serve_metrics(addr: &str, station: Arc<Station>, cancel: CancellationToken) {
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!("Metrics HTTP: failed to bind {}: {}", addr, e);
            return;
        }
    };

    tracing::info!("Metrics HTTP: listening on http://{}{}", addr, METRICS_PATH);
    serve_on(listener, station, cancel).await;
}

/// Accept loop over an already bound listener.
pub async fn serve_on(listener: TcpListener, station: Arc<Station>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Metrics HTTP: shutting down");
                break;
            }
            accept = listener.accept() => match accept {
                Ok((stream, peer)) => {
                    let station = Arc::clone(&station);
                    tokio::spawn(async move {
                        match tokio::time::timeout(CONNECTION_TIMEOUT, handle_connection(stream, &station)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::warn!("Metrics HTTP: {} failed: {}", peer, e),
                            Err(_) => tracing::warn!("Metrics HTTP: {} timed out", peer),
                        }
                    });
                }
                Err(e) => tracing::warn!("Metrics HTTP: accept failed: {}", e),
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, station: &Station) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Drain the headers so the socket closes cleanly.
    let mut line = String::new();
    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 || line.trim_end().is_empty() {
            break;
        }
    }

    let (status, body) = route(&request_line, station);
    tracing::debug!("Metrics HTTP: {} -> {}", request_line.trim_end(), status);

    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.shutdown().await
}

/// Map a request line to a status line and body.
fn route(request_line: &str, station: &Station) -> (&'static str, String) {
    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => {
            let path = target.split_once('?').map_or(target, |(path, _)| path);
            if path == METRICS_PATH {
                ("200 OK", station.to_prometheus())
            } else {
                ("404 Not Found", format!("not found: {}\n", path))
            }
        }
        (Some(_), Some(_)) => ("405 Method Not Allowed", "only GET is supported\n".to_string()),
        _ => ("400 Bad Request", "malformed request line\n".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FuelType;
    use tokio::io::AsyncReadExt;

    fn busy_station() -> Arc<Station> {
        let station = Arc::new(Station::new());
        station.set_price(FuelType::Diesel, 1.0).unwrap();
        station.add_gas_pump(FuelType::Diesel, 10.0).unwrap();
        station.buy_gas(FuelType::Diesel, 4.0, 1.0).unwrap();
        station
    }

    async fn get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_scrape_returns_station_counters() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_on(listener, busy_station(), cancel.clone()));

        let response = get(addr, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("gas_station_sales_total 1\n"));
        assert!(response.contains("gas_station_litres_sold_total 4\n"));

        let response = get(addr, "/metrics?name=sales").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        cancel.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_on(listener, busy_station(), cancel.clone()));

        let response = get(addr, "/health").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found"));
        assert!(!response.contains("gas_station_sales_total"));

        cancel.cancel();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_scrapes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve_on(listener, busy_station(), cancel.clone()));

        // Connects but never sends a request.
        let _idle = TcpStream::connect(addr).await.unwrap();
        let response = tokio::time::timeout(Duration::from_secs(2), get(addr, "/metrics"))
            .await
            .expect("scrape stalled behind an idle connection");
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        cancel.cancel();
        server.await.unwrap();
    }

    #[test]
    fn test_route_rejects_other_methods_and_garbage() {
        let station = Station::new();
        assert_eq!(route("POST /metrics HTTP/1.1\r\n", &station).0, "405 Method Not Allowed");
        assert_eq!(route("\r\n", &station).0, "400 Bad Request");
        assert_eq!(route("GET /metrics HTTP/1.1\r\n", &station).0, "200 OK");
    }
}
