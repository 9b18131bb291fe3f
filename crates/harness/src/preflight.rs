//! Reachability check of a group's base URL before any browser starts

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{HarnessError, HarnessResult};

/// Poll `base_url` until it answers with a non-server-error status or
/// `timeout` elapses.
pub async fn check_reachable(base_url: &str, timeout: Duration) -> HarnessResult<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match client.get(base_url).send().await {
            Ok(resp) if !resp.status().is_server_error() => {
                info!("{} reachable ({})", base_url, resp.status());
                return Ok(());
            }
            Ok(resp) => {
                warn!("Preflight {} returned {}", base_url, resp.status());
            }
            Err(e) => {
                if !e.is_connect() {
                    warn!("Preflight error: {}", e);
                }
            }
        }

        if start.elapsed() >= timeout {
            break;
        }
        sleep(Duration::from_millis(250)).await;
    }

    Err(HarnessError::Unreachable {
        url: base_url.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(status: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status);
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_reachable() {
        let url = serve_once("200 OK").await;
        check_reachable(&url, Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_unreachable() {
        let url = serve_once("503 Service Unavailable").await;
        let err = check_reachable(&url, Duration::from_millis(300)).await.unwrap_err();
        match err {
            HarnessError::Unreachable { attempts, .. } => assert!(attempts >= 1),
            other => panic!("unexpected error: {}", other),
        }
    }
}
