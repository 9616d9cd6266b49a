use std::time::Duration;

use log::{debug, info};
use serde::{de::DeserializeOwned, Serialize};
use sera_protocol::{
    EmergencyStopResponse, ErrorBody, Health, HomeRequest, Motors, MoveRequest, MoveResponse,
    PositionRequest, PositionResponse, StatusResponse, StopRequest, StopResponse,
};

use crate::MoveError;

/// How long to wait for the controller before giving up on a request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that accepts motor commands: the real controller, or a
/// simulation of it.
#[allow(async_fn_in_trait)]
pub trait RigDevice {
    async fn health(&self) -> Result<Health, MoveError>;
    async fn move_to_position(&self, req: &PositionRequest) -> Result<PositionResponse, MoveError>;
    /// Move to the controller's built-in home (the center of the rig),
    /// which knows nothing about our calibration.
    async fn go_home(&self, req: &HomeRequest) -> Result<PositionResponse, MoveError>;
    async fn emergency_stop(&self) -> Result<EmergencyStopResponse, MoveError>;
    async fn stop_motors(&self, motors: Motors) -> Result<StopResponse, MoveError>;
    async fn move_motors(&self, req: &MoveRequest) -> Result<MoveResponse, MoveError>;
    /// De-energize motors, so that they no longer hold their position.
    async fn release_motors(&self, motors: Motors) -> Result<(), MoveError>;
    async fn status(&self) -> Result<StatusResponse, MoveError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid device url {0:?}: {1}")]
    Url(String, String),
    #[error("couldn't set up the http client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct HttpRigBuilder {
    base: String,
    timeout: Duration,
}

impl HttpRigBuilder {
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    pub fn build(&self) -> Result<HttpRig, BuildError> {
        let base = self.base.trim_end_matches('/').to_owned();
        reqwest::Url::parse(&base).map_err(|e| BuildError::Url(base.clone(), e.to_string()))?;
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        Ok(HttpRig {
            client,
            base,
            timeout: self.timeout,
        })
    }
}

/// The controller's HTTP API.
pub struct HttpRig {
    client: reqwest::Client,
    base: String,
    timeout: Duration,
}

impl HttpRig {
    pub fn builder(base: impl Into<String>) -> HttpRigBuilder {
        HttpRigBuilder {
            base: base.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn transport_error(&self, path: &str, e: reqwest::Error) -> MoveError {
        if e.is_timeout() {
            MoveError::Transport(format!("{path} timed out after {:?}", self.timeout))
        } else {
            MoveError::Transport(format!("{path}: {e}"))
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, MoveError> {
        info!("[device] GET {path}");
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| self.transport_error(path, e))?;
        self.decode(path, resp).await
    }

    async fn post<B, T>(&self, path: &str, body: Option<&B>) -> Result<T, MoveError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        info!("[device] POST {path}");
        let mut req = self.client.post(self.url(path));
        if let Some(body) = body {
            debug!(
                "[device] request body: {}",
                serde_json::to_string(body).unwrap_or_default()
            );
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| self.transport_error(path, e))?;
        self.decode(path, resp).await
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        path: &str,
        resp: reqwest::Response,
    ) -> Result<T, MoveError> {
        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| self.transport_error(path, e))?;
        debug!("[device] {status} {}", String::from_utf8_lossy(&body));

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(|e| {
                MoveError::Transport(format!("{path}: unexpected response ({e})"))
            });
        }
        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(err) => Err(MoveError::Device(err.message())),
            Err(_) => Err(MoveError::Transport(format!("{path}: HTTP {status}"))),
        }
    }
}

impl RigDevice for HttpRig {
    async fn health(&self) -> Result<Health, MoveError> {
        self.get("/motors/health").await
    }

    async fn move_to_position(&self, req: &PositionRequest) -> Result<PositionResponse, MoveError> {
        self.post("/motors/position", Some(req)).await
    }

    async fn go_home(&self, req: &HomeRequest) -> Result<PositionResponse, MoveError> {
        self.post("/motors/home", Some(req)).await
    }

    async fn emergency_stop(&self) -> Result<EmergencyStopResponse, MoveError> {
        self.post::<(), _>("/motors/emergency-stop", None).await
    }

    async fn stop_motors(&self, motors: Motors) -> Result<StopResponse, MoveError> {
        self.post("/motors/stop", Some(&StopRequest { motors })).await
    }

    async fn move_motors(&self, req: &MoveRequest) -> Result<MoveResponse, MoveError> {
        self.post("/motors/move", Some(req)).await
    }

    async fn release_motors(&self, motors: Motors) -> Result<(), MoveError> {
        // The acknowledgement has no fixed shape; we only care that it's a success.
        let _: serde_json::Value = self
            .post("/motors/release", Some(&StopRequest { motors }))
            .await?;
        Ok(())
    }

    async fn status(&self) -> Result<StatusResponse, MoveError> {
        self.get("/motors/status").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sera_geom::Point;
    use sera_protocol::MotorName;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn content_length(head: &str) -> usize {
        head.lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse().ok())
            .unwrap_or(0)
    }

    // Answers a single request with a canned response, and hands back the
    // raw request it received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = sock.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).into_owned();
                if let Some(end) = text.find("\r\n\r\n") {
                    if buf.len() >= end + 4 + content_length(&text[..end]) {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let resp = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf).into_owned()
        });
        (format!("http://{addr}/"), handle)
    }

    #[tokio::test]
    async fn move_to_position() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"moved":["axis_x"],"delta_x":-12.0,"delta_y":0.0,"new_position":{"x":10.5,"y":31.5}}"#,
        )
        .await;
        let rig = HttpRig::builder(url).build().unwrap();
        let req = PositionRequest::new(Point::new(10.5, 31.5), Point::new(22.5, 31.5), 8.0);
        let resp = rig.move_to_position(&req).await.unwrap();
        assert_eq!(resp.moved, vec![MotorName::AxisX]);
        assert_eq!(resp.new_position(), Point::new(10.5, 31.5));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /motors/position "));
        let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
        let sent: PositionRequest = serde_json::from_str(body).unwrap();
        assert_eq!(sent, req);
    }

    #[tokio::test]
    async fn device_error() {
        let (url, _server) = serve_once("500 Internal Server Error", r#"{"detail":"ESP32 unreachable"}"#).await;
        let rig = HttpRig::builder(url).build().unwrap();
        let err = rig.emergency_stop().await.unwrap_err();
        assert_eq!(err, MoveError::Device("ESP32 unreachable".to_owned()));
    }

    #[tokio::test]
    async fn unstructured_failure() {
        let (url, _server) = serve_once("502 Bad Gateway", "<html>nope</html>").await;
        let rig = HttpRig::builder(url).build().unwrap();
        let err = rig.status().await.unwrap_err();
        assert!(matches!(err, MoveError::Transport(_)));
    }

    #[tokio::test]
    async fn hanging_device_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(sock);
        });

        let rig = HttpRig::builder(format!("http://{addr}"))
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let err = rig.health().await.unwrap_err();
        assert!(matches!(err, MoveError::Transport(_)));
    }

    #[test]
    fn bad_url() {
        assert!(matches!(
            HttpRig::builder("not a url").build(),
            Err(BuildError::Url(..))
        ));
    }

    #[test]
    fn trailing_slash() {
        let rig = HttpRig::builder("http://rig.local:8001/").build().unwrap();
        assert_eq!(rig.base_url(), "http://rig.local:8001");
        assert_eq!(rig.url("/health"), "http://rig.local:8001/health");
    }
}
