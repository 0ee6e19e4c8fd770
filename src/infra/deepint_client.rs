use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::app::ports::SourceUpdatePort;
use crate::batch::Batch;
use crate::constants::{DEEPINT_AUTH_HEADER, DEEPINT_ORGANIZATION_HEADER};
use crate::error::PublishError;
use crate::types::{RouteIdentity, TaskStatus, UpdateMode, UpdateTask};

/// API token for Deep Intelligence. Never printed.
#[derive(Clone)]
pub struct DeepintCredentials {
    token: String,
}

impl DeepintCredentials {
    pub fn build(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for DeepintCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeepintCredentials(<redacted>)")
    }
}

#[derive(Debug, Serialize)]
struct UpdateInstancesRequest<'a> {
    replace: bool,
    pk: Option<&'a str>,
    date_format: Option<&'a str>,
    separator: &'a str,
    quotes: &'a str,
    csv: String,
}

#[derive(Debug, Deserialize)]
struct TaskCreated {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskInfo {
    status: String,
    #[serde(default)]
    error_code: Option<serde_json::Value>,
    #[serde(default)]
    error_description: Option<String>,
}

impl TaskInfo {
    fn status(&self) -> TaskStatus {
        match self.status.as_str() {
            "success" => TaskStatus::Success,
            "failed" => {
                let message = self
                    .error_description
                    .clone()
                    .or_else(|| self.error_code.as_ref().map(|c| c.to_string()))
                    .unwrap_or_else(|| "unknown error".to_string());
                TaskStatus::Failed(message)
            }
            _ => TaskStatus::Pending,
        }
    }
}

/// HTTP client for a Deep Intelligence source's instances endpoint.
pub struct DeepintSourceClient {
    client: reqwest::Client,
    api_url: String,
    credentials: DeepintCredentials,
    task_poll_interval: Duration,
    task_poll_attempts: u32,
}

impl DeepintSourceClient {
    pub fn new(
        api_url: &str,
        credentials: DeepintCredentials,
        timeout: Duration,
    ) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            credentials,
            task_poll_interval: Duration::from_secs(1),
            task_poll_attempts: 60,
        })
    }

    pub fn with_task_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.task_poll_interval = interval;
        self.task_poll_attempts = attempts.max(1);
        self
    }

    fn instances_url(&self, route: &RouteIdentity) -> String {
        format!(
            "{}/workspace/{}/source/{}/instances",
            self.api_url, route.workspace_id, route.source_id
        )
    }

    fn task_url(&self, route: &RouteIdentity, task_id: &str) -> String {
        format!(
            "{}/workspace/{}/task/{}",
            self.api_url, route.workspace_id, task_id
        )
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        route: &RouteIdentity,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header(DEEPINT_AUTH_HEADER, &self.credentials.token)
            .header(DEEPINT_ORGANIZATION_HEADER, &route.organization_id)
    }

    async fn fetch_task(
        &self,
        route: &RouteIdentity,
        task_id: &str,
    ) -> Result<TaskInfo, PublishError> {
        let resp = self
            .request(reqwest::Method::GET, &self.task_url(route, task_id), route)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        resp.json::<TaskInfo>()
            .await
            .map_err(|e| PublishError::Response(format!("task {}: {}", task_id, e)))
    }
}

#[async_trait]
impl SourceUpdatePort for DeepintSourceClient {
    #[instrument(skip_all, fields(source_id = %route.source_id, rows = batch.len()))]
    async fn update_instances(
        &self,
        route: &RouteIdentity,
        batch: &Batch,
        mode: UpdateMode,
    ) -> Result<UpdateTask, PublishError> {
        let body = UpdateInstancesRequest {
            replace: mode.replace(),
            pk: None,
            date_format: None,
            separator: ",",
            quotes: "\"",
            csv: batch.to_csv()?,
        };

        let resp = self
            .request(reqwest::Method::POST, &self.instances_url(route), route)
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        let created = resp
            .json::<TaskCreated>()
            .await
            .map_err(|e| PublishError::Response(e.to_string()))?;

        debug!(task_id = %created.task_id, "source update accepted");
        Ok(UpdateTask {
            task_id: created.task_id,
        })
    }

    async fn resolve_task(
        &self,
        route: &RouteIdentity,
        task: &UpdateTask,
    ) -> Result<TaskStatus, PublishError> {
        for attempt in 1..=self.task_poll_attempts {
            let status = self.fetch_task(route, &task.task_id).await?.status();
            if status != TaskStatus::Pending {
                return Ok(status);
            }
            debug!(task_id = %task.task_id, attempt, "task still pending");
            if attempt < self.task_poll_attempts {
                tokio::time::sleep(self.task_poll_interval).await;
            }
        }
        Ok(TaskStatus::Pending)
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, PublishError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(PublishError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `responses` in order, one per connection, returning the raw requests.
    async fn serve(
        responses: Vec<(u16, String)>,
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/v1/", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut stream).await);
                let response = format!(
                    concat!(
                        "HTTP/1.1 {} OK\r\n",
                        "Content-Type: application/json\r\n",
                        "Content-Length: {}\r\n",
                        "Connection: close\r\n\r\n{}"
                    ),
                    status,
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).await.unwrap();
                let _ = stream.shutdown().await;
            }
            requests
        });
        (url, handle)
    }

    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let lower = l.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn route() -> RouteIdentity {
        RouteIdentity::new("org-1", "ws-1", "src-1")
    }

    fn batch() -> Batch {
        let record = json!({"co2": 410, "ts": 1000});
        Batch::from_records(vec![record.as_object().unwrap().clone()])
    }

    fn client(url: &str) -> DeepintSourceClient {
        DeepintSourceClient::new(
            url,
            DeepintCredentials::build("secret-token"),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_task_polling(Duration::from_millis(10), 3)
    }

    #[tokio::test]
    async fn test_update_posts_csv_with_route_headers() {
        let (url, server) = serve(vec![(200, json!({"task_id": "t-42"}).to_string())]).await;

        let task = client(&url)
            .update_instances(&route(), &batch(), UpdateMode::Append)
            .await
            .unwrap();

        assert_eq!(task.task_id, "t-42");
        let requests = server.await.unwrap();
        let request = &requests[0];
        assert!(request.starts_with("POST /api/v1/workspace/ws-1/source/src-1/instances "));
        assert!(request.contains("x-auth-token: secret-token"));
        assert!(request.contains("x-deepint-organization: org-1"));

        let body: serde_json::Value =
            serde_json::from_str(&request[request.find("\r\n\r\n").unwrap() + 4..]).unwrap();
        assert_eq!(body["replace"], json!(false));
        assert_eq!(body["csv"], json!("co2,ts\n410,1000\n"));
    }

    #[tokio::test]
    async fn test_rejected_update_reports_status() {
        let (url, server) = serve(vec![(401, json!({"message": "bad token"}).to_string())]).await;

        let err = client(&url)
            .update_instances(&route(), &batch(), UpdateMode::Replace)
            .await
            .unwrap_err();

        match err {
            PublishError::Rejected { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("bad token"));
            }
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_polls_until_terminal() {
        let (url, server) = serve(vec![
            (200, json!({"status": "pending"}).to_string()),
            (200, json!({"status": "success"}).to_string()),
        ])
        .await;
        let task = UpdateTask {
            task_id: "t-42".to_string(),
        };

        let status = client(&url).resolve_task(&route(), &task).await.unwrap();

        assert_eq!(status, TaskStatus::Success);
        let requests = server.await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with("GET /api/v1/workspace/ws-1/task/t-42 "));
    }

    #[tokio::test]
    async fn test_failed_task_carries_description() {
        let (url, server) = serve(vec![(
            200,
            json!({"status": "failed", "error_description": "column mismatch"}).to_string(),
        )])
        .await;
        let task = UpdateTask {
            task_id: "t-1".to_string(),
        };

        let status = client(&url).resolve_task(&route(), &task).await.unwrap();

        assert_eq!(status, TaskStatus::Failed("column mismatch".to_string()));
        server.await.unwrap();
    }

    #[test]
    fn test_credentials_are_redacted() {
        let rendered = format!("{:?}", DeepintCredentials::build("secret-token"));
        assert!(!rendered.contains("secret-token"));
    }
}
