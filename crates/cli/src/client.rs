//! API client for communicating with the bandwidth agent

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the agent's HTTP API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// GET a probe endpoint, which answers 503 with a regular body
    pub async fn probe<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        let body = response.json().await.context("Failed to parse response")?;
        Ok((status, body))
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn plan(&self) -> Result<PlanReport> {
        self.get("api/v1/plan").await
    }

    pub async fn domains(&self) -> Result<Vec<DomainView>> {
        self.get("api/v1/domains").await
    }

    pub async fn adjust(&self) -> Result<AdjustResponse> {
        self.post("api/v1/adjust", &serde_json::json!({})).await
    }

    pub async fn admit(&self, request: &AdmissionRequest) -> Result<AdmissionOutcome> {
        self.post("api/v1/admit", request).await
    }

    pub async fn health(&self) -> Result<(StatusCode, HealthResponse)> {
        self.probe("healthz").await
    }

    pub async fn readiness(&self) -> Result<(StatusCode, ReadinessResponse)> {
        self.probe("readyz").await
    }
}

// API response types. QoS groups are kept as their string keys
// (`system`, `dedicated`, `shared_<weight>`).

/// Ceilings per QoS group per CCD, MBps
pub type CeilingMap = BTreeMap<String, BTreeMap<u32, u64>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub plan: CeilingMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupUsage {
    #[serde(default)]
    pub ccd_mb: BTreeMap<u32, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub timestamp: Option<String>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainBudget {
    pub domain: u32,
    pub total_mb: u64,
    #[serde(default)]
    pub preempted_nodes: Vec<u32>,
    pub plannable_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReport {
    pub plan: Plan,
    pub usage: UsageSnapshot,
    #[serde(default)]
    pub node_usage_mb: BTreeMap<u32, u64>,
    #[serde(default)]
    pub budgets: Vec<DomainBudget>,
    #[serde(default)]
    pub preempted_nodes: Vec<u32>,
    pub generated_at: String,
    pub written: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainView {
    pub id: u32,
    pub nodes: Vec<u32>,
    pub ccds: Vec<u32>,
    pub budget: DomainBudget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustResponse {
    pub queued: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRequest {
    pub pod_uid: String,
    pub pod_namespace: String,
    pub pod_name: String,
    pub container_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdmissionOutcome {
    Skipped,
    Admitted,
    Preempted {
        newly_preempted: Vec<u32>,
        adjust_queued: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "plan": {"plan": {"dedicated": {"0": 30000}, "shared_30": {"0": 25000, "1": 10000}}},
        "usage": {"timestamp": "2024-05-01T10:00:00Z", "groups": {"shared_30": {"ccd_mb": {"0": 4200}}}},
        "node_usage_mb": {"0": 4200},
        "budgets": [{"domain": 0, "total_mb": 120000, "preempted_nodes": [1], "plannable_mb": 114000}],
        "preempted_nodes": [1],
        "generated_at": "2024-05-01T10:00:00Z",
        "written": true
    }"#;

    #[tokio::test]
    async fn test_plan_parses_agent_report() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/plan")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(REPORT)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let report = client.plan().await.unwrap();

        mock.assert_async().await;
        assert_eq!(report.plan.plan["shared_30"][&1], 10_000);
        assert_eq!(report.usage.groups["shared_30"].ccd_mb[&0], 4200);
        assert_eq!(report.budgets[0].plannable_mb, 114_000);
        assert!(report.written);
    }

    #[tokio::test]
    async fn test_plan_not_found_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/plan")
            .with_status(404)
            .with_body(r#"{"error":"no plan produced yet"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.plan().await.unwrap_err();
        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("no plan produced yet"));
    }

    #[tokio::test]
    async fn test_health_accepts_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(
                r#"{"status":"unhealthy","components":{"monitor":{"status":"unhealthy","message":"resctrl missing","last_check_timestamp":1}}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let (status, health) = client.health().await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(health.status, "unhealthy");
        assert_eq!(
            health.components["monitor"].message.as_deref(),
            Some("resctrl missing")
        );
    }

    #[tokio::test]
    async fn test_adjust_and_admit() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/adjust")
            .with_status(202)
            .with_body(r#"{"queued":true}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/api/v1/admit")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "pod_uid": "pod-1",
                "qos_level": "dedicated_cores",
                "hint": [1]
            })))
            .with_status(200)
            .with_body(r#"{"action":"preempted","newly_preempted":[1],"adjust_queued":true}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        assert!(client.adjust().await.unwrap().queued);

        let request = AdmissionRequest {
            pod_uid: "pod-1".to_string(),
            pod_namespace: "default".to_string(),
            pod_name: "socket-pod".to_string(),
            container_type: "main".to_string(),
            qos_level: Some("dedicated_cores".to_string()),
            hint: Some(vec![1]),
        };
        match client.admit(&request).await.unwrap() {
            AdmissionOutcome::Preempted {
                newly_preempted,
                adjust_queued,
            } => {
                assert_eq!(newly_preempted, vec![1]);
                assert!(adjust_queued);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
