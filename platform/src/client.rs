//! REST and SSE client for the automation platform.

use std::time::Duration;

use reqwest::{header, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::{
    error::{PlatformError, PlatformResult},
    sse::{frame_stream, FrameStream},
    types::{
        Agent, CreateSourceOptions, DiscoverSourceRequest, Integration, KnowledgeItem,
        KnowledgeQueryRequest, PolicyVerdict, Runner, Secret, Source, SourceMetadata,
        ToolDefinition,
    },
    workflow::WorkflowClient,
};

/// Default wall-clock limit for plain REST round-trips. Streaming
/// requests only bound the connect phase.
const REST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl PlatformClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> PlatformResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| PlatformError::BaseUrl(e.to_string()))?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("automcp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Workflow execution surface, sharing this client's connection pool.
    pub fn workflow_client(&self) -> WorkflowClient {
        WorkflowClient::new(self.clone())
    }

    fn endpoint(&self, segments: &[&str]) -> PlatformResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PlatformError::BaseUrl("base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }
        builder
    }

    async fn check(&self, response: Response) -> PlatformResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(body));
        }
        Err(PlatformError::api(status.as_u16(), body))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> PlatformResult<T> {
        let url = self.endpoint(segments)?;
        debug!(%url, "Platform GET");
        let response = self
            .request(reqwest::Method::GET, url)
            .timeout(REST_TIMEOUT)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &serde_json::Value,
    ) -> PlatformResult<T> {
        let url = self.endpoint(segments)?;
        debug!(%url, "Platform POST");
        let response = self
            .request(reqwest::Method::POST, url)
            .timeout(REST_TIMEOUT)
            .json(body)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    pub(crate) async fn post_stream(
        &self,
        segments: &[&str],
        body: &serde_json::Value,
    ) -> PlatformResult<FrameStream> {
        let url = self.endpoint(segments)?;
        debug!(%url, "Platform POST (stream)");
        let response = self
            .request(reqwest::Method::POST, url)
            .header(header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await?;
        Ok(frame_stream(self.check(response).await?))
    }

    // --- Runners ---

    pub async fn list_runners(&self) -> PlatformResult<Vec<Runner>> {
        self.get_json(&["runners"]).await
    }

    pub async fn get_runner(&self, name: &str) -> PlatformResult<Runner> {
        self.get_json(&["runners", name]).await
    }

    /// Register a new runner. Returns the created runner record.
    pub async fn create_runner(&self, name: &str) -> PlatformResult<Runner> {
        self.post_json(&["runners"], &json!({ "name": name })).await
    }

    pub async fn delete_runner(&self, name: &str) -> PlatformResult<()> {
        let url = self.endpoint(&["runners", name])?;
        let response = self
            .request(reqwest::Method::DELETE, url)
            .timeout(REST_TIMEOUT)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    // --- Sources ---

    pub async fn list_sources(&self) -> PlatformResult<Vec<Source>> {
        self.get_json(&["sources"]).await
    }

    pub async fn get_source(&self, uuid: &str) -> PlatformResult<Source> {
        self.get_json(&["sources", uuid]).await
    }

    pub async fn get_source_by_url(&self, source_url: &str) -> PlatformResult<Source> {
        let mut url = self.endpoint(&["sources"])?;
        url.query_pairs_mut().append_pair("url", source_url);
        let response = self
            .request(reqwest::Method::GET, url)
            .timeout(REST_TIMEOUT)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    pub async fn get_source_metadata(&self, uuid: &str) -> PlatformResult<SourceMetadata> {
        self.get_json(&["sources", uuid, "metadata"]).await
    }

    pub async fn discover_source(
        &self,
        request: &DiscoverSourceRequest,
    ) -> PlatformResult<SourceMetadata> {
        self.post_json(&["sources", "discover"], &serde_json::to_value(request)?)
            .await
    }

    pub async fn create_source(
        &self,
        url: &str,
        options: &CreateSourceOptions,
    ) -> PlatformResult<Source> {
        let mut body = serde_json::to_value(options)?;
        body["url"] = json!(url);
        self.post_json(&["sources"], &body).await
    }

    // --- Agents ---

    pub async fn list_agents(&self) -> PlatformResult<Vec<Agent>> {
        self.get_json(&["agents"]).await
    }

    /// Chat with an agent. The response is an execution stream of `data`
    /// chunks ending in a terminal event.
    pub async fn send_message(
        &self,
        agent: &str,
        text: &str,
        session_id: Option<&str>,
    ) -> PlatformResult<FrameStream> {
        let body = json!({
            "message": text,
            "session_id": session_id,
        });
        self.post_stream(&["agents", agent, "chat"], &body).await
    }

    // --- Integrations ---

    pub async fn list_integrations(&self) -> PlatformResult<Vec<Integration>> {
        self.get_json(&["integrations"]).await
    }

    /// Returns the GitHub App installation URL.
    pub async fn create_github_integration(&self) -> PlatformResult<String> {
        #[derive(serde::Deserialize)]
        struct Created {
            installation_url: String,
        }
        let created: Created = self
            .post_json(&["integrations", "github"], &json!({}))
            .await?;
        Ok(created.installation_url)
    }

    // --- Secrets ---

    pub async fn list_secrets(&self) -> PlatformResult<Vec<Secret>> {
        self.get_json(&["secrets"]).await
    }

    // --- Knowledge ---

    pub async fn list_knowledge(
        &self,
        query: &str,
        limit: Option<u32>,
    ) -> PlatformResult<Vec<KnowledgeItem>> {
        let mut url = self.endpoint(&["knowledge"])?;
        {
            let mut pairs = url.query_pairs_mut();
            if !query.is_empty() {
                pairs.append_pair("query", query);
            }
            if let Some(limit) = limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        let response = self
            .request(reqwest::Method::GET, url)
            .timeout(REST_TIMEOUT)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    pub async fn get_knowledge(&self, uuid: &str) -> PlatformResult<KnowledgeItem> {
        self.get_json(&["knowledge", uuid]).await
    }

    pub async fn knowledge_query(
        &self,
        request: &KnowledgeQueryRequest,
    ) -> PlatformResult<FrameStream> {
        self.post_stream(&["knowledge", "query"], &serde_json::to_value(request)?)
            .await
    }

    /// Query the composer's example library.
    pub async fn query_examples(
        &self,
        query: &str,
        limit: u32,
    ) -> PlatformResult<serde_json::Value> {
        let mut url = self.endpoint(&["examples"])?;
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("limit", &limit.to_string());
        let response = self
            .request(reqwest::Method::GET, url)
            .timeout(REST_TIMEOUT)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    // --- Policy ---

    pub async fn validate_tool_execution(
        &self,
        name: &str,
        args: &serde_json::Map<String, serde_json::Value>,
        runner: &str,
    ) -> PlatformResult<PolicyVerdict> {
        let body = json!({
            "tool_name": name,
            "args": args,
            "runner": runner,
        });
        self.post_json(&["policy", "validate-tool"], &body).await
    }

    pub async fn validate_workflow_execution(
        &self,
        definition: &serde_json::Value,
        params: &serde_json::Map<String, serde_json::Value>,
        runner: &str,
    ) -> PlatformResult<PolicyVerdict> {
        let body = json!({
            "definition": definition,
            "params": params,
            "runner": runner,
        });
        self.post_json(&["policy", "validate-workflow"], &body)
            .await
    }

    // --- Execution ---

    /// Dispatch a tool and stream its execution events.
    pub async fn execute_tool_with_timeout(
        &self,
        name: &str,
        definition: &ToolDefinition,
        runner: &str,
        timeout: Duration,
        arg_values: &serde_json::Map<String, serde_json::Value>,
    ) -> PlatformResult<FrameStream> {
        let body = json!({
            "tool_name": name,
            "tool_def": definition,
            "runner": runner,
            "timeout_seconds": timeout.as_secs(),
            "arg_values": arg_values,
        });
        self.post_stream(&["tools", "execute"], &body).await
    }
}
