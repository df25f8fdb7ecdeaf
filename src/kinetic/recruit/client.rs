// SPDX-License-Identifier: MIT

//! Agent recruitment over HTTP

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

use super::config::RecruiterConfig;
use super::retry::RetryPolicy;
use crate::adk::context::CallContext;
use crate::adk::error::{Result, RunError};
use crate::kinetic::lifecycle::NodeLifecycleManager;
use crate::kinetic::plan::PlanNode;
use crate::kinetic::sidecar::{normalize, Sidecar, SidecarKey, SidecarStore};

const REQUEST_ID_HEADER: &str = "x-request-id";
const API_KEY_HEADER: &str = "x-api-key";
const ROLE_HEADER: &str = "x-role";

/// Description of the agent being asked for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecruitPayload {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RecruitPayload {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            domain: None,
            extra: Map::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Describe the agent a plan node needs, falling back to its kind when no
    /// role was suggested
    pub fn for_node(node: &PlanNode) -> Self {
        let role = node
            .suggested_agent_role
            .clone()
            .unwrap_or_else(|| node.kind.to_string());
        let mut payload = Self::new(role);
        if !node.title.is_empty() {
            payload.domain = Some(node.title.clone());
        }
        payload
            .extra
            .insert("node_key".to_string(), Value::String(node.id.clone()));
        if !node.acceptance.is_empty() {
            payload
                .extra
                .insert("acceptance".to_string(), Value::from(node.acceptance.clone()));
        }
        payload
    }
}

#[derive(Debug, Deserialize)]
struct RecruitResponse {
    agent_id: String,
    #[serde(default)]
    sidecar: Value,
}

/// A completed recruitment
#[derive(Debug, Clone, PartialEq)]
pub struct Recruitment {
    pub agent_id: String,
    pub sidecar: Sidecar,
    /// Where the sidecar was persisted
    pub sidecar_path: PathBuf,
}

/// Client for the external recruitment endpoint
pub struct AgentRecruiter {
    client: Client,
    config: RecruiterConfig,
    policy: RetryPolicy,
    store: Arc<dyn SidecarStore>,
}

impl AgentRecruiter {
    pub fn new(config: RecruiterConfig, store: Arc<dyn SidecarStore>) -> Self {
        Self {
            client: Client::new(),
            config,
            policy: RetryPolicy::default(),
            store,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Recruit an agent and persist the normalized recruitment sidecar.
    ///
    /// `ctx.request_id` is sent as `X-Request-ID` and keys the stored sidecar
    /// together with `ctx.run_id`. The network phase, retries included, is
    /// bounded by the configured timeout.
    pub async fn recruit(&self, ctx: &CallContext, payload: &RecruitPayload) -> Result<Recruitment> {
        log::info!("[{}] Recruiting agent for role '{}'", ctx, payload.role);

        let response = tokio::time::timeout(self.config.timeout, self.call_with_retry(ctx, payload))
            .await
            .map_err(|_| {
                log::warn!("[{}] Recruitment timed out after {:?}", ctx, self.config.timeout);
                RunError::Timeout(self.config.timeout)
            })??;

        let run_id = ctx.run_id.map(|id| id.to_string());
        let node_id = ctx.node_id.map(|id| id.to_string());
        let sidecar = normalize(&response.sidecar, run_id.as_deref(), node_id.as_deref());
        let key = SidecarKey::Recruitment {
            run_id: ctx.run_id,
            request_id: ctx.request_id.clone(),
        };
        let sidecar_path = self.store.write(&key, &sidecar).await?;

        log::info!("[{}] Recruited agent {}", ctx, response.agent_id);
        Ok(Recruitment {
            agent_id: response.agent_id,
            sidecar,
            sidecar_path,
        })
    }

    /// Recruit for a node and attach the agent to it.
    ///
    /// The node stays unassigned, and unlocked, for the whole network phase;
    /// the agent is attached only once the sidecar is on disk.
    pub async fn recruit_for_node(
        &self,
        ctx: &CallContext,
        manager: &NodeLifecycleManager,
        node_id: &str,
        payload: &RecruitPayload,
    ) -> Result<Recruitment> {
        let instance_id = manager.instance_id(node_id)?;
        let mut ctx = ctx.clone().with_node(instance_id);
        if ctx.run_id.is_none() {
            ctx = ctx.with_run(manager.run_id());
        }

        let recruitment = self.recruit(&ctx, payload).await?;
        manager.assign_agent(node_id, recruitment.agent_id.clone())?;
        Ok(recruitment)
    }

    async fn call_with_retry(
        &self,
        ctx: &CallContext,
        payload: &RecruitPayload,
    ) -> Result<RecruitResponse> {
        let headers = self.headers(ctx)?;
        let mut attempt = 0;

        loop {
            let response = self
                .client
                .post(self.config.endpoint.clone())
                .headers(headers.clone())
                .json(payload)
                .send()
                .await
                .map_err(|e| RunError::dependency(None, format!("recruiter unreachable: {}", e)))?;

            let status = response.status();
            if status.is_success() {
                return response.json::<RecruitResponse>().await.map_err(|e| {
                    RunError::dependency(Some(status.as_u16()), format!("invalid recruiter response: {}", e))
                });
            }

            let body = response.text().await.unwrap_or_default();
            if !RetryPolicy::is_retryable(status) {
                log::warn!("[{}] Recruiter rejected request with {}", ctx, status);
                return Err(failure(status, &body));
            }

            match self.policy.delay_after(attempt) {
                Some(delay) => {
                    attempt += 1;
                    log::warn!(
                        "[{}] Recruiter returned {}, retry {}/{} in {:?}",
                        ctx,
                        status,
                        attempt,
                        self.policy.max_attempts() - 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    log::error!(
                        "[{}] Recruiter still failing after {} attempts",
                        ctx,
                        attempt + 1
                    );
                    return Err(failure(status, &body));
                }
            }
        }
    }

    fn headers(&self, ctx: &CallContext) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, REQUEST_ID_HEADER, &ctx.request_id)?;
        if let Some(api_key) = &self.config.api_key {
            insert_header(&mut headers, API_KEY_HEADER, api_key)?;
        }
        if let Some(role) = &self.config.role {
            insert_header(&mut headers, ROLE_HEADER, role)?;
        }
        Ok(headers)
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| RunError::validation(format!("invalid value for header {}", name)))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

fn failure(status: StatusCode, body: &str) -> RunError {
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("recruitment failed")
            .to_string()
    } else {
        body.trim().chars().take(200).collect()
    };
    RunError::dependency(Some(status.as_u16()), message)
}
