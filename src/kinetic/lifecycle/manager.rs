// SPDX-License-Identifier: MIT

//! Per-node lifecycle state machine for one run
//!
//! Every node gets its own lock. A transition (read status, check, write) runs
//! entirely under that lock, so concurrent actions on one node linearize while
//! actions on different nodes never contend.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::state::{ActionOutcome, ControlAction, NodeRuntimeState, NodeStatus};
use crate::adk::context::CallContext;
use crate::adk::error::{Result, RunError};
use crate::kinetic::plan::ExecutionGraph;
use crate::kinetic::sidecar::{normalize, SidecarKey, SidecarStore};

/// Payload keys accepted as replacement prompt content for `override`
const OVERRIDE_PROMPT_KEYS: &[&str] = &["prompt", "content"];

/// Replacement content carried by an `override` action
#[derive(Debug, Clone, PartialEq)]
struct OverrideRequest {
    prompt: String,
    system: Option<String>,
    model: Option<String>,
}

impl OverrideRequest {
    fn from_payload(payload: &Value) -> Result<Self> {
        let text = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let prompt = OVERRIDE_PROMPT_KEYS
            .iter()
            .find_map(|key| text(key))
            .ok_or_else(|| {
                RunError::validation("override requires a non-empty 'prompt' or 'content'")
            })?;

        Ok(Self {
            prompt,
            system: text("system"),
            model: text("model"),
        })
    }
}

/// Lifecycle manager for the nodes of a single run
pub struct NodeLifecycleManager {
    run_id: Uuid,
    graph: Arc<ExecutionGraph>,
    nodes: HashMap<String, Mutex<NodeRuntimeState>>,
    store: Option<Arc<dyn SidecarStore>>,
}

impl NodeLifecycleManager {
    /// Create runtime state for every node of `graph`, all starting `queued`
    pub fn new(run_id: Uuid, graph: Arc<ExecutionGraph>) -> Self {
        let nodes = graph
            .iter()
            .map(|n| (n.id.clone(), Mutex::new(NodeRuntimeState::new())))
            .collect();
        Self {
            run_id,
            graph,
            nodes,
            store: None,
        }
    }

    /// Persist a fresh sidecar whenever an `override` is accepted
    pub fn with_store(mut self, store: Arc<dyn SidecarStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    /// Apply an external control action to one node.
    ///
    /// Unknown action names and malformed override payloads fail with
    /// `Validation`, unknown nodes with `NotFound`, illegal transitions with
    /// `Conflict`. Nothing changes on failure.
    pub async fn apply(
        &self,
        ctx: &CallContext,
        node_id: &str,
        action: &str,
        payload: &Value,
    ) -> Result<ActionOutcome> {
        let action: ControlAction = action.parse()?;
        let slot = self.slot(node_id)?;

        let override_request = match action {
            ControlAction::Override => Some(OverrideRequest::from_payload(payload)?),
            _ => None,
        };

        // Override is accepted from every status, so its sidecar can be written
        // before the transition without risking a conflict afterwards
        let sidecar_updated = match &override_request {
            Some(request) => self.write_override_sidecar(ctx, node_id, request).await,
            None => false,
        };

        let mut state = lock(slot);
        if !action.allowed_from(state.status) {
            log::info!(
                "[{}] Rejected {} on node {} ({})",
                ctx,
                action,
                node_id,
                state.status
            );
            return Err(RunError::Conflict {
                node_id: node_id.to_string(),
                status: state.status,
                action: action.to_string(),
            });
        }

        let outcome = ActionOutcome {
            status_after: action.target(),
            sidecar_updated,
        };
        log::info!(
            "[{}] Node {}: {} -> {} via {}",
            ctx,
            node_id,
            state.status,
            outcome.status_after,
            action
        );
        state.status = outcome.status_after;
        state.last_action = Some((action, outcome));
        Ok(outcome)
    }

    /// Engine hook: a queued node starts running
    pub fn dispatch(&self, node_id: &str) -> Result<NodeStatus> {
        self.transition(node_id, "dispatch", NodeStatus::Running, |s| {
            s == NodeStatus::Queued
        })
    }

    /// Engine hook: a running node finished successfully
    pub fn complete(&self, node_id: &str) -> Result<NodeStatus> {
        self.transition(node_id, "complete", NodeStatus::Completed, |s| {
            s == NodeStatus::Running
        })
    }

    /// Engine hook: a running or paused node failed
    pub fn fail(&self, node_id: &str) -> Result<NodeStatus> {
        self.transition(node_id, "fail", NodeStatus::Failed, |s| {
            matches!(s, NodeStatus::Running | NodeStatus::Paused)
        })
    }

    pub fn status(&self, node_id: &str) -> Result<NodeStatus> {
        Ok(lock(self.slot(node_id)?).status)
    }

    /// Copy of the node's full runtime state
    pub fn snapshot(&self, node_id: &str) -> Result<NodeRuntimeState> {
        Ok(lock(self.slot(node_id)?).clone())
    }

    /// Attach a recruited agent to a node
    pub fn assign_agent(&self, node_id: &str, agent_id: impl Into<String>) -> Result<()> {
        let agent_id = agent_id.into();
        let mut state = lock(self.slot(node_id)?);
        log::info!("Node {} assigned agent {}", node_id, agent_id);
        state.assigned_agent = Some(agent_id);
        Ok(())
    }

    pub fn assigned_agent(&self, node_id: &str) -> Result<Option<String>> {
        Ok(lock(self.slot(node_id)?).assigned_agent.clone())
    }

    /// Storage identifier of the node instance
    pub fn instance_id(&self, node_id: &str) -> Result<Uuid> {
        Ok(lock(self.slot(node_id)?).instance_id)
    }

    fn slot(&self, node_id: &str) -> Result<&Mutex<NodeRuntimeState>> {
        self.nodes
            .get(node_id)
            .ok_or_else(|| RunError::node_not_found(node_id))
    }

    fn transition(
        &self,
        node_id: &str,
        label: &str,
        target: NodeStatus,
        allowed: impl Fn(NodeStatus) -> bool,
    ) -> Result<NodeStatus> {
        let mut state = lock(self.slot(node_id)?);
        if !allowed(state.status) {
            return Err(RunError::Conflict {
                node_id: node_id.to_string(),
                status: state.status,
                action: label.to_string(),
            });
        }
        log::debug!("Node {}: {} -> {} via {}", node_id, state.status, target, label);
        state.status = target;
        Ok(target)
    }

    /// Best effort: a failed write is logged and reported as `false`
    async fn write_override_sidecar(
        &self,
        ctx: &CallContext,
        node_id: &str,
        request: &OverrideRequest,
    ) -> bool {
        let Some(store) = &self.store else {
            return false;
        };

        let model = request.model.clone().or_else(|| {
            self.graph
                .get(node_id)
                .and_then(|n| n.llm.get("model"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        let instance_id = match self.instance_id(node_id) {
            Ok(id) => id.to_string(),
            Err(_) => return false,
        };
        let raw = json!({
            "model": model,
            "prompts": {
                "system": request.system.clone().unwrap_or_default(),
                "user": request.prompt,
            },
        });
        let sidecar = normalize(&raw, Some(&self.run_id.to_string()), Some(&instance_id));
        let key = SidecarKey::Node {
            run_id: self.run_id,
            node_key: node_id.to_string(),
        };

        match store.write(&key, &sidecar).await {
            Ok(path) => {
                log::debug!("[{}] Override sidecar written to {}", ctx, path.display());
                true
            }
            Err(e) => {
                log::warn!("[{}] Failed to write override sidecar for {}: {}", ctx, node_id, e);
                false
            }
        }
    }
}

fn lock(slot: &Mutex<NodeRuntimeState>) -> MutexGuard<'_, NodeRuntimeState> {
    // State stays consistent even if a holder panicked: every write is a single assignment
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::ErrorKind;
    use crate::kinetic::plan::compile_value;
    use crate::kinetic::sidecar::{FsSidecarStore, Sidecar};
    use async_trait::async_trait;
    use std::path::PathBuf;

    fn graph() -> Arc<ExecutionGraph> {
        Arc::new(
            compile_value(&json!({"plan": [
                {"id": "draft", "llm": {"model": "gpt-4o"}},
                {"id": "review", "deps": ["draft"]}
            ]}))
            .unwrap(),
        )
    }

    fn running_manager() -> NodeLifecycleManager {
        let manager = NodeLifecycleManager::new(Uuid::new_v4(), graph());
        manager.dispatch("draft").unwrap();
        manager
    }

    async fn apply(manager: &NodeLifecycleManager, node: &str, action: &str) -> Result<ActionOutcome> {
        manager
            .apply(&CallContext::new(), node, action, &Value::Null)
            .await
    }

    #[tokio::test]
    async fn test_pause_once_then_conflict() {
        let manager = running_manager();

        let outcome = apply(&manager, "draft", "pause").await.unwrap();
        assert_eq!(outcome.status_after, NodeStatus::Paused);
        assert!(!outcome.sidecar_updated);

        let err = apply(&manager, "draft", "pause").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(manager.status("draft").unwrap(), NodeStatus::Paused);
    }

    #[tokio::test]
    async fn test_resume_requires_paused() {
        let manager = running_manager();

        let err = apply(&manager, "draft", "resume").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        apply(&manager, "draft", "pause").await.unwrap();
        let outcome = apply(&manager, "draft", "resume").await.unwrap();
        assert_eq!(outcome.status_after, NodeStatus::Running);
        assert_eq!(manager.status("draft").unwrap(), NodeStatus::Running);
    }

    #[tokio::test]
    async fn test_pause_queued_node_conflicts() {
        let manager = NodeLifecycleManager::new(Uuid::new_v4(), graph());
        let err = apply(&manager, "review", "pause").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_skip_non_terminal_only() {
        let manager = running_manager();
        apply(&manager, "draft", "pause").await.unwrap();
        let outcome = apply(&manager, "draft", "skip").await.unwrap();
        assert_eq!(outcome.status_after, NodeStatus::Skipped);

        let err = apply(&manager, "draft", "skip").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // Queued nodes may be skipped before they ever run
        let outcome = apply(&manager, "review", "skip").await.unwrap();
        assert_eq!(outcome.status_after, NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_completed_node_cannot_be_skipped() {
        let manager = running_manager();
        manager.complete("draft").unwrap();
        let err = apply(&manager, "draft", "skip").await.unwrap_err();
        assert!(matches!(
            err,
            RunError::Conflict {
                status: NodeStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_action_is_validation_error() {
        let manager = running_manager();
        for node in ["draft", "missing"] {
            let err = apply(&manager, node, "restart").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        let err = apply(&manager, "draft", "Pause").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(manager.status("draft").unwrap(), NodeStatus::Running);
    }

    #[tokio::test]
    async fn test_unknown_node_is_not_found() {
        let manager = running_manager();
        for action in ["pause", "resume", "skip", "override"] {
            let err = manager
                .apply(&CallContext::new(), "ghost", action, &json!({"prompt": "x"}))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound, "action {action}");
        }
    }

    #[tokio::test]
    async fn test_override_requires_prompt() {
        let manager = running_manager();
        for payload in [Value::Null, json!({}), json!({"prompt": "   "}), json!({"prompt": 3})] {
            let err = manager
                .apply(&CallContext::new(), "draft", "override", &payload)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert_eq!(manager.status("draft").unwrap(), NodeStatus::Running);
    }

    #[tokio::test]
    async fn test_override_requeues_without_store() {
        let manager = running_manager();
        manager.complete("draft").unwrap();

        let outcome = manager
            .apply(&CallContext::new(), "draft", "override", &json!({"content": "try again"}))
            .await
            .unwrap();
        assert_eq!(outcome.status_after, NodeStatus::Queued);
        assert!(!outcome.sidecar_updated);

        let snapshot = manager.snapshot("draft").unwrap();
        assert_eq!(snapshot.last_action, Some((ControlAction::Override, outcome)));
    }

    #[tokio::test]
    async fn test_override_writes_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsSidecarStore::new(dir.path()));
        let manager = NodeLifecycleManager::new(Uuid::new_v4(), graph()).with_store(store.clone());
        manager.dispatch("draft").unwrap();

        let outcome = manager
            .apply(
                &CallContext::new(),
                "draft",
                "override",
                &json!({"prompt": "Write it shorter", "system": "You are terse"}),
            )
            .await
            .unwrap();
        assert!(outcome.sidecar_updated);

        let path = store.path_for(&SidecarKey::Node {
            run_id: manager.run_id(),
            node_key: "draft".to_string(),
        });
        let sidecar: Sidecar = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(sidecar.prompts.user, "Write it shorter");
        assert_eq!(sidecar.prompts.system, "You are terse");
        assert_eq!(sidecar.model, "gpt-4o");
        assert_eq!(sidecar.run_id, Some(manager.run_id()));
        assert_eq!(sidecar.node_id, Some(manager.instance_id("draft").unwrap()));
    }

    struct FailingStore;

    #[async_trait]
    impl SidecarStore for FailingStore {
        async fn write(&self, _key: &SidecarKey, _sidecar: &Sidecar) -> Result<PathBuf> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }
    }

    #[tokio::test]
    async fn test_override_survives_store_failure() {
        let manager =
            NodeLifecycleManager::new(Uuid::new_v4(), graph()).with_store(Arc::new(FailingStore));
        let outcome = manager
            .apply(&CallContext::new(), "review", "override", &json!({"prompt": "again"}))
            .await
            .unwrap();
        assert_eq!(outcome.status_after, NodeStatus::Queued);
        assert!(!outcome.sidecar_updated);
    }

    #[tokio::test]
    async fn test_concurrent_pause_yields_one_conflict() {
        for _ in 0..50 {
            let manager = Arc::new(running_manager());
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let manager = manager.clone();
                    tokio::spawn(async move {
                        manager
                            .apply(&CallContext::new(), "draft", "pause", &Value::Null)
                            .await
                    })
                })
                .collect();

            let mut ok = 0;
            let mut conflicts = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => ok += 1,
                    Err(e) if e.kind() == ErrorKind::Conflict => conflicts += 1,
                    Err(e) => panic!("unexpected error {e}"),
                }
            }
            assert_eq!((ok, conflicts), (1, 1));
        }
    }

    #[test]
    fn test_engine_hooks() {
        let manager = NodeLifecycleManager::new(Uuid::new_v4(), graph());
        assert_eq!(manager.status("review").unwrap(), NodeStatus::Queued);
        assert!(manager.complete("review").is_err());
        assert_eq!(manager.dispatch("review").unwrap(), NodeStatus::Running);
        assert!(manager.dispatch("review").is_err());
        assert_eq!(manager.fail("review").unwrap(), NodeStatus::Failed);
        assert!(matches!(
            manager.dispatch("nope"),
            Err(RunError::NotFound { .. })
        ));
    }

    #[test]
    fn test_assign_agent() {
        let manager = NodeLifecycleManager::new(Uuid::new_v4(), graph());
        assert_eq!(manager.assigned_agent("draft").unwrap(), None);
        manager.assign_agent("draft", "agent-42").unwrap();
        assert_eq!(
            manager.assigned_agent("draft").unwrap().as_deref(),
            Some("agent-42")
        );
        assert!(manager.assign_agent("ghost", "x").is_err());
    }
}
