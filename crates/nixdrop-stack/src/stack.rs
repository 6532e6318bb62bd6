//! Stack operations: refresh, up, destroy.
//!
//! Every operation holds the stack's state lock for its duration and
//! persists the state after each provider mutation, so a failure midway
//! leaves the state describing what actually exists.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::plan::{ActionType, Plan, PlanSummary};
use crate::program::{Context, Declaration};
use crate::state::{ResourceState, StackState};
use crate::types::{DropletId, DropletInfo, DropletSpec};
use crate::{
    CloudProvider, ConfigValue, Error, Program, ProviderName, Result, StackConfig, Workspace,
};

/// How long to wait for a new droplet to become active.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            attempts: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpResult {
    pub outputs: BTreeMap<String, serde_json::Value>,
    pub summary: PlanSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshResult {
    /// Resources still present at the provider.
    pub refreshed: usize,
    /// Resources that disappeared and were dropped from state.
    pub vanished: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyResult {
    pub deleted: usize,
}

/// A named stack of a project, driven by an inline program.
pub struct Stack {
    name: String,
    workspace: Workspace,
    program: Arc<dyn Program>,
    config: StackConfig,
    wait: WaitPolicy,
}

impl Stack {
    /// Select the stack, creating it in the state store if it does not
    /// exist yet. Persisted non-secret config is loaded into the stack.
    pub async fn upsert(
        workspace: Workspace,
        name: impl Into<String>,
        program: Arc<dyn Program>,
    ) -> Result<Self> {
        let name = name.into();
        let store = workspace.state();

        let lock = store.acquire_lock(&name).await?;
        let state = store.load(&name).await?;
        if !store.exists(&name) {
            store.save(&state).await?;
            info!(project = workspace.project(), stack = %name, "created stack");
        } else {
            debug!(project = workspace.project(), stack = %name, "selected stack");
        }
        lock.release().await?;

        let mut config = StackConfig::new();
        for (key, value) in &state.config {
            config.set(key.clone(), ConfigValue::plain(value.clone()))?;
        }

        Ok(Self {
            name,
            workspace,
            program,
            config,
            wait: WaitPolicy::default(),
        })
    }

    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace {
        &mut self.workspace
    }

    /// Set a config value. Non-secret values are persisted with the stack.
    pub async fn set_config(&mut self, key: &str, value: ConfigValue) -> Result<()> {
        let secret = value.is_secret();
        self.config.set(key, value)?;

        if !secret {
            let store = self.workspace.state();
            let lock = store.acquire_lock(&self.name).await?;
            let mut state = store.load(&self.name).await?;
            state.config = self.config.non_secret();
            store.save(&state).await?;
            lock.release().await?;
        }

        debug!(stack = %self.name, key, secret, "config set");
        Ok(())
    }

    /// Outputs recorded by the last operation.
    pub async fn outputs(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        Ok(self.workspace.state().load(&self.name).await?.outputs)
    }

    async fn connect(&self) -> Result<Arc<dyn CloudProvider>> {
        let plugin = self.workspace.installed_plugin(ProviderName::DigitalOcean)?;
        let provider = plugin.connect(&self.config)?;

        let account = provider.check_auth().await?;
        debug!(provider = %provider.name(), %account, "provider configured");
        Ok(provider)
    }

    /// Reconcile the recorded state with what the provider reports.
    pub async fn refresh(&self) -> Result<RefreshResult> {
        let store = self.workspace.state();
        let lock = store.acquire_lock(&self.name).await?;
        let mut state = store.load(&self.name).await?;
        let provider = self.connect().await?;

        let mut result = RefreshResult {
            refreshed: 0,
            vanished: 0,
        };

        let urns: Vec<String> = state.resources.keys().cloned().collect();
        for urn in urns {
            let Some(resource) = state.resources.get_mut(&urn) else {
                continue;
            };
            match provider.get_droplet(&resource.id).await? {
                Some(info) => {
                    resource.observe(&info);
                    result.refreshed += 1;
                }
                None => {
                    warn!(
                        %urn,
                        droplet_id = %resource.id,
                        "droplet no longer exists, dropping from state"
                    );
                    state.remove_resource(&urn);
                    result.vanished += 1;
                }
            }
        }

        state.resolve_outputs();
        store.save(&state).await?;
        lock.release().await?;

        info!(
            stack = %self.name,
            refreshed = result.refreshed,
            vanished = result.vanished,
            "refresh complete"
        );
        Ok(result)
    }

    /// Run the program and make the provider match its declarations.
    pub async fn up(&self) -> Result<UpResult> {
        let store = self.workspace.state();
        let lock = store.acquire_lock(&self.name).await?;
        let mut state = store.load(&self.name).await?;
        let provider = self.connect().await?;

        self.delete_pending(&*provider, &mut state).await?;

        let mut ctx = Context::new(self.workspace.project(), &self.name, provider.clone());
        self.program.run(&mut ctx).await?;
        let (declarations, exports) = ctx.into_parts();

        let plan = Plan::diff(&declarations, &state);
        let summary = plan.summary();
        if plan.has_changes() {
            info!(stack = %self.name, %summary, "plan");
        } else {
            info!(stack = %self.name, "no changes");
        }

        for action in &plan.actions {
            match (action.action_type, &action.declaration) {
                (ActionType::NoOp, _) => {
                    debug!(urn = %action.urn, "unchanged");
                }
                (ActionType::Create, Some(decl)) => {
                    self.create(&*provider, decl, &mut state).await?;
                }
                (ActionType::Replace, Some(decl)) => {
                    self.create(&*provider, decl, &mut state).await?;
                    self.delete_pending(&*provider, &mut state).await?;
                }
                (ActionType::Delete, _) => {
                    if let Some(resource) = state.get_resource(&action.urn) {
                        provider.delete_droplet(&resource.id).await?;
                    }
                    state.remove_resource(&action.urn);
                    store.save(&state).await?;
                }
                (_, None) => {
                    return Err(Error::State(format!(
                        "{} action for {} has no declaration",
                        action.action_type, action.urn
                    )));
                }
            }
        }

        state.exports = exports;
        state.resolve_outputs();
        store.save(&state).await?;
        lock.release().await?;

        info!(stack = %self.name, %summary, "update complete");
        Ok(UpResult {
            outputs: state.outputs,
            summary,
        })
    }

    /// Delete every recorded resource and clear the stack's outputs.
    pub async fn destroy(&self) -> Result<DestroyResult> {
        let store = self.workspace.state();
        let lock = store.acquire_lock(&self.name).await?;
        let mut state = store.load(&self.name).await?;

        let mut deleted = 0;
        if !state.resources.is_empty() || !state.pending_deletes.is_empty() {
            let provider = self.connect().await?;
            deleted += self.delete_pending(&*provider, &mut state).await?;

            let resources: Vec<(String, DropletId)> = state
                .resources
                .values()
                .map(|r| (r.urn.clone(), r.id.clone()))
                .collect();

            for (urn, id) in resources {
                provider.delete_droplet(&id).await?;
                state.remove_resource(&urn);
                store.save(&state).await?;
                deleted += 1;
            }
        }

        state.clear();
        store.save(&state).await?;
        lock.release().await?;

        info!(stack = %self.name, deleted, "destroy complete");
        Ok(DestroyResult { deleted })
    }

    /// Delete droplets left behind by replacements.
    async fn delete_pending(
        &self,
        provider: &dyn CloudProvider,
        state: &mut StackState,
    ) -> Result<usize> {
        let store = self.workspace.state();
        let pending = state.pending_deletes.clone();

        for id in &pending {
            provider.delete_droplet(id).await?;
            state.pending_deletes.retain(|p| p != id);
            store.save(state).await?;
            info!(droplet_id = %id, "replaced droplet deleted");
        }
        Ok(pending.len())
    }

    /// Create the droplet, record it right away, then wait for it to come
    /// up. A droplet that never becomes ready stays recorded so a later
    /// destroy still finds it.
    ///
    /// A droplet it replaces is queued for deletion in the same save that
    /// records the new one; if creation fails the old one stays current.
    async fn create(
        &self,
        provider: &dyn CloudProvider,
        decl: &Declaration,
        state: &mut StackState,
    ) -> Result<()> {
        let store = self.workspace.state();
        let spec = DropletSpec {
            name: physical_name(&decl.logical_name),
            image: decl.args.image.clone(),
            size: decl.args.size.clone(),
            region: decl.args.region.clone(),
            ssh_keys: decl.args.ssh_keys.clone(),
            user_data: decl.args.user_data.clone(),
        };

        let created = provider.create_droplet(&spec).await?;
        let mut resource = ResourceState::new(&decl.urn, decl.args.inputs(), &created);
        let replaced = state.get_resource(&decl.urn).map(|r| r.id.clone());
        state.set_resource(resource.clone());
        if let Some(replaced) = replaced {
            state.pending_deletes.push(replaced);
        }
        store.save(state).await?;

        if !created.is_ready() {
            let info = self.wait_until_ready(provider, &created.id).await?;
            resource.observe(&info);
            state.set_resource(resource);
            store.save(state).await?;
        }

        info!(urn = %decl.urn, droplet_id = %created.id, "droplet ready");
        Ok(())
    }

    async fn wait_until_ready(
        &self,
        provider: &dyn CloudProvider,
        id: &DropletId,
    ) -> Result<DropletInfo> {
        for attempt in 1..=self.wait.attempts {
            tokio::time::sleep(self.wait.interval).await;

            let info = provider
                .get_droplet(id)
                .await?
                .ok_or_else(|| {
                    Error::State(format!("droplet {id} disappeared while starting"))
                })?;
            if info.is_ready() {
                return Ok(info);
            }
            debug!(droplet_id = %id, attempt, state = %info.state, "waiting for droplet");
        }

        Err(Error::Timeout(format!(
            "droplet {id} not active after {} attempts",
            self.wait.attempts
        )))
    }
}

/// `<logical name>-<7 hex chars>`, stable until the resource is replaced.
fn physical_name(logical_name: &str) -> String {
    let suffix: u32 = rand::rng().random_range(0..0x1000_0000);
    format!("{logical_name}-{suffix:07x}")
}
