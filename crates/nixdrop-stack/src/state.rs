//! State management for stacks
//!
//! Each stack is persisted as `<state_dir>/<project>/<stack>.json`. The
//! previous save is kept as `<stack>.json.backup`, and `<stack>.lock.json`
//! guards a stack against concurrent runs.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::program::{DropletInputs, OutputRef};
use crate::types::{DropletId, DropletInfo};
use crate::{Error, Result};

const STATE_VERSION: u32 = 1;
const LOCK_STALE_AFTER_HOURS: i64 = 1;

pub const ATTR_NAME: &str = "name";
pub const ATTR_IPV4_ADDRESS: &str = "ipv4_address";
pub const ATTR_STATUS: &str = "status";

/// Persisted state of one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    pub version: u32,
    pub project: String,
    pub stack: String,
    pub updated_at: DateTime<Utc>,

    /// Non-secret configuration.
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Resources indexed by URN.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,

    /// Droplets superseded by a replacement and not yet deleted.
    #[serde(default)]
    pub pending_deletes: Vec<DropletId>,

    /// Export name to the resource attribute it reads.
    #[serde(default)]
    pub exports: BTreeMap<String, OutputRef>,

    /// Export values as of the last successful operation.
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
}

impl StackState {
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            project: project.into(),
            stack: stack.into(),
            updated_at: Utc::now(),
            config: BTreeMap::new(),
            resources: BTreeMap::new(),
            pending_deletes: Vec::new(),
            exports: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn set_resource(&mut self, resource: ResourceState) {
        self.resources.insert(resource.urn.clone(), resource);
        self.updated_at = Utc::now();
    }

    pub fn remove_resource(&mut self, urn: &str) -> Option<ResourceState> {
        let removed = self.resources.remove(urn);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }

    pub fn get_resource(&self, urn: &str) -> Option<&ResourceState> {
        self.resources.get(urn)
    }

    /// Recompute `outputs` from `exports`. Exports whose resource or
    /// attribute is missing are left out.
    pub fn resolve_outputs(&mut self) {
        let outputs = self
            .exports
            .iter()
            .filter_map(|(name, output)| {
                self.resources
                    .get(&output.urn)
                    .and_then(|r| r.attributes.get(&output.attribute))
                    .map(|v| (name.clone(), v.clone()))
            })
            .collect();
        self.outputs = outputs;
        self.updated_at = Utc::now();
    }

    /// Forget every resource, export and output.
    pub fn clear(&mut self) {
        self.resources.clear();
        self.pending_deletes.clear();
        self.exports.clear();
        self.outputs.clear();
        self.updated_at = Utc::now();
    }
}

/// State of a single managed droplet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    pub urn: String,

    /// Provider-specific resource ID.
    pub id: DropletId,

    /// Inputs the resource was created from, used for diffing.
    pub inputs: DropletInputs,

    /// Provider-reported attributes (name, ipv4_address, status).
    pub attributes: BTreeMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceState {
    pub fn new(urn: impl Into<String>, inputs: DropletInputs, info: &DropletInfo) -> Self {
        let now = Utc::now();
        let mut resource = Self {
            urn: urn.into(),
            id: info.id.clone(),
            inputs,
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        };
        resource.observe(info);
        resource
    }

    /// Record what the provider currently reports.
    pub fn observe(&mut self, info: &DropletInfo) {
        self.attributes
            .insert(ATTR_NAME.into(), serde_json::json!(info.name));
        self.attributes
            .insert(ATTR_STATUS.into(), serde_json::json!(info.state));
        match &info.ipv4_address {
            Some(ip) => {
                self.attributes
                    .insert(ATTR_IPV4_ADDRESS.into(), serde_json::json!(ip));
            }
            None => {
                self.attributes.remove(ATTR_IPV4_ADDRESS);
            }
        }
        self.updated_at = Utc::now();
    }
}

/// Reads and writes stack state files.
#[derive(Debug, Clone)]
pub struct StateManager {
    state_dir: PathBuf,
    project: String,
}

impl StateManager {
    pub fn new(state_dir: impl AsRef<Path>, project: impl Into<String>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            project: project.into(),
        }
    }

    fn project_dir(&self) -> PathBuf {
        self.state_dir.join(&self.project)
    }

    fn state_path(&self, stack: &str) -> PathBuf {
        self.project_dir().join(format!("{stack}.json"))
    }

    fn backup_path(&self, stack: &str) -> PathBuf {
        self.project_dir().join(format!("{stack}.json.backup"))
    }

    fn temp_path(&self, stack: &str) -> PathBuf {
        self.project_dir().join(format!("{stack}.json.tmp"))
    }

    fn lock_path(&self, stack: &str) -> PathBuf {
        self.project_dir().join(format!("{stack}.lock.json"))
    }

    async fn ensure_project_dir(&self) -> Result<()> {
        let dir = self.project_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!(dir = %dir.display(), "created state directory");
        }
        Ok(())
    }

    /// Whether the stack has ever been saved.
    pub fn exists(&self, stack: &str) -> bool {
        self.state_path(stack).exists()
    }

    /// Load a stack's state, or a fresh one if it was never saved.
    pub async fn load(&self, stack: &str) -> Result<StackState> {
        let path = self.state_path(stack);
        if !path.exists() {
            tracing::debug!(stack, "state file not found, starting empty");
            return Ok(StackState::new(&self.project, stack));
        }

        let content = fs::read_to_string(&path).await?;
        let state: StackState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(Error::State(format!(
                "state file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }
        if state.project != self.project || state.stack != stack {
            return Err(Error::State(format!(
                "{} belongs to {}/{}, not {}/{}",
                path.display(),
                state.project,
                state.stack,
                self.project,
                stack
            )));
        }

        tracing::debug!(stack, resources = state.resources.len(), "loaded state");
        Ok(state)
    }

    /// Write the state through a temp file and rename it into place, so
    /// `<stack>.json` always holds either the old or the new state.
    pub async fn save(&self, state: &StackState) -> Result<()> {
        self.ensure_project_dir().await?;

        let path = self.state_path(&state.stack);
        let temp = self.temp_path(&state.stack);

        let content = serde_json::to_string_pretty(state)?;
        let mut file = fs::File::create(&temp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        if path.exists() {
            fs::copy(&path, self.backup_path(&state.stack)).await?;
        }
        fs::rename(&temp, &path).await?;

        tracing::debug!(
            stack = %state.stack,
            resources = state.resources.len(),
            "saved state"
        );
        Ok(())
    }

    /// Acquire exclusive access to a stack.
    ///
    /// The lock file is created with `create_new`, so of two concurrent
    /// callers only one succeeds. A stale lock is removed and the create
    /// retried once.
    pub async fn acquire_lock(&self, stack: &str) -> Result<StateLock> {
        self.ensure_project_dir().await?;

        let lock_path = self.lock_path(stack);
        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&lock_info)?;

        match create_lock_file(&lock_path, &content).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                self.remove_stale_lock(stack, &lock_path).await?;
                create_lock_file(&lock_path, &content)
                    .await
                    .map_err(|e| match e.kind() {
                        io::ErrorKind::AlreadyExists => {
                            Error::Lock(format!("{stack} was locked by another run"))
                        }
                        _ => Error::Io(e),
                    })?;
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(stack, "acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }

    /// Remove the lock at `lock_path` if it is stale, otherwise report who
    /// holds it.
    async fn remove_stale_lock(&self, stack: &str, lock_path: &Path) -> Result<()> {
        let content = match fs::read_to_string(lock_path).await {
            Ok(content) => content,
            // Released in the meantime.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        // A holder that has created the file but not yet written it.
        let Ok(lock_info) = serde_json::from_str::<LockInfo>(&content) else {
            return Err(Error::Lock(format!("{stack} is being locked by another run")));
        };

        let age = Utc::now().signed_duration_since(lock_info.acquired_at);
        if age.num_hours() < LOCK_STALE_AFTER_HOURS {
            return Err(Error::Lock(format!(
                "{stack} is locked by {} (pid {}) since {}",
                lock_info.holder, lock_info.pid, lock_info.acquired_at
            )));
        }

        tracing::warn!(holder = %lock_info.holder, "removing stale lock");
        match fs::remove_file(lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn create_lock_file(path: &Path, content: &str) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Guard for a stack lock. Released on drop if not released explicitly.
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DropletState;
    use tempfile::tempdir;

    fn info(ip: Option<&str>) -> DropletInfo {
        DropletInfo {
            id: DropletId("3164444".into()),
            name: "temp-drop-1a2b3c4".into(),
            state: DropletState::Running,
            ipv4_address: ip.map(str::to_string),
        }
    }

    fn inputs() -> DropletInputs {
        DropletInputs {
            image: "ubuntu-22-10-x64".into(),
            size: "s-2vcpu-2gb-amd".into(),
            region: "sgp1".into(),
            ssh_keys: vec!["3b:16:bf:e4".into()],
            user_data_sha256: None,
        }
    }

    const URN: &str = "urn:nixdrop:dev::nixostest::digitalocean:Droplet::temp-drop";

    #[tokio::test]
    async fn test_state_save_load() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), "nixostest");

        let mut state = StackState::new("nixostest", "dev");
        state.set_resource(ResourceState::new(URN, inputs(), &info(Some("203.0.113.7"))));
        state
            .exports
            .insert("dropletIP".into(), OutputRef::new(URN, ATTR_IPV4_ADDRESS));
        state.resolve_outputs();

        manager.save(&state).await.unwrap();

        let loaded = manager.load("dev").await.unwrap();
        assert_eq!(loaded.resources.len(), 1);
        assert_eq!(loaded.get_resource(URN).unwrap().id.0, "3164444");
        assert_eq!(loaded.outputs["dropletIP"], "203.0.113.7");
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), "nixostest");

        assert!(!manager.exists("dev"));
        let state = manager.load("dev").await.unwrap();
        assert!(state.resources.is_empty());
        assert_eq!(state.project, "nixostest");
    }

    #[tokio::test]
    async fn second_save_keeps_a_backup() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), "nixostest");

        let state = StackState::new("nixostest", "dev");
        manager.save(&state).await.unwrap();
        manager.save(&state).await.unwrap();

        assert!(temp_dir.path().join("nixostest/dev.json.backup").exists());
    }

    #[tokio::test]
    async fn save_replaces_the_file_in_place() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), "nixostest");

        let mut state = StackState::new("nixostest", "dev");
        manager.save(&state).await.unwrap();
        state.set_resource(ResourceState::new(URN, inputs(), &info(Some("203.0.113.7"))));
        manager.save(&state).await.unwrap();

        let dir = temp_dir.path().join("nixostest");
        assert!(!dir.join("dev.json.tmp").exists());

        let backup: StackState =
            serde_json::from_str(&std::fs::read_to_string(dir.join("dev.json.backup")).unwrap())
                .unwrap();
        assert!(backup.resources.is_empty());
        assert_eq!(manager.load("dev").await.unwrap().resources.len(), 1);
    }

    #[tokio::test]
    async fn leftover_temp_file_does_not_hide_state() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), "nixostest");

        let mut state = StackState::new("nixostest", "dev");
        state.set_resource(ResourceState::new(URN, inputs(), &info(Some("203.0.113.7"))));
        manager.save(&state).await.unwrap();
        std::fs::write(temp_dir.path().join("nixostest/dev.json.tmp"), "{ trunc").unwrap();

        assert_eq!(manager.load("dev").await.unwrap().resources.len(), 1);
        manager.save(&state).await.unwrap();
        assert_eq!(manager.load("dev").await.unwrap().resources.len(), 1);
    }

    #[tokio::test]
    async fn newer_state_version_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), "nixostest");

        let mut state = StackState::new("nixostest", "dev");
        state.version = STATE_VERSION + 1;
        manager.save(&state).await.unwrap();

        assert!(matches!(manager.load("dev").await, Err(Error::State(_))));
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), "nixostest");

        let lock = manager.acquire_lock("dev").await.unwrap();
        assert!(matches!(
            manager.acquire_lock("dev").await,
            Err(Error::Lock(_))
        ));

        lock.release().await.unwrap();
        let relock = manager.acquire_lock("dev").await.unwrap();
        drop(relock);

        assert!(manager.acquire_lock("dev").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_have_one_winner() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), "nixostest");

        for _ in 0..50 {
            let a = tokio::spawn({
                let manager = manager.clone();
                async move { manager.acquire_lock("dev").await }
            });
            let b = tokio::spawn({
                let manager = manager.clone();
                async move { manager.acquire_lock("dev").await }
            });

            let (a, b) = (a.await.unwrap(), b.await.unwrap());
            let winners: Vec<StateLock> = [a, b].into_iter().filter_map(|r| r.ok()).collect();
            assert_eq!(winners.len(), 1);
            for lock in winners {
                lock.release().await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn stale_lock_is_taken_over() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path(), "nixostest");
        manager.ensure_project_dir().await.unwrap();

        let stale = LockInfo {
            holder: "crashed-host".into(),
            pid: 4242,
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        std::fs::write(
            manager.lock_path("dev"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let lock = manager.acquire_lock("dev").await.unwrap();
        let content = std::fs::read_to_string(manager.lock_path("dev")).unwrap();
        let held: LockInfo = serde_json::from_str(&content).unwrap();
        assert_eq!(held.pid, std::process::id());
        lock.release().await.unwrap();
    }

    #[test]
    fn outputs_skip_missing_attributes() {
        let mut state = StackState::new("nixostest", "dev");
        state.set_resource(ResourceState::new(URN, inputs(), &info(None)));
        state
            .exports
            .insert("dropletIP".into(), OutputRef::new(URN, ATTR_IPV4_ADDRESS));
        state
            .exports
            .insert("dropletName".into(), OutputRef::new(URN, ATTR_NAME));
        state.resolve_outputs();

        assert!(!state.outputs.contains_key("dropletIP"));
        assert_eq!(state.outputs["dropletName"], "temp-drop-1a2b3c4");
    }
}
