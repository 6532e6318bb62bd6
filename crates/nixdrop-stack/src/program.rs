//! Programs declare the desired resources of a stack.
//!
//! A [`Program`] runs against a [`Context`] during `up`. Declaring a
//! resource has no side effect by itself: the context only records the
//! declaration and the exports, which the engine then plans and applies.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::state::{ATTR_IPV4_ADDRESS, ATTR_NAME};
use crate::types::SshKey;
use crate::{CloudProvider, Error, Result};

pub const DROPLET_TYPE: &str = "digitalocean:Droplet";

#[async_trait]
pub trait Program: Send + Sync + 'static {
    async fn run(&self, ctx: &mut Context) -> Result<()>;
}

/// Arguments for a droplet resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropletArgs {
    pub image: String,
    pub size: String,
    pub region: String,
    /// SSH key fingerprints.
    pub ssh_keys: Vec<String>,
    pub user_data: Option<String>,
}

impl DropletArgs {
    /// The diffable form of these arguments. User data is recorded as a
    /// digest so the state file never holds the payload itself.
    pub fn inputs(&self) -> DropletInputs {
        DropletInputs {
            image: self.image.clone(),
            size: self.size.clone(),
            region: self.region.clone(),
            ssh_keys: self.ssh_keys.clone(),
            user_data_sha256: self.user_data.as_deref().map(sha256_hex),
        }
    }
}

/// Recorded inputs of a droplet. Any difference forces a replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropletInputs {
    pub image: String,
    pub size: String,
    pub region: String,
    pub ssh_keys: Vec<String>,
    #[serde(default)]
    pub user_data_sha256: Option<String>,
}

fn sha256_hex(data: &str) -> String {
    format!("{:x}", Sha256::digest(data.as_bytes()))
}

/// A reference to one attribute of one resource, resolved after apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    pub urn: String,
    pub attribute: String,
}

impl OutputRef {
    pub fn new(urn: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            urn: urn.into(),
            attribute: attribute.into(),
        }
    }
}

/// Handle to a declared droplet.
#[derive(Debug, Clone)]
pub struct DropletRef {
    urn: String,
}

impl DropletRef {
    pub fn urn(&self) -> &str {
        &self.urn
    }

    pub fn ipv4_address(&self) -> OutputRef {
        OutputRef::new(&self.urn, ATTR_IPV4_ADDRESS)
    }

    pub fn name(&self) -> OutputRef {
        OutputRef::new(&self.urn, ATTR_NAME)
    }
}

/// A resource recorded by the context during a program run.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub urn: String,
    pub logical_name: String,
    pub args: DropletArgs,
}

/// What a program sees while it runs.
pub struct Context {
    project: String,
    stack: String,
    provider: Arc<dyn CloudProvider>,
    declarations: Vec<Declaration>,
    exports: BTreeMap<String, OutputRef>,
}

impl Context {
    pub(crate) fn new(
        project: impl Into<String>,
        stack: impl Into<String>,
        provider: Arc<dyn CloudProvider>,
    ) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
            provider,
            declarations: Vec::new(),
            exports: BTreeMap::new(),
        }
    }

    /// Look up an existing SSH key by name. Read-only.
    pub async fn lookup_ssh_key(&self, name: &str) -> Result<SshKey> {
        self.provider.lookup_ssh_key(name).await
    }

    /// Declare a droplet under a logical name unique within the stack.
    pub fn droplet(&mut self, name: &str, args: DropletArgs) -> Result<DropletRef> {
        let urn = urn(&self.project, &self.stack, DROPLET_TYPE, name);
        if self.declarations.iter().any(|d| d.urn == urn) {
            return Err(Error::DuplicateResource(urn));
        }

        self.declarations.push(Declaration {
            urn: urn.clone(),
            logical_name: name.to_string(),
            args,
        });
        Ok(DropletRef { urn })
    }

    /// Register a stack output. A later export with the same name wins.
    pub fn export(&mut self, name: impl Into<String>, value: OutputRef) {
        self.exports.insert(name.into(), value);
    }

    pub(crate) fn into_parts(self) -> (Vec<Declaration>, BTreeMap<String, OutputRef>) {
        (self.declarations, self.exports)
    }
}

pub fn urn(project: &str, stack: &str, resource_type: &str, name: &str) -> String {
    format!("urn:nixdrop:{stack}::{project}::{resource_type}::{name}")
}
