//! Plans: what `up` has to do to make the state match the program

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::program::Declaration;
use crate::state::StackState;

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Create a new resource, then delete the recorded one
    Replace,
    /// Delete a resource no longer declared
    Delete,
    /// No changes needed
    NoOp,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// A planned action for one resource.
#[derive(Debug, Clone)]
pub struct Action {
    pub action_type: ActionType,
    pub urn: String,
    /// Present for create, replace and no-op.
    pub declaration: Option<Declaration>,
}

/// Ordered list of actions: declared resources first, in declaration
/// order, then deletions of resources the program no longer declares.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn diff(declarations: &[Declaration], state: &StackState) -> Self {
        let mut actions = Vec::with_capacity(declarations.len());
        let declared: HashSet<&str> = declarations.iter().map(|d| d.urn.as_str()).collect();

        for decl in declarations {
            let action_type = match state.get_resource(&decl.urn) {
                None => ActionType::Create,
                Some(recorded) if recorded.inputs == decl.args.inputs() => ActionType::NoOp,
                Some(_) => ActionType::Replace,
            };
            actions.push(Action {
                action_type,
                urn: decl.urn.clone(),
                declaration: Some(decl.clone()),
            });
        }

        for urn in state.resources.keys() {
            if !declared.contains(urn.as_str()) {
                actions.push(Action {
                    action_type: ActionType::Delete,
                    urn: urn.clone(),
                    declaration: None,
                });
            }
        }

        Self { actions }
    }

    pub fn has_changes(&self) -> bool {
        self.actions
            .iter()
            .any(|a| a.action_type != ActionType::NoOp)
    }

    fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.count(ActionType::Create),
            replace: self.count(ActionType::Replace),
            delete: self.count(ActionType::Delete),
            unchanged: self.count(ActionType::NoOp),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub replace: usize,
    pub delete: usize,
    pub unchanged: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to replace, {} to delete, {} unchanged",
            self.create, self.replace, self.delete, self.unchanged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{DROPLET_TYPE, DropletArgs, urn};
    use crate::state::ResourceState;
    use crate::types::{DropletId, DropletInfo, DropletState};

    fn declaration(name: &str, size: &str) -> Declaration {
        Declaration {
            urn: urn("nixostest", "dev", DROPLET_TYPE, name),
            logical_name: name.into(),
            args: DropletArgs {
                image: "ubuntu-22-10-x64".into(),
                size: size.into(),
                region: "sgp1".into(),
                ssh_keys: vec!["3b:16:bf:e4".into()],
                user_data: Some("#cloud-config\n".into()),
            },
        }
    }

    fn recorded(decl: &Declaration) -> ResourceState {
        let info = DropletInfo {
            id: DropletId("1".into()),
            name: format!("{}-0000000", decl.logical_name),
            state: DropletState::Running,
            ipv4_address: Some("203.0.113.1".into()),
        };
        ResourceState::new(&decl.urn, decl.args.inputs(), &info)
    }

    #[test]
    fn empty_state_creates_everything() {
        let state = StackState::new("nixostest", "dev");
        let plan = Plan::diff(&[declaration("temp-drop", "s-2vcpu-2gb-amd")], &state);

        assert!(plan.has_changes());
        assert_eq!(plan.summary().create, 1);
        assert_eq!(plan.actions[0].action_type, ActionType::Create);
    }

    #[test]
    fn unchanged_inputs_are_a_no_op() {
        let decl = declaration("temp-drop", "s-2vcpu-2gb-amd");
        let mut state = StackState::new("nixostest", "dev");
        state.set_resource(recorded(&decl));

        let plan = Plan::diff(&[decl], &state);
        assert!(!plan.has_changes());
        assert_eq!(plan.summary().unchanged, 1);
    }

    #[test]
    fn changed_inputs_replace() {
        let old = declaration("temp-drop", "s-2vcpu-2gb-amd");
        let mut state = StackState::new("nixostest", "dev");
        state.set_resource(recorded(&old));

        let plan = Plan::diff(&[declaration("temp-drop", "s-4vcpu-8gb-amd")], &state);
        assert_eq!(plan.actions[0].action_type, ActionType::Replace);
    }

    #[test]
    fn undeclared_resources_are_deleted_last() {
        let gone = declaration("old-drop", "s-2vcpu-2gb-amd");
        let mut state = StackState::new("nixostest", "dev");
        state.set_resource(recorded(&gone));

        let plan = Plan::diff(&[declaration("temp-drop", "s-2vcpu-2gb-amd")], &state);
        let summary = plan.summary();

        assert_eq!(summary.create, 1);
        assert_eq!(summary.delete, 1);
        assert_eq!(plan.actions.last().unwrap().action_type, ActionType::Delete);
        assert_eq!(
            summary.to_string(),
            "1 to create, 0 to replace, 1 to delete, 0 unchanged"
        );
    }
}
