//! Flow versions: immutable snapshots of a trigger plus its action graph.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::block::{BlockRef, BlockType, PackageType};
use super::ids::{FlowId, FlowVersionId, ProjectId};
use crate::CoreError;

/// Kind of step in a flow graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    /// Placeholder trigger of an unfinished flow
    EmptyTrigger,
    /// Trigger implemented by a block
    BlockTrigger,
    /// Action implemented by a block
    BlockAction,
    /// Inline code step
    Code,
    /// Conditional branch
    Branch,
    /// Loop over items
    LoopOnItems,
}

/// Step settings; only the block reference is interpreted by the worker
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSettings {
    /// Referenced block name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_name: Option<String>,

    /// Referenced block version (exact or range)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_version: Option<String>,

    /// Referenced block type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_type: Option<BlockType>,

    /// Referenced block package type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<PackageType>,

    /// Step input, opaque to the worker
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,

    /// Everything else, preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StepSettings {
    /// The block this step references, if any
    pub fn block_ref(&self) -> Option<BlockRef> {
        let name = self.block_name.as_ref()?;
        let version = self.block_version.as_ref()?;
        Some(BlockRef {
            name: name.clone(),
            version: version.clone(),
            block_type: self.block_type.unwrap_or(BlockType::Official),
            package_type: self.package_type.unwrap_or(PackageType::Registry),
        })
    }
}

/// One node of a flow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique step name within the flow version
    pub name: String,

    /// Step kind
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Human-readable name
    #[serde(default)]
    pub display_name: String,

    /// Whether the step passed authoring validation
    #[serde(default)]
    pub valid: bool,

    /// Step settings
    #[serde(default)]
    pub settings: StepSettings,

    /// Next step in sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<Box<Step>>,

    /// First step of a loop body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_loop_action: Option<Box<Step>>,

    /// First step of the true branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success_action: Option<Box<Step>>,

    /// First step of the false branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure_action: Option<Box<Step>>,
}

impl Step {
    fn children(&self) -> impl Iterator<Item = &Step> {
        [
            self.first_loop_action.as_deref(),
            self.on_success_action.as_deref(),
            self.on_failure_action.as_deref(),
            self.next_action.as_deref(),
        ]
        .into_iter()
        .flatten()
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Step>) {
        out.push(self);
        for child in self.children() {
            child.collect(out);
        }
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Step> {
        if self.name == name {
            return Some(self);
        }
        [
            self.first_loop_action.as_deref_mut(),
            self.on_success_action.as_deref_mut(),
            self.on_failure_action.as_deref_mut(),
            self.next_action.as_deref_mut(),
        ]
        .into_iter()
        .flatten()
        .find_map(|child| child.find_mut(name))
    }
}

/// Immutable snapshot of one flow's steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowVersion {
    /// Version id
    pub id: FlowVersionId,
    /// Owning flow
    pub flow_id: FlowId,
    /// Display name
    #[serde(default)]
    pub display_name: String,
    /// Root trigger step
    pub trigger: Step,
    /// Whether the version passed authoring validation
    #[serde(default)]
    pub valid: bool,
}

impl FlowVersion {
    /// All steps, trigger first, in depth-first order
    pub fn steps(&self) -> Vec<&Step> {
        let mut out = Vec::new();
        self.trigger.collect(&mut out);
        out
    }

    /// Look up a step by name
    pub fn get_step(&self, name: &str) -> Option<&Step> {
        self.steps().into_iter().find(|step| step.name == name)
    }

    /// Structural copy with the named step's block version replaced.
    ///
    /// Every other step is left exactly as it was.
    pub fn with_block_version(&self, step_name: &str, version: &str) -> Result<FlowVersion, CoreError> {
        let mut copy = self.clone();
        let step = copy
            .trigger
            .find_mut(step_name)
            .ok_or_else(|| CoreError::StepNotFound(step_name.to_string()))?;
        if step.settings.block_name.is_none() {
            return Err(CoreError::MissingBlockReference(step_name.to_string()));
        }
        step.settings.block_version = Some(version.to_string());
        Ok(copy)
    }
}

/// Flow enablement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    /// Triggers are active
    Enabled,
    /// Triggers are paused
    Disabled,
}

/// A flow together with one of its versions, block steps pinned server-side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedFlow {
    /// Flow id
    pub id: FlowId,
    /// Owning project
    pub project_id: ProjectId,
    /// Enablement
    pub status: FlowStatus,
    /// Currently published version, if any
    #[serde(default)]
    pub published_version_id: Option<FlowVersionId>,
    /// The requested version
    pub version: FlowVersion,
}
