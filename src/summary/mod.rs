//! Summary documents: the derived JSON tree persisted for each audited asset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::asset::{GraphKind, LoadedAsset};
use crate::error::Result;

mod blueprint;
mod overrides;

pub use blueprint::{type_string, BlueprintSummarizer};
pub use overrides::diff_overrides;

/// Pure transform from a loaded asset to its summary. No I/O.
pub trait GraphSummarizer: Send + Sync {
    fn summarize(&self, asset: &LoadedAsset) -> Result<SummaryDocument>;
}

impl<F> GraphSummarizer for F
where
    F: Fn(&LoadedAsset) -> Result<SummaryDocument> + Send + Sync,
{
    fn summarize(&self, asset: &LoadedAsset) -> Result<SummaryDocument> {
        self(asset)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDocument {
    pub name: String,
    pub path: String,
    pub parent_type: String,
    pub asset_type: String,
    pub variables: Vec<VariableSummary>,
    pub property_overrides: Vec<PropertyOverride>,
    pub interfaces: Vec<String>,
    pub components: Vec<ComponentSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition: Option<CompositionNode>,
    pub graphs: Vec<GraphSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub category: String,
    pub instance_editable: bool,
    pub replicated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyOverride {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSummary {
    pub name: String,
    pub class: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionNode {
    pub name: String,
    pub class: String,
    pub is_variable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<CompositionNode>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSummary {
    pub function: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSummary {
    pub name: String,
    pub kind: GraphKind,
    pub node_count: usize,
    pub events: Vec<String>,
    pub calls: Vec<CallSummary>,
    pub variables_read: BTreeSet<String>,
    pub variables_written: BTreeSet<String>,
    pub sub_graphs: Vec<String>,
}
