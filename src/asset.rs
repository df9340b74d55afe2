//! In-memory model of a loaded graph asset, as handed to a [`GraphSummarizer`].
//!
//! The filesystem corpus stores exactly this shape as JSON (one document per asset file),
//! minus the identity, which is derived from the file's location.
//!
//! [`GraphSummarizer`]: crate::summary::GraphSummarizer

use serde::{Deserialize, Serialize};

use crate::identity::AssetIdentity;
use crate::registry::DependencyEdge;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetKind {
    #[default]
    Blueprint,
    WidgetBlueprint,
    #[serde(untagged)]
    Other(String),
}

impl AssetKind {
    /// Graph-bearing assets are the ones the audit cache derives summaries for.
    pub fn is_graph_asset(&self) -> bool {
        matches!(self, AssetKind::Blueprint | AssetKind::WidgetBlueprint)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedAsset {
    #[serde(skip)]
    pub identity: Option<AssetIdentity>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: AssetKind,
    #[serde(default)]
    pub parent_type: Option<String>,
    /// Free-form classification label (e.g. `Normal`, `FunctionLibrary`).
    #[serde(default = "LoadedAsset::default_asset_type")]
    pub asset_type: String,
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
    /// Field values of this asset's default instance.
    #[serde(default)]
    pub defaults: Vec<FieldValue>,
    /// Field values of the base type's default instance.
    #[serde(default)]
    pub base_defaults: Vec<FieldValue>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub components: Vec<ComponentDecl>,
    #[serde(default)]
    pub widget_tree: Option<WidgetNode>,
    #[serde(default)]
    pub graphs: Vec<Graph>,
    #[serde(default)]
    pub dependencies: Vec<DependencyEdge>,
}

impl LoadedAsset {
    fn default_asset_type() -> String {
        "Normal".to_string()
    }

    pub fn new(identity: AssetIdentity, kind: AssetKind) -> Self {
        Self {
            name: identity.name().to_string(),
            identity: Some(identity),
            kind,
            parent_type: None,
            asset_type: Self::default_asset_type(),
            variables: Vec::new(),
            defaults: Vec::new(),
            base_defaults: Vec::new(),
            interfaces: Vec::new(),
            components: Vec::new(),
            widget_tree: None,
            graphs: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerType {
    #[default]
    None,
    Array,
    Set,
    Map,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinType {
    pub category: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub container: ContainerType,
    /// Map value type (terminal sub-type first, then terminal category).
    #[serde(default)]
    pub value_sub_type: Option<String>,
    #[serde(default)]
    pub value_category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub pin_type: PinType,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub replicated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFlags {
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub config: bool,
    #[serde(default)]
    pub disable_edit_on_instance: bool,
    #[serde(default)]
    pub transient: bool,
}

/// One field of a default instance: descriptor plus value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    pub name: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub flags: FieldFlags,
    /// Declared by this asset itself rather than inherited from the base type.
    #[serde(default)]
    pub declared_locally: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDecl {
    pub name: String,
    pub class: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetNode {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub is_variable: bool,
    /// `Some` for panel widgets, even when they currently hold no children.
    #[serde(default)]
    pub children: Option<Vec<WidgetNode>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphKind {
    #[default]
    Event,
    Function,
    Macro,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub name: String,
    #[serde(default)]
    pub kind: GraphKind,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node")]
pub enum Node {
    Event {
        title: String,
    },
    CustomEvent {
        name: String,
    },
    CallFunction {
        function: String,
        #[serde(default)]
        target: Option<String>,
    },
    VariableGet {
        variable: String,
    },
    VariableSet {
        variable: String,
    },
    MacroInstance {
        #[serde(default)]
        graph: Option<String>,
    },
    #[serde(other)]
    Other,
}
