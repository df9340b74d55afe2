use std::collections::BTreeSet;

use super::{
    diff_overrides, CallSummary, ComponentSummary, CompositionNode, GraphSummarizer, GraphSummary,
    SummaryDocument, VariableSummary,
};
use crate::asset::{ContainerType, Graph, GraphKind, LoadedAsset, Node, PinType, WidgetNode};
use crate::error::Result;

/// Default summarizer for node-graph assets.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlueprintSummarizer;

impl GraphSummarizer for BlueprintSummarizer {
    fn summarize(&self, asset: &LoadedAsset) -> Result<SummaryDocument> {
        let path = match &asset.identity {
            Some(id) => format!("{}.{}", id, asset.name),
            None => asset.name.clone(),
        };

        let variables = asset
            .variables
            .iter()
            .map(|var| VariableSummary {
                name: var.name.clone(),
                type_name: type_string(&var.pin_type),
                category: var.category.clone(),
                instance_editable: var.editable && !var.private,
                replicated: var.replicated,
            })
            .collect();

        let components = asset
            .components
            .iter()
            .map(|c| ComponentSummary {
                name: c.name.clone(),
                class: c.class.clone(),
            })
            .collect();

        // event graphs first, then functions, then macros
        let mut graphs = Vec::with_capacity(asset.graphs.len());
        for kind in [GraphKind::Event, GraphKind::Function, GraphKind::Macro] {
            graphs.extend(
                asset
                    .graphs
                    .iter()
                    .filter(|g| g.kind == kind)
                    .map(summarize_graph),
            );
        }

        Ok(SummaryDocument {
            name: asset.name.clone(),
            path,
            parent_type: asset
                .parent_type
                .clone()
                .unwrap_or_else(|| "None".to_string()),
            asset_type: asset.asset_type.clone(),
            variables,
            property_overrides: diff_overrides(&asset.defaults, &asset.base_defaults),
            interfaces: asset.interfaces.clone(),
            components,
            composition: asset.widget_tree.as_ref().map(summarize_widget),
            graphs,
        })
    }
}

fn summarize_graph(graph: &Graph) -> GraphSummary {
    let mut summary = GraphSummary {
        name: graph.name.clone(),
        kind: graph.kind,
        node_count: graph.nodes.len(),
        events: Vec::new(),
        calls: Vec::new(),
        variables_read: BTreeSet::new(),
        variables_written: BTreeSet::new(),
        sub_graphs: Vec::new(),
    };
    if graph.kind == GraphKind::Macro {
        return summary;
    }

    for node in &graph.nodes {
        match node {
            Node::CustomEvent { name } => summary.events.push(format!("CustomEvent: {name}")),
            Node::Event { title } => summary.events.push(title.clone()),
            Node::CallFunction { function, target } => summary.calls.push(CallSummary {
                function: function.clone(),
                target: target.clone().unwrap_or_else(|| "Self".to_string()),
            }),
            Node::VariableGet { variable } => {
                summary.variables_read.insert(variable.clone());
            }
            Node::VariableSet { variable } => {
                summary.variables_written.insert(variable.clone());
            }
            Node::MacroInstance { graph } => summary
                .sub_graphs
                .push(graph.clone().unwrap_or_else(|| "Unknown".to_string())),
            Node::Other => {}
        }
    }
    summary
}

fn summarize_widget(widget: &WidgetNode) -> CompositionNode {
    CompositionNode {
        name: widget.name.clone(),
        class: widget.class.clone(),
        is_variable: widget.is_variable,
        children: widget
            .children
            .as_ref()
            .map(|children| children.iter().map(summarize_widget).collect()),
    }
}

/// Human-readable variable type: `Array<T>`, `Set<T>`, `Map<K, V>` or the bare type.
pub fn type_string(pin: &PinType) -> String {
    let base = pin.sub_type.clone().unwrap_or_else(|| pin.category.clone());
    match pin.container {
        ContainerType::None => base,
        ContainerType::Array => format!("Array<{base}>"),
        ContainerType::Set => format!("Set<{base}>"),
        ContainerType::Map => {
            let value = pin
                .value_sub_type
                .clone()
                .or_else(|| pin.value_category.clone().filter(|c| !c.is_empty()))
                .unwrap_or_else(|| "?".to_string());
            format!("Map<{base}, {value}>")
        }
    }
}
