use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// A directed edge between two node ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// One node of a flow graph as persisted inside `FlowVersion.graph`.
///
/// `config` stays raw JSON here; it is decoded into a typed [`NodeAction`]
/// when the graph is loaded for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the graph
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

impl Node {
    /// Human-facing name for logs: label when present, id otherwise
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// The shape inside `FlowVersion.graph`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Transformation applied by a `transform` node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transformation {
    Passthrough,
    Merge,
    Extract,
}

impl Default for Transformation {
    fn default() -> Self {
        Transformation::Passthrough
    }
}

/// HTTP action node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpActionConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// A node's behavior, decoded from `(type, kind, config)` at load time.
///
/// Unknown combinations resolve to [`NodeAction::Unrecognized`], which fails
/// its step with a clear error when dispatched instead of executing anything.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeAction {
    /// Entry node; outputs the trigger data
    Start,
    /// Trigger node; outputs the trigger data
    Trigger,
    /// Exit node; summarizes its inputs
    End,
    /// Branching predicate over the node's inputs
    Condition { condition: Option<String> },
    /// Reshapes inputs
    Transform {
        transformation: Transformation,
        fields: Option<Vec<String>>,
    },
    /// Outbound HTTP call
    Http(HttpActionConfig),
    /// Mail send through the mailer capability
    Email {
        to: Option<String>,
        subject: Option<String>,
        body: Option<String>,
    },
    /// Provider-client operation, either from a dotted type
    /// (`mtn.requestToPay`) or an action kind with a registered client
    Provider {
        provider: String,
        operation: String,
        params: Value,
    },
    /// Anything the engine does not recognize
    Unrecognized {
        node_type: String,
        kind: Option<String>,
    },
}

impl NodeAction {
    /// Decode a node's action. Malformed config for a known variant is a
    /// `Validation` error; unknown `(type, kind)` pairs are not errors here,
    /// they become the `Unrecognized` sentinel.
    pub fn resolve(node: &Node) -> Result<NodeAction, CoreError> {
        let config = node.config.clone().unwrap_or(Value::Null);

        match node.node_type.as_str() {
            "start" => Ok(NodeAction::Start),
            "trigger" => Ok(NodeAction::Trigger),
            "end" => Ok(NodeAction::End),
            "condition" => {
                let condition = config
                    .get("condition")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                Ok(NodeAction::Condition { condition })
            }
            "transform" => {
                let transformation = match config.get("transformation") {
                    None | Some(Value::Null) => Transformation::default(),
                    Some(v) => serde_json::from_value(v.clone()).map_err(|_| {
                        CoreError::Validation(format!(
                            "node {}: unknown transformation {}",
                            node.id, v
                        ))
                    })?,
                };
                let fields = match config.get("fields") {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(serde_json::from_value(v.clone()).map_err(|_| {
                        CoreError::Validation(format!(
                            "node {}: fields must be an array of strings",
                            node.id
                        ))
                    })?),
                };
                Ok(NodeAction::Transform {
                    transformation,
                    fields,
                })
            }
            "action" => Self::resolve_action_kind(node, config),
            dotted if dotted.contains('.') => {
                let (provider, operation) = dotted.split_once('.').unwrap();
                if provider.is_empty() || operation.is_empty() {
                    return Ok(NodeAction::Unrecognized {
                        node_type: node.node_type.clone(),
                        kind: node.kind.clone(),
                    });
                }
                Ok(NodeAction::Provider {
                    provider: provider.to_string(),
                    operation: operation.to_string(),
                    params: config,
                })
            }
            _ if node.kind.is_some() => Self::resolve_action_kind(node, config),
            _ => Ok(NodeAction::Unrecognized {
                node_type: node.node_type.clone(),
                kind: None,
            }),
        }
    }

    fn resolve_action_kind(node: &Node, config: Value) -> Result<NodeAction, CoreError> {
        match node.kind.as_deref() {
            Some("http") => {
                let cfg: HttpActionConfig = serde_json::from_value(config).map_err(|e| {
                    CoreError::Validation(format!("node {}: invalid http config: {}", node.id, e))
                })?;
                Ok(NodeAction::Http(cfg))
            }
            Some("email") => Ok(NodeAction::Email {
                to: config.get("to").and_then(|v| v.as_str()).map(String::from),
                subject: config
                    .get("subject")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                body: config
                    .get("body")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            }),
            // Kinds that route through a provider client when one is
            // registered; the dispatcher rejects them otherwise.
            Some(kind @ ("database" | "salesforce")) => Ok(NodeAction::Provider {
                provider: kind.to_string(),
                operation: config
                    .get("operation")
                    .and_then(|v| v.as_str())
                    .unwrap_or("default")
                    .to_string(),
                params: config,
            }),
            Some(kind) if kind.contains('.') => {
                let (provider, operation) = kind.split_once('.').unwrap();
                Ok(NodeAction::Provider {
                    provider: provider.to_string(),
                    operation: operation.to_string(),
                    params: config,
                })
            }
            other => Ok(NodeAction::Unrecognized {
                node_type: node.node_type.clone(),
                kind: other.map(String::from),
            }),
        }
    }
}

impl Graph {
    /// Structural validation run at version-insert time: node ids unique,
    /// every edge endpoint resolves, and the whole thing is a DAG.
    pub fn validate(&self) -> Result<(), CoreError> {
        crate::engine::plan::build_plan(self).map(|_| ())
    }

    /// Decode from a stored `FlowVersion.graph` value
    pub fn from_value(value: &Value) -> Result<Graph, CoreError> {
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::InvalidGraph(format!("graph does not decode: {}", e)))
    }

    /// Node lookup by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of direct predecessors of `id`, in edge order
    pub fn predecessors<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a str> {
        self.edges
            .iter()
            .filter(move |e| e.to == id)
            .map(|e| e.from.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, node_type: &str, kind: Option<&str>, config: Value) -> Node {
        Node {
            id: id.to_string(),
            node_type: node_type.to_string(),
            kind: kind.map(String::from),
            label: None,
            x: 0.0,
            y: 0.0,
            config: if config.is_null() { None } else { Some(config) },
        }
    }

    #[test]
    fn test_resolve_structural_nodes() {
        assert_eq!(
            NodeAction::resolve(&node("s", "start", None, Value::Null)).unwrap(),
            NodeAction::Start
        );
        assert_eq!(
            NodeAction::resolve(&node("t", "trigger", None, Value::Null)).unwrap(),
            NodeAction::Trigger
        );
        assert_eq!(
            NodeAction::resolve(&node("e", "end", None, Value::Null)).unwrap(),
            NodeAction::End
        );
    }

    #[test]
    fn test_resolve_http_action() {
        let action = NodeAction::resolve(&node(
            "h",
            "action",
            Some("http"),
            json!({"url": "https://example.test", "method": "POST"}),
        ))
        .unwrap();
        match action {
            NodeAction::Http(cfg) => {
                assert_eq!(cfg.url, "https://example.test");
                assert_eq!(cfg.method.as_deref(), Some("POST"));
            }
            other => panic!("expected http action, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_http_missing_url_is_validation_error() {
        let err = NodeAction::resolve(&node("h", "action", Some("http"), json!({}))).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_resolve_dotted_provider_type() {
        let action =
            NodeAction::resolve(&node("m", "mtn.requestToPay", None, json!({"amount": "100"})))
                .unwrap();
        assert_eq!(
            action,
            NodeAction::Provider {
                provider: "mtn".to_string(),
                operation: "requestToPay".to_string(),
                params: json!({"amount": "100"}),
            }
        );
    }

    #[test]
    fn test_resolve_unknown_type_is_sentinel() {
        let action = NodeAction::resolve(&node("x", "webassembly", None, Value::Null)).unwrap();
        assert_eq!(
            action,
            NodeAction::Unrecognized {
                node_type: "webassembly".to_string(),
                kind: None,
            }
        );
    }

    #[test]
    fn test_transform_defaults_to_passthrough() {
        let action = NodeAction::resolve(&node("t", "transform", None, json!({}))).unwrap();
        assert_eq!(
            action,
            NodeAction::Transform {
                transformation: Transformation::Passthrough,
                fields: None,
            }
        );
    }

    #[test]
    fn test_graph_decode_and_predecessors() {
        let value = json!({
            "nodes": [
                {"id": "a", "type": "start"},
                {"id": "b", "type": "end"}
            ],
            "edges": [{"from": "a", "to": "b"}]
        });
        let graph = Graph::from_value(&value).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        let preds: Vec<_> = graph.predecessors("b").collect();
        assert_eq!(preds, vec!["a"]);
    }
}
