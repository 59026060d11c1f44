//! Graph Snapshots
//!
//! A serializable description of a graph: its nodes (by type name), the
//! values stored on unconnected inputs, node metadata and connections.
//! Plugs are referenced by node index and plug name so a snapshot can be
//! restored into a fresh graph with new ids.
//!
//! Opaque values cannot be serialized and are left out with a warning;
//! restored plugs keep their defaults.
//!
//! JSON has no spelling for NaN or infinity, so [`GraphSnapshot::to_json`]
//! refuses snapshots holding non-finite floats. MessagePack stores them
//! as is.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::topology::Topology;
use crate::error::{GraphError, Result};
use crate::value::Value;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A plug referenced by position of its node in [`GraphSnapshot::nodes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugRef {
    pub node: usize,
    pub plug: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub type_name: String,
    /// Stored input values that differ from the plug default.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub source: PlugRef,
    pub destination: PlugRef,
}

/// Serializable form of a whole graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: u32,
    pub nodes: Vec<NodeRecord>,
    pub connections: Vec<ConnectionRecord>,
}

impl GraphSnapshot {
    pub(crate) fn capture(topology: &Topology) -> Self {
        let mut index = BTreeMap::new();
        let mut nodes = Vec::with_capacity(topology.node_count());

        for (position, node) in topology.nodes().enumerate() {
            index.insert(node.id(), position);

            let mut values = BTreeMap::new();
            for (name, id) in node.plugs() {
                let Ok(plug) = topology.plug(id) else { continue };
                if !plug.is_input() || plug.input.is_some() || plug.value_hash == plug.default.hash() {
                    continue;
                }
                if matches!(plug.value, Value::Opaque(_)) {
                    warn!(node = node.name(), plug = name, "opaque value left out of snapshot");
                    continue;
                }
                values.insert(name.to_string(), plug.value.clone());
            }

            let mut metadata = BTreeMap::new();
            for (key, value) in node.metadata_entries() {
                if matches!(value, Value::Opaque(_)) {
                    warn!(node = node.name(), key = %key, "opaque metadata left out of snapshot");
                    continue;
                }
                metadata.insert(key.clone(), value.clone());
            }

            nodes.push(NodeRecord {
                name: node.name().to_string(),
                type_name: node.type_name().to_string(),
                values,
                metadata,
            });
        }

        let plug_ref = |id| -> Option<PlugRef> {
            let plug = topology.plug(id).ok()?;
            Some(PlugRef {
                node: *index.get(&plug.node)?,
                plug: plug.name.clone(),
            })
        };
        let connections = topology
            .edges()
            .into_iter()
            .filter_map(|(source, destination)| {
                Some(ConnectionRecord {
                    source: plug_ref(source)?,
                    destination: plug_ref(destination)?,
                })
            })
            .collect();

        Self {
            version: SNAPSHOT_VERSION,
            nodes,
            connections,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        self.check_finite()?;
        serde_json::to_string_pretty(self).map_err(|e| GraphError::Serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(text).map_err(|e| GraphError::Serialization(e.to_string()))?;
        snapshot.check_version()
    }

    /// Compact MessagePack encoding.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| GraphError::Serialization(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        let snapshot: Self =
            rmp_serde::from_slice(bytes).map_err(|e| GraphError::Serialization(e.to_string()))?;
        snapshot.check_version()
    }

    fn check_finite(&self) -> Result<()> {
        for node in &self.nodes {
            let entries = node.values.iter().chain(&node.metadata);
            for (name, value) in entries {
                if !is_finite(value) {
                    return Err(GraphError::Serialization(format!(
                        "{}.{name} holds a non-finite float, which JSON cannot represent",
                        node.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_version(self) -> Result<Self> {
        if self.version != SNAPSHOT_VERSION {
            return Err(GraphError::Serialization(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                self.version
            )));
        }
        Ok(self)
    }
}

fn is_finite(value: &Value) -> bool {
    match value {
        Value::Float(v) => v.is_finite(),
        Value::FloatArray(values) => values.iter().all(|v| v.is_finite()),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GraphSnapshot {
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            nodes: vec![NodeRecord {
                name: "a".into(),
                type_name: "Add".into(),
                values: BTreeMap::from([("x".to_string(), Value::Float(1.5))]),
                metadata: BTreeMap::from([("position".to_string(), Value::from(vec![10.0, 20.0]))]),
            }],
            connections: vec![ConnectionRecord {
                source: PlugRef { node: 0, plug: "sum".into() },
                destination: PlugRef { node: 0, plug: "y".into() },
            }],
        }
    }

    #[test]
    fn json_and_msgpack_encodings_agree() {
        let snapshot = sample();
        let from_json = GraphSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        let from_msgpack = GraphSnapshot::from_msgpack(&snapshot.to_msgpack().unwrap()).unwrap();
        assert_eq!(from_json, snapshot);
        assert_eq!(from_msgpack, snapshot);
    }

    #[test]
    fn unknown_versions_are_rejected() {
        let mut snapshot = sample();
        snapshot.version = 99;
        let text = snapshot.to_json().unwrap();
        assert!(matches!(
            GraphSnapshot::from_json(&text),
            Err(GraphError::Serialization(_))
        ));
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        assert!(matches!(
            GraphSnapshot::from_msgpack(&[0xc1]),
            Err(GraphError::Serialization(_))
        ));
    }

    #[test]
    fn non_finite_floats_only_survive_msgpack() {
        let mut snapshot = sample();
        snapshot.nodes[0].values.insert("x".into(), Value::Float(f64::INFINITY));
        snapshot.nodes[0]
            .metadata
            .insert("samples".into(), Value::from(vec![1.0, f64::NAN]));

        match snapshot.to_json() {
            Err(GraphError::Serialization(message)) => assert!(message.contains("a.")),
            other => panic!("unexpected result: {other:?}"),
        }

        let decoded = GraphSnapshot::from_msgpack(&snapshot.to_msgpack().unwrap()).unwrap();
        assert_eq!(decoded.nodes[0].values["x"], Value::Float(f64::INFINITY));
        match &decoded.nodes[0].metadata["samples"] {
            Value::FloatArray(values) => {
                assert_eq!(values[0], 1.0);
                assert!(values[1].is_nan());
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
