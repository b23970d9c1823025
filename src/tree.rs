// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Configuration tree returned by the authority.
// Author: Lukas Bower

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A node of a configuration tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransNode {
    Bucket(ConfigBucket),
    Object(TransObject),
}

/// Named container of nodes; the root of every fetched configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigBucket {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub children: Vec<TransNode>,
}

/// A single managed resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransObject {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Why a decoded value is not a usable configuration.
#[derive(Debug, PartialEq)]
pub enum TreeError {
    /// Top level is not a bucket; carries what it was instead.
    NotABucket(String),
    Malformed(String),
}

impl ConfigBucket {
    /// Validate a decoded payload as a configuration root.
    pub fn from_value(value: Value) -> Result<Self, TreeError> {
        let found = describe(&value);
        if found != "bucket" {
            return Err(TreeError::NotABucket(found));
        }
        match serde_json::from_value::<TransNode>(value) {
            Ok(TransNode::Bucket(bucket)) => Ok(bucket),
            Ok(TransNode::Object(_)) => Err(TreeError::NotABucket("object".into())),
            Err(err) => Err(TreeError::Malformed(err.to_string())),
        }
    }

    /// Every object in the tree, depth first.
    pub fn objects(&self) -> Vec<&TransObject> {
        let mut out = Vec::new();
        collect_objects(&self.children, &mut out);
        out
    }
}

fn collect_objects<'a>(nodes: &'a [TransNode], out: &mut Vec<&'a TransObject>) {
    for node in nodes {
        match node {
            TransNode::Bucket(bucket) => collect_objects(&bucket.children, out),
            TransNode::Object(object) => out.push(object),
        }
    }
}

/// Short type name of a JSON value, using the node kind when present.
fn describe(value: &Value) -> String {
    match value {
        Value::Object(map) => match map.get("kind") {
            Some(Value::String(kind)) => kind.clone(),
            _ => "map".into(),
        },
        Value::Array(_) => "array".into(),
        Value::String(_) => "string".into(),
        Value::Number(_) => "number".into(),
        Value::Bool(_) => "boolean".into(),
        Value::Null => "null".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "kind": "bucket",
            "name": "main",
            "type": "class",
            "children": [
                {"kind": "object", "name": "/etc/motd", "type": "file",
                 "params": {"content": "hi"}},
                {"kind": "bucket", "name": "web", "children": [
                    {"kind": "object", "name": "nginx", "type": "package"}
                ]}
            ]
        })
    }

    #[test]
    fn bucket_tree_decodes() {
        let bucket = ConfigBucket::from_value(sample()).expect("bucket");
        assert_eq!(bucket.name, "main");
        let names: Vec<_> = bucket.objects().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["/etc/motd", "nginx"]);
    }

    #[test]
    fn non_bucket_reports_its_type() {
        assert_eq!(
            ConfigBucket::from_value(json!(["a"])),
            Err(TreeError::NotABucket("array".into()))
        );
        assert_eq!(
            ConfigBucket::from_value(json!({"kind": "object", "name": "x", "type": "file"})),
            Err(TreeError::NotABucket("object".into()))
        );
    }

    #[test]
    fn malformed_children_are_rejected() {
        let err = ConfigBucket::from_value(json!({"kind": "bucket", "children": [{"kind": "object"}]}))
            .unwrap_err();
        assert!(matches!(err, TreeError::Malformed(_)));
    }
}
