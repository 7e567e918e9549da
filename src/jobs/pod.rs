use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The subset of a Kubernetes pod spec that rehearsals inspect or rewrite.
///
/// Every field the engine does not care about is kept verbatim in `extra`, so a
/// derived job submits exactly the pod the configuration declared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A container environment variable: either a literal `value` or a reference
/// through `value_from`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    pub fn literal(name: &str, value: &str) -> Self {
        Self {
            name: name.to_owned(),
            value: value.to_owned(),
            value_from: None,
        }
    }

    pub fn from_source(name: &str, source: EnvVarSource) -> Self {
        Self {
            name: name.to_owned(),
            value: String::new(),
            value_from: Some(source),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<KeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<KeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_field_ref: Option<Value>,
}

impl EnvVarSource {
    pub fn config_map(name: &str, key: &str) -> Self {
        Self {
            config_map_key_ref: Some(KeySelector {
                name: name.to_owned(),
                key: key.to_owned(),
                optional: None,
            }),
            ..Self::default()
        }
    }
}

/// Selects one key out of a named config map or secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySelector {
    pub name: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(flatten)]
    pub source: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_pod_fields_survive_round_trip() {
        let yaml = r"
serviceAccountName: ci-operator
containers:
- command: [ci-operator]
  args: [--give-pr-author-access-to-namespace=true]
  resources:
    requests:
      cpu: 10m
  env:
  - name: CONFIG_SPEC
    valueFrom:
      configMapKeyRef:
        name: ci-operator-configs
        key: master.yaml
";
        let spec: PodSpec = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(spec.extra["serviceAccountName"], "ci-operator");
        assert!(spec.containers[0].extra.contains_key("resources"));
        assert_eq!(
            spec.containers[0].env[0].value_from,
            Some(EnvVarSource::config_map("ci-operator-configs", "master.yaml"))
        );

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["serviceAccountName"], "ci-operator");
        assert_eq!(json["containers"][0]["resources"]["requests"]["cpu"], "10m");
        assert!(json.get("volumes").is_none(), "empty volumes are omitted");
    }
}
