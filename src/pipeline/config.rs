// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 treeflow contributors

//! Pipeline configuration

use serde::de::{self, DeserializeOwned, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::errors::{TreeflowError, TreeflowResult};
use crate::stream::StreamConfig;

/// Configuration of one pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,

    /// Schedule spec; empty re-triggers as fast as the stream accepts
    #[serde(default)]
    pub schedule: String,

    /// Outcomes the circuit breaker samples before it may open
    #[serde(default = "default_samples")]
    pub circuit_breaker_samples: usize,

    /// Failure rate at which the circuit breaker opens
    #[serde(default = "default_rate")]
    pub circuit_breaker_rate: f64,

    /// Delay imposed on each invocation while the breaker is open
    #[serde(default = "default_delay_ms")]
    pub circuit_breaker_delay_ms: u64,

    /// Start together with the process
    #[serde(default)]
    pub bootstrap: bool,

    #[serde(default)]
    pub components: Vec<PluginConfig>,

    #[serde(default)]
    pub processors: Vec<PluginConfig>,

    pub stream: StreamConfig,
}

fn default_samples() -> usize {
    10
}

fn default_rate() -> f64 {
    0.6
}

fn default_delay_ms() -> u64 {
    1000
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>, stream: StreamConfig) -> Self {
        Self {
            name: name.into(),
            schedule: String::new(),
            circuit_breaker_samples: default_samples(),
            circuit_breaker_rate: default_rate(),
            circuit_breaker_delay_ms: default_delay_ms(),
            bootstrap: false,
            components: Vec::new(),
            processors: Vec::new(),
            stream,
        }
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    pub fn with_component(mut self, name: impl Into<String>, raw_config: impl Into<String>) -> Self {
        self.components.push(PluginConfig::new(name, raw_config));
        self
    }

    pub fn with_processor(mut self, name: impl Into<String>, raw_config: impl Into<String>) -> Self {
        self.processors.push(PluginConfig::new(name, raw_config));
        self
    }

    pub fn with_breaker(mut self, samples: usize, rate: f64, delay: Duration) -> Self {
        self.circuit_breaker_samples = samples;
        self.circuit_breaker_rate = rate;
        self.circuit_breaker_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn circuit_breaker_delay(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_delay_ms)
    }

    /// Load from a `.yaml`, `.yml`, `.json` or `.toml` file
    pub fn from_file(path: &Path) -> TreeflowResult<Self> {
        load(path)
    }

    pub fn from_yaml(yaml: &str) -> TreeflowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    pub fn from_json(json: &str) -> TreeflowResult<Self> {
        serde_json::from_str(json).map_err(Into::into)
    }

    pub fn from_toml(text: &str) -> TreeflowResult<Self> {
        toml::from_str(text).map_err(Into::into)
    }

    pub fn to_yaml(&self) -> TreeflowResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }
}

/// A set of pipelines loaded together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

impl Manifest {
    pub fn from_file(path: &Path) -> TreeflowResult<Self> {
        load(path)
    }

    pub fn from_yaml(yaml: &str) -> TreeflowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    pub fn to_yaml(&self) -> TreeflowResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> TreeflowResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| TreeflowError::FileReadError {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(Into::into),
        Some("json") => serde_json::from_str(&content).map_err(Into::into),
        Some("toml") => toml::from_str(&content).map_err(Into::into),
        _ => Err(TreeflowError::ConfigFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// A factory name with the raw configuration handed to it
///
/// Written as a single-entry map, `name: config`. The config may be a string,
/// used verbatim, or any structured value, which is re-encoded as YAML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub name: String,
    pub raw_config: String,
}

impl PluginConfig {
    pub fn new(name: impl Into<String>, raw_config: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw_config: raw_config.into(),
        }
    }
}

impl Serialize for PluginConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.raw_config)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for PluginConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntryVisitor;

        impl<'de> Visitor<'de> for EntryVisitor {
            type Value = PluginConfig;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a single-entry map of factory name to config")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let Some((name, value)) = map.next_entry::<String, serde_yaml::Value>()? else {
                    return Err(de::Error::invalid_length(0, &self));
                };
                if map.next_key::<String>()?.is_some() {
                    return Err(de::Error::custom(format!(
                        "'{}' must be the only factory in its entry",
                        name
                    )));
                }

                let raw_config = match value {
                    serde_yaml::Value::Null => String::new(),
                    serde_yaml::Value::String(s) => s,
                    other => serde_yaml::to_string(&other).map_err(de::Error::custom)?,
                };
                Ok(PluginConfig { name, raw_config })
            }
        }

        deserializer.deserialize_map(EntryVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PIPELINE: &str = r#"
name: ticks
schedule: "@every 1s"
bootstrap: true
components:
  - io_writer:
      target: stdout
processors:
  - ticker:
  - printer: "prefix: tick"
stream:
  name: ticker
  childs:
    - name: printer
      replica: 2
"#;

    #[test]
    fn test_parse_pipeline_yaml() {
        let config = PipelineConfig::from_yaml(PIPELINE).unwrap();

        assert_eq!(config.name, "ticks");
        assert_eq!(config.schedule, "@every 1s");
        assert!(config.bootstrap);
        assert_eq!(config.circuit_breaker_samples, 10);
        assert!((config.circuit_breaker_rate - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.circuit_breaker_delay(), Duration::from_secs(1));

        assert_eq!(config.components[0].name, "io_writer");
        assert!(config.components[0].raw_config.contains("target: stdout"));
        assert_eq!(config.processors[0].raw_config, "");
        assert_eq!(config.processors[1].raw_config, "prefix: tick");

        assert_eq!(config.stream.children[0].name, "printer");
        assert_eq!(config.stream.children[0].replica, 2);
    }

    #[test]
    fn test_multi_entry_plugin_rejected() {
        let yaml = r#"
name: p
processors:
  - a: ""
    b: ""
stream:
  name: a
"#;
        assert!(PipelineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = PipelineConfig::from_yaml(PIPELINE).unwrap();
        let again = PipelineConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(config, again);
    }

    #[test]
    fn test_json_and_toml() {
        let json = r#"{"name": "p", "processors": [{"ticker": ""}], "stream": {"name": "ticker"}}"#;
        let config = PipelineConfig::from_json(json).unwrap();
        assert_eq!(config.processors[0].name, "ticker");

        let toml = r#"
name = "p"
schedule = "@hourly"

[stream]
name = "root"
"#;
        let config = PipelineConfig::from_toml(toml).unwrap();
        assert_eq!(config.schedule, "@hourly");
        assert_eq!(config.stream.name, "root");
    }

    #[test]
    fn test_manifest_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipelines.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "pipelines:\n  - name: p1\n    stream:\n      name: root").unwrap();

        let manifest = Manifest::from_file(&path).unwrap();
        assert_eq!(manifest.pipelines.len(), 1);
        assert_eq!(manifest.pipelines[0].name, "p1");

        let other = dir.path().join("pipelines.ini");
        std::fs::write(&other, "").unwrap();
        assert!(matches!(
            Manifest::from_file(&other),
            Err(TreeflowError::ConfigFormat { .. })
        ));
    }
}
