//! Shortcuts for the standard QETL components.
//!
//! Each helper fills in the component id and its main parameters; extra
//! entries in `options.config` are merged on top and win on conflict.

use super::builder::{JobBuilder, TransformOptions};
use super::spec::ConfigMap;
use crate::errors::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Component id of the topological data analysis stage.
pub const QUANTUM_HOMOLOGY_ANALYZER: &str = "quantum_homology_analyzer";
/// Component id of the pebbling-game memory optimizer.
pub const WILLIAMS_PEBBLER: &str = "williams_pebbler";
/// Component id of the holographic search stage.
pub const HOLOGRAPHIC_GROVER: &str = "holographic_grover";
/// Component id of the wave encoder.
pub const WAVE_ENCODER: &str = "wave_encoder";
/// Component id of the wave decoder.
pub const WAVE_DECODER: &str = "wave_decoder";

/// Description of a processing component a backend offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Component id used in `transformations[].component`.
    pub name: String,
    /// Human readable summary.
    #[serde(default)]
    pub description: String,
    /// Component version.
    #[serde(default)]
    pub version: String,
    /// Component category, e.g. `encoder` or `analyzer`.
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl ComponentInfo {
    fn builtin(name: &str, description: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            version: "1.0".to_string(),
            kind: kind.to_string(),
        }
    }
}

/// The standard components every QETL installation ships.
#[must_use]
pub fn builtin_components() -> Vec<ComponentInfo> {
    vec![
        ComponentInfo::builtin(WAVE_ENCODER, "Quantum wave encoding component", "encoder"),
        ComponentInfo::builtin(WAVE_DECODER, "Quantum wave decoding component", "decoder"),
        ComponentInfo::builtin(
            QUANTUM_HOMOLOGY_ANALYZER,
            "Quantum homology analysis component",
            "analyzer",
        ),
        ComponentInfo::builtin(WILLIAMS_PEBBLER, "Williams pebbling optimization component", "optimizer"),
        ComponentInfo::builtin(HOLOGRAPHIC_GROVER, "Holographic Grover search component", "search"),
    ]
}

impl JobBuilder {
    /// Adds a quantum homology analyzer.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if `options.name` is taken.
    pub fn add_quantum_homology_analyzer(
        self,
        dimensions: u32,
        precision: &str,
        options: TransformOptions,
    ) -> Result<Self> {
        let options = merge(
            [("dimensions", json!(dimensions)), ("precision", json!(precision))],
            options,
        );
        self.add_transformation(QUANTUM_HOMOLOGY_ANALYZER, options)
    }

    /// Adds a Williams pebbling optimizer (`optimization_level` 1 to 3).
    ///
    /// # Errors
    ///
    /// `DuplicateName` if `options.name` is taken.
    pub fn add_williams_pebbler(self, optimization_level: u8, options: TransformOptions) -> Result<Self> {
        let options = merge([("optimization_level", json!(optimization_level))], options);
        self.add_transformation(WILLIAMS_PEBBLER, options)
    }

    /// Adds a holographic Grover search.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if `options.name` is taken.
    pub fn add_holographic_grover(self, search_iterations: u64, options: TransformOptions) -> Result<Self> {
        let options = merge([("search_iterations", json!(search_iterations))], options);
        self.add_transformation(HOLOGRAPHIC_GROVER, options)
    }

    /// Adds a wave encoder, e.g. `quantum_fourier` or `molecular_orbital`.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if `options.name` is taken.
    pub fn add_wave_encoder(self, encoding_type: &str, options: TransformOptions) -> Result<Self> {
        let options = merge([("encoding_type", json!(encoding_type))], options);
        self.add_transformation(WAVE_ENCODER, options)
    }

    /// Adds a wave decoder.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if `options.name` is taken.
    pub fn add_wave_decoder(self, decoding_type: &str, options: TransformOptions) -> Result<Self> {
        let options = merge([("decoding_type", json!(decoding_type))], options);
        self.add_transformation(WAVE_DECODER, options)
    }
}

fn merge<const N: usize>(defaults: [(&str, Value); N], mut options: TransformOptions) -> TransformOptions {
    let mut config: ConfigMap = defaults
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
    config.append(&mut options.config);
    options.config = config;
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use std::sync::Arc;

    fn builder() -> JobBuilder {
        JobBuilder::new(Arc::new(ScriptedRunner::new()))
    }

    #[test]
    fn test_homology_analyzer_defaults() {
        let spec = builder()
            .add_quantum_homology_analyzer(4, "high", TransformOptions::new())
            .unwrap()
            .spec();

        let step = &spec.steps[0];
        assert_eq!(step.name, "quantum_homology_analyzer_1");
        assert_eq!(step.component, QUANTUM_HOMOLOGY_ANALYZER);
        assert_eq!(step.config["dimensions"], json!(4));
        assert_eq!(step.config["precision"], json!("high"));
    }

    #[test]
    fn test_extra_config_overrides_defaults() {
        let spec = builder()
            .add_wave_encoder(
                "quantum_fourier",
                TransformOptions::named("enc")
                    .with_config_entry("encoding_type", json!("molecular_orbital"))
                    .with_config_entry("qubits", json!(12)),
            )
            .unwrap()
            .spec();

        let step = spec.step("enc").unwrap();
        assert_eq!(step.config["encoding_type"], json!("molecular_orbital"));
        assert_eq!(step.config["qubits"], json!(12));
    }

    #[test]
    fn test_grover_with_dependencies() {
        let spec = builder()
            .add_williams_pebbler(2, TransformOptions::named("pebble"))
            .unwrap()
            .add_holographic_grover(1000, TransformOptions::new().with_dependency("pebble"))
            .unwrap()
            .add_wave_decoder("quantum_fourier", TransformOptions::new())
            .unwrap()
            .spec();

        assert!(spec.validate().ok);
        let grover = spec.step("holographic_grover_2").unwrap();
        assert!(grover.dependencies.contains("pebble"));
        assert_eq!(grover.config["search_iterations"], json!(1000));
        assert_eq!(spec.steps[2].component, WAVE_DECODER);
    }

    #[test]
    fn test_builtin_catalogue_covers_shortcuts() {
        let names: Vec<String> = builtin_components().into_iter().map(|c| c.name).collect();
        for component in [
            WAVE_ENCODER,
            WAVE_DECODER,
            QUANTUM_HOMOLOGY_ANALYZER,
            WILLIAMS_PEBBLER,
            HOLOGRAPHIC_GROVER,
        ] {
            assert!(names.iter().any(|n| n == component), "{component}");
        }

        let value = serde_json::to_value(&builtin_components()[0]).unwrap();
        assert_eq!(value["type"], json!("encoder"));
    }
}
