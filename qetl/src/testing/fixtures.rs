//! Sample pipelines.

use crate::pipeline::{
    ExecutionParams, InputSource, OutputSpec, PipelineSpec, TransformStep,
};
use serde_json::json;

/// The drug discovery pipeline used throughout the documentation.
///
/// One input (`drug_data`), a molecular encoder, a homology analyzer that
/// depends on it, and a JSON report.
#[must_use]
pub fn drug_discovery_pipeline() -> PipelineSpec {
    let mut spec = PipelineSpec::new("Drug Discovery");
    spec.description = Some("Molecular encoding and topological analysis".to_string());
    spec.inputs.push(
        InputSource::new("drug_data", "s3://bucket/compounds.csv").with_type("csv"),
    );
    spec.steps.push(
        TransformStep::new("encode", "molecular_encoder")
            .with_config([("encoding".to_string(), json!("ecfp4"))].into_iter().collect()),
    );
    spec.steps.push(
        TransformStep::new("analyze", "quantum_homology_analyzer")
            .with_config([("max_dimension".to_string(), json!(2))].into_iter().collect())
            .with_dependency("encode"),
    );
    spec.outputs.push(OutputSpec::new("report", "results/report.json"));
    spec.execution = ExecutionParams::new().with_priority(80).with_timeout_seconds(1800);
    spec
}

/// A linear chain `step_0 -> step_1 -> ... -> step_{len-1}`.
#[must_use]
pub fn chain_pipeline(len: usize) -> PipelineSpec {
    let mut spec = PipelineSpec::new(format!("chain-{len}"));
    spec.inputs.push(InputSource::new("source", "data/in.csv"));
    for i in 0..len {
        let mut step = TransformStep::new(format!("step_{i}"), "passthrough");
        if i > 0 {
            step = step.with_dependency(format!("step_{}", i - 1));
        }
        spec.steps.push(step);
    }
    spec.outputs.push(OutputSpec::new("sink", "data/out.json"));
    spec
}

/// `width` independent steps feeding one final `merge` step.
#[must_use]
pub fn wide_pipeline(width: usize) -> PipelineSpec {
    let mut spec = PipelineSpec::new(format!("wide-{width}"));
    spec.inputs.push(InputSource::new("source", "data/in.csv"));
    let names: Vec<String> = (0..width).map(|i| format!("branch_{i}")).collect();
    for name in &names {
        spec.steps.push(TransformStep::new(name.clone(), "mapper"));
    }
    spec.steps
        .push(TransformStep::new("merge", "reducer").with_dependencies(names));
    spec.outputs.push(OutputSpec::new("sink", "data/out.json"));
    spec
}
