//! Job spec builders
//!
//! A builder turns one data context into a concrete job spec, or
//! explains why it cannot. Builders are pure and synchronous: the
//! launcher fetches the context's resource list and hands it in.
//!
//! Most pipelines need no custom code; [`TemplateBuilder`] covers them
//! with a declarative definition (command template, required inputs,
//! resources) loaded from the pipelines file.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::Deserialize;

use gantry_core::domain::context::DataContext;
use gantry_core::domain::spec::{JobSpec, ResourceRequest};

/// Builder verdict for one context.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Inputs are in place; this is the job to run.
    Ready(JobSpec),
    /// Inputs are missing; revisit when the context changes.
    MissingInputs(String),
    /// This pipeline does not apply to this context at all.
    NotApplicable,
}

/// Builds job specs for one pipeline.
pub trait SpecBuilder: Send + Sync {
    /// Identifier contexts reference this builder by.
    fn spec_id(&self) -> &str;

    /// Judges one context given the resources available on it.
    ///
    /// An `Err` means the builder itself is broken (bad template,
    /// impossible context); the context is skipped and the error
    /// logged, but no task is created or changed.
    fn evaluate(&self, context: &DataContext, resources: &[String]) -> Result<Evaluation>;
}

/// The data level a pipeline works at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One job per scan.
    Scan,
    /// One job per session.
    Session,
}

/// Declarative pipeline definition from the pipelines file.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSpec {
    /// Spec id contexts are tagged with.
    pub id: String,
    /// Whether the pipeline runs per scan or per session.
    pub level: Granularity,
    /// Command template; see [`TemplateBuilder`] for placeholders.
    pub command: String,
    /// Resource names that must exist on the context before a job is
    /// worth submitting.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Cluster resources the job asks for.
    pub resources: ResourceRequest,
}

/// Template-driven [`SpecBuilder`].
///
/// The command template may use `{project}`, `{subject}`, `{session}`,
/// `{scan}` and `{label}` placeholders. `{scan}` is only valid in
/// scan-level pipelines.
pub struct TemplateBuilder {
    spec: TemplateSpec,
}

impl TemplateBuilder {
    pub fn new(spec: TemplateSpec) -> Self {
        Self { spec }
    }
}

impl SpecBuilder for TemplateBuilder {
    fn spec_id(&self) -> &str {
        &self.spec.id
    }

    fn evaluate(&self, context: &DataContext, resources: &[String]) -> Result<Evaluation> {
        let level_matches = match self.spec.level {
            Granularity::Scan => !context.is_session_level(),
            Granularity::Session => context.is_session_level(),
        };
        if !level_matches {
            return Ok(Evaluation::NotApplicable);
        }

        let missing: Vec<&str> = self
            .spec
            .inputs
            .iter()
            .map(String::as_str)
            .filter(|input| !resources.iter().any(|r| r == input))
            .collect();
        if !missing.is_empty() {
            return Ok(Evaluation::MissingInputs(format!(
                "missing inputs: {}",
                missing.join(", ")
            )));
        }

        let command = render_command(&self.spec.command, context)?;
        Ok(Evaluation::Ready(JobSpec {
            resources: self.spec.resources.clone(),
            command,
        }))
    }
}

/// Fills the context placeholders in a command template.
fn render_command(template: &str, context: &DataContext) -> Result<String> {
    if template.contains("{scan}") && context.scan.is_none() {
        bail!(
            "command template uses {{scan}} but context {} is session level",
            context.label()
        );
    }

    let command = template
        .replace("{project}", &context.project)
        .replace("{subject}", &context.subject)
        .replace("{session}", &context.session)
        .replace("{scan}", context.scan.as_deref().unwrap_or_default())
        .replace("{label}", &context.label());

    if let Some(name) = unresolved_placeholder(&command) {
        bail!("unresolved placeholder {{{}}} in command template", name);
    }
    Ok(command)
}

/// Finds a placeholder-shaped token the renderer did not fill.
///
/// Bare lowercase `{name}` tokens are reserved for placeholders;
/// anything else in the command stays opaque, so shell constructs like
/// `${HOME}` or `awk '{print $1}'` pass through untouched.
fn unresolved_placeholder(command: &str) -> Option<&str> {
    let bytes = command.as_bytes();
    let mut from = 0;
    while let Some(offset) = command[from..].find('{') {
        let start = from + offset;
        from = start + 1;
        // `${...}` is the shell's, not ours.
        if start > 0 && bytes[start - 1] == b'$' {
            continue;
        }
        let rest = &command[start + 1..];
        if let Some(end) = rest.find('}') {
            let name = &rest[..end];
            if !name.is_empty() && name.bytes().all(|b| b.is_ascii_lowercase()) {
                return Some(name);
            }
        }
    }
    None
}

/// Lookup table from spec id to builder.
#[derive(Default)]
pub struct BuilderRegistry {
    builders: HashMap<String, Arc<dyn SpecBuilder>>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a builder. Duplicate spec ids are a configuration
    /// mistake and rejected.
    pub fn register(&mut self, builder: Arc<dyn SpecBuilder>) -> Result<()> {
        let id = builder.spec_id().to_string();
        if self.builders.contains_key(&id) {
            bail!("duplicate builder for spec id {}", id);
        }
        self.builders.insert(id, builder);
        Ok(())
    }

    pub fn get(&self, spec_id: &str) -> Option<&Arc<dyn SpecBuilder>> {
        self.builders.get(spec_id)
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(level: Granularity, command: &str, inputs: &[&str]) -> TemplateBuilder {
        TemplateBuilder::new(TemplateSpec {
            id: "fmriqa".to_string(),
            level,
            command: command.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            resources: ResourceRequest {
                walltime: "01:00:00".to_string(),
                memory_mb: 2048,
                cpus: 1,
                queue: None,
            },
        })
    }

    fn scan_context() -> DataContext {
        DataContext::scan("demo", "S01", "S01a", "scan2", "fmriqa")
    }

    fn session_context() -> DataContext {
        DataContext::session("demo", "S01", "S01a", "fmriqa")
    }

    #[test]
    fn test_scan_template_renders_all_placeholders() {
        let builder = template(
            Granularity::Scan,
            "qa.sh {project}/{subject}/{session}/{scan} --out {label}",
            &[],
        );
        let verdict = builder.evaluate(&scan_context(), &[]).unwrap();
        match verdict {
            Evaluation::Ready(spec) => {
                assert_eq!(
                    spec.command,
                    "qa.sh demo/S01/S01a/scan2 --out demo-x-S01-x-S01a-x-scan2-x-fmriqa"
                );
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn test_level_mismatch_is_not_applicable() {
        let builder = template(Granularity::Scan, "qa.sh {label}", &[]);
        assert_eq!(
            builder.evaluate(&session_context(), &[]).unwrap(),
            Evaluation::NotApplicable
        );

        let builder = template(Granularity::Session, "qa.sh {label}", &[]);
        assert_eq!(
            builder.evaluate(&scan_context(), &[]).unwrap(),
            Evaluation::NotApplicable
        );
    }

    #[test]
    fn test_missing_inputs_are_named() {
        let builder = template(Granularity::Scan, "qa.sh {label}", &["NIFTI", "EDAT"]);
        let verdict = builder
            .evaluate(&scan_context(), &["NIFTI".to_string()])
            .unwrap();
        assert_eq!(
            verdict,
            Evaluation::MissingInputs("missing inputs: EDAT".to_string())
        );

        let verdict = builder
            .evaluate(
                &scan_context(),
                &["NIFTI".to_string(), "EDAT".to_string(), "SNAPSHOTS".to_string()],
            )
            .unwrap();
        assert!(matches!(verdict, Evaluation::Ready(_)));
    }

    #[test]
    fn test_scan_placeholder_rejected_for_session_pipeline() {
        let builder = template(Granularity::Session, "qa.sh {scan}", &[]);
        let err = builder.evaluate(&session_context(), &[]).unwrap_err();
        assert!(err.to_string().contains("session level"));
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let builder = template(Granularity::Scan, "qa.sh {assessor}", &[]);
        let err = builder.evaluate(&scan_context(), &[]).unwrap_err();
        assert!(err.to_string().contains("unresolved placeholder {assessor}"));
    }

    #[test]
    fn test_shell_braces_pass_through() {
        let builder = template(
            Granularity::Scan,
            "OUT=${HOME}/qa && qa.sh {scan} | awk '{print $1}' > $OUT/{label}.txt",
            &[],
        );
        let verdict = builder.evaluate(&scan_context(), &[]).unwrap();
        match verdict {
            Evaluation::Ready(spec) => {
                assert_eq!(
                    spec.command,
                    "OUT=${HOME}/qa && qa.sh scan2 | awk '{print $1}' \
                     > $OUT/demo-x-S01-x-S01a-x-scan2-x-fmriqa.txt"
                );
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn test_registry_rejects_duplicate_ids() {
        let mut registry = BuilderRegistry::new();
        registry
            .register(Arc::new(template(Granularity::Scan, "a {label}", &[])))
            .unwrap();
        assert!(registry.get("fmriqa").is_some());
        assert!(
            registry
                .register(Arc::new(template(Granularity::Scan, "b {label}", &[])))
                .is_err()
        );
        assert_eq!(registry.len(), 1);
    }
}
