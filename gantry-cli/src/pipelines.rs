//! Pipeline definitions file
//!
//! Pipelines are declared in a TOML file, one `[[pipeline]]` table per
//! spec id, and turned into template builders at startup. The file is
//! the CLI's only pipeline source; nothing is hardcoded.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use gantry_engine::{BuilderRegistry, TemplateBuilder, TemplateSpec};

/// On-disk shape of the pipelines file.
#[derive(Debug, Deserialize)]
pub struct PipelinesFile {
    #[serde(default)]
    pub pipeline: Vec<TemplateSpec>,
}

/// Loads a pipelines file and registers one builder per entry.
pub fn load_builders(path: &Path) -> Result<BuilderRegistry> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    let file: PipelinesFile =
        toml::from_str(&text).with_context(|| format!("could not parse {}", path.display()))?;

    let mut registry = BuilderRegistry::new();
    for spec in file.pipeline {
        registry.register(Arc::new(TemplateBuilder::new(spec)))?;
    }
    if registry.is_empty() {
        bail!("{} defines no pipelines", path.display());
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_engine::Granularity;

    #[test]
    fn test_parses_pipeline_entries() {
        let text = r#"
            [[pipeline]]
            id = "fmriqa"
            level = "scan"
            command = "run_fmriqa.sh {project} {session} {scan}"
            inputs = ["NIFTI"]

            [pipeline.resources]
            walltime = "08:00:00"
            memory_mb = 4096
            cpus = 2
            queue = "normal"

            [[pipeline]]
            id = "freesurfer"
            level = "session"
            command = "recon-all.sh {session}"

            [pipeline.resources]
            walltime = "48:00:00"
            memory_mb = 16384
            cpus = 8
        "#;

        let file: PipelinesFile = toml::from_str(text).unwrap();
        assert_eq!(file.pipeline.len(), 2);

        let qa = &file.pipeline[0];
        assert_eq!(qa.id, "fmriqa");
        assert_eq!(qa.level, Granularity::Scan);
        assert_eq!(qa.inputs, vec!["NIFTI"]);
        assert_eq!(qa.resources.queue.as_deref(), Some("normal"));

        let fs = &file.pipeline[1];
        assert_eq!(fs.level, Granularity::Session);
        assert!(fs.inputs.is_empty());
        assert_eq!(fs.resources.queue, None);
    }

    #[test]
    fn test_empty_file_defines_no_pipelines() {
        let file: PipelinesFile = toml::from_str("").unwrap();
        assert!(file.pipeline.is_empty());
    }
}
