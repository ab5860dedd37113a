use anyhow::{Context, Result};
use glance_core::{CosineMatcher, Descriptor, EnrolledDescriptor, Matcher};
use serde::Deserialize;
use std::path::Path;
use std::process::ExitCode;

/// Either a bare JSON array or a captured `success` event.
#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorFile {
    Bare(Vec<f32>),
    Event {
        descriptor: Vec<f32>,
        #[serde(default = "default_normalized")]
        normalized: bool,
    },
}

fn default_normalized() -> bool {
    true
}

impl From<DescriptorFile> for Descriptor {
    fn from(file: DescriptorFile) -> Self {
        match file {
            DescriptorFile::Bare(values) => Descriptor {
                values,
                normalized: true,
            },
            DescriptorFile::Event {
                descriptor,
                normalized,
            } => Descriptor {
                values: descriptor,
                normalized,
            },
        }
    }
}

fn read_descriptor(path: &Path) -> Result<Descriptor> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading descriptor {}", path.display()))?;
    let file: DescriptorFile = serde_json::from_str(&raw)
        .with_context(|| format!("parsing descriptor {}", path.display()))?;
    Ok(file.into())
}

pub fn run(a: &Path, b: &Path, threshold: f32) -> Result<ExitCode> {
    let query = read_descriptor(a)?;
    let reference = read_descriptor(b)?;
    if query.values.len() != reference.values.len() {
        tracing::warn!(
            a = query.values.len(),
            b = reference.values.len(),
            "descriptor lengths differ; similarity is 0"
        );
    }

    let gallery = [EnrolledDescriptor {
        id: b.display().to_string(),
        label: b
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        descriptor: reference,
    }];
    let result = CosineMatcher.compare(&query, &gallery, threshold);

    println!(
        "{}",
        serde_json::json!({
            "similarity": result.similarity,
            "threshold": threshold,
            "matched": result.matched,
        })
    );
    Ok(ExitCode::SUCCESS)
}
