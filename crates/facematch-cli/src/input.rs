//! Embedding input: a JSON file or an inline comma-separated list.

use std::path::Path;

use anyhow::{bail, Context, Result};
use facematch_core::Embedding;
use serde::Deserialize;

/// Accepted JSON shapes: a bare array, or an object carrying the vector.
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingFile {
    Bare(Vec<f32>),
    Wrapped {
        #[serde(alias = "face_encoding")]
        embedding: Vec<f32>,
    },
}

/// Read an embedding from `source`: an existing file path, else a list like `0.1,0.2,0.3`.
pub fn load_embedding(source: &str) -> Result<Embedding> {
    let path = Path::new(source);
    let values = if path.is_file() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read embedding file {}", path.display()))?;
        match serde_json::from_str::<EmbeddingFile>(&text)
            .with_context(|| format!("{} is not a JSON embedding", path.display()))?
        {
            EmbeddingFile::Bare(v) | EmbeddingFile::Wrapped { embedding: v } => v,
        }
    } else {
        parse_list(source)?
    };

    let embedding = Embedding::new(values);
    embedding
        .validate()
        .with_context(|| format!("invalid embedding from '{source}'"))?;
    Ok(embedding)
}

fn parse_list(source: &str) -> Result<Vec<f32>> {
    let trimmed = source.trim().trim_start_matches('[').trim_end_matches(']');
    if trimmed.trim().is_empty() {
        bail!("'{source}' is neither a file nor a list of numbers");
    }
    trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("'{}' is not a number", part.trim()))
        })
        .collect()
}
