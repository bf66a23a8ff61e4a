use modgraph_core::{
    content_digest, normalize_relative_path, TransformContext, TransformFailure, TransformOptions,
    TransformedFile, Transformer,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// The code every execution unit runs: read, digest, transform.
pub struct Worker {
    transformer: Arc<dyn Transformer>,
    project_root: PathBuf,
}

impl Worker {
    pub fn new(transformer: Arc<dyn Transformer>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            transformer,
            project_root: project_root.into(),
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn transform(
        &self,
        path: &str,
        options: &TransformOptions,
    ) -> Result<TransformedFile, TransformFailure> {
        let local_path = normalize_relative_path(&self.project_root, path);
        let start = Instant::now();
        debug!(file = %local_path, "Transforming file");

        let source = std::fs::read(path)?;
        let digest = content_digest(&source);
        let context = TransformContext {
            absolute_path: path.to_string(),
            local_path,
            options: options.clone(),
        };
        let result = self.transformer.transform(&source, &context)?;

        debug!(
            file = %context.local_path,
            bytes = source.len(),
            dependencies = result.dependencies.len(),
            "Transformed file in {:?}",
            start.elapsed()
        );

        Ok(TransformedFile {
            result: Arc::new(result),
            digest,
        })
    }
}
