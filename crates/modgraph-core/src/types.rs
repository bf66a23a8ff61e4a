use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// How the origin waits for a dependency at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncKind {
    #[default]
    Sync,
    Deferred,
    Weak,
    Prefetch,
}

impl AsyncKind {
    pub fn is_async(&self) -> bool {
        !matches!(self, AsyncKind::Sync)
    }
}

impl fmt::Display for AsyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AsyncKind::Sync => "sync",
            AsyncKind::Deferred => "deferred",
            AsyncKind::Weak => "weak",
            AsyncKind::Prefetch => "prefetch",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for AsyncKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sync" => Ok(AsyncKind::Sync),
            "deferred" | "async" => Ok(AsyncKind::Deferred),
            "weak" => Ok(AsyncKind::Weak),
            "prefetch" => Ok(AsyncKind::Prefetch),
            _ => Err(format!("Unknown async kind: {}", s)),
        }
    }
}

/// A dependency as declared by the transform, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDescriptor {
    /// Reference text as written in source.
    pub name: String,
    /// Unique within the origin; correlates the edge across re-transforms.
    pub key: String,
    #[serde(default)]
    pub async_kind: AsyncKind,
    /// Unresolvable optional dependencies are skipped instead of failing.
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub locations: Vec<SourceLocation>,
}

impl DependencyDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: name.clone(),
            name,
            async_kind: AsyncKind::Sync,
            optional: false,
            locations: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_async_kind(mut self, kind: AsyncKind) -> Self {
        self.async_kind = kind;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.locations.push(location);
        self
    }

    pub fn first_location(&self) -> Option<SourceLocation> {
        self.locations.first().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDependency {
    pub absolute_path: String,
    pub data: DependencyDescriptor,
}

/// One opaque output artifact of a transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleOutput {
    #[serde(rename = "type")]
    pub output_type: String,
    pub data: serde_json::Value,
}

impl ModuleOutput {
    pub fn new(output_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            output_type: output_type.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformResult {
    pub dependencies: Vec<DependencyDescriptor>,
    pub output: Vec<ModuleOutput>,
}

/// A transform result together with the digest of the bytes it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedFile {
    pub result: Arc<TransformResult>,
    pub digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    #[default]
    Module,
    Script,
    Asset,
}

/// Per-file options that take part in the cache key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformOptions {
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub hot: bool,
    #[serde(default)]
    pub minify: bool,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub module_type: ModuleType,
    #[serde(default)]
    pub inline_requires: bool,
    #[serde(default)]
    pub custom: BTreeMap<String, serde_json::Value>,
}

impl TransformOptions {
    pub fn dev() -> Self {
        Self {
            dev: true,
            ..Self::default()
        }
    }

    pub fn for_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn as_script(mut self) -> Self {
        self.module_type = ModuleType::Script;
        self
    }
}

/// What a transformer sees besides the raw bytes.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub absolute_path: String,
    /// Path relative to the project root, `/`-separated.
    pub local_path: String,
    pub options: TransformOptions,
}

/// Failure raised by a transformer before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformFailure {
    Syntax {
        message: String,
        error_type: Option<String>,
        line: Option<u32>,
        column: Option<u32>,
        code_frame: Option<String>,
    },
    Other {
        message: String,
        stack: Option<String>,
    },
}

impl TransformFailure {
    pub fn syntax(message: impl Into<String>, line: u32, column: u32) -> Self {
        TransformFailure::Syntax {
            message: message.into(),
            error_type: None,
            line: Some(line),
            column: Some(column),
            code_frame: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        TransformFailure::Other {
            message: message.into(),
            stack: None,
        }
    }
}

impl From<std::io::Error> for TransformFailure {
    fn from(err: std::io::Error) -> Self {
        TransformFailure::other(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeEvent {
    Added(String),    // file path
    Modified(String), // file path
    Deleted(String),  // file path
}

impl ChangeEvent {
    pub fn path(&self) -> &str {
        match self {
            ChangeEvent::Added(p) | ChangeEvent::Modified(p) | ChangeEvent::Deleted(p) => p,
        }
    }
}

/// One externally batched group of change events.
pub type ChangeBatch = Arc<Vec<ChangeEvent>>;
