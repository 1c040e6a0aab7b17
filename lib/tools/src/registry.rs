//! The tool registry.

use crate::definition::ToolDefinition;
use crate::error::{SchemaError, ToolExecutionError};
use crate::openapi::parse_operations;
use rootcause::Report;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, instrument};

/// Immutable set of tools built once at startup.
///
/// Holds no external resources; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Loads the registry from an OpenAPI document on disk.
    ///
    /// Files ending in `.yaml` or `.yml` are read as YAML, everything else as
    /// JSON.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] report if the document is absent,
    /// unparsable, or contains a duplicate or malformed operation.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, Report<SchemaError>> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(SchemaError::DocumentMissing { path: display }.into());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| SchemaError::DocumentUnreadable {
            path: display.clone(),
            reason: e.to_string(),
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml" | "yml")
        );
        let registry = if is_yaml {
            Self::from_yaml_str(&raw)?
        } else {
            Self::from_json_str(&raw)?
        };
        info!(tools = registry.len(), "Loaded tool registry");
        Ok(registry)
    }

    /// Builds the registry from JSON text.
    pub fn from_json_str(raw: &str) -> Result<Self, SchemaError> {
        let document: JsonValue =
            serde_json::from_str(raw).map_err(|e| SchemaError::DocumentInvalid {
                reason: e.to_string(),
            })?;
        Self::from_document(&document)
    }

    /// Builds the registry from YAML text.
    pub fn from_yaml_str(raw: &str) -> Result<Self, SchemaError> {
        let document: JsonValue =
            serde_yaml::from_str(raw).map_err(|e| SchemaError::DocumentInvalid {
                reason: e.to_string(),
            })?;
        Self::from_document(&document)
    }

    /// Builds the registry from a parsed document.
    pub fn from_document(document: &JsonValue) -> Result<Self, SchemaError> {
        Self::from_definitions(parse_operations(document)?)
    }

    /// Builds the registry from ready-made definitions, rejecting duplicates.
    pub fn from_definitions(mut tools: Vec<ToolDefinition>) -> Result<Self, SchemaError> {
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        let mut index = HashMap::with_capacity(tools.len());
        for (position, tool) in tools.iter().enumerate() {
            if index.insert(tool.name.clone(), position).is_some() {
                return Err(SchemaError::DuplicateOperation {
                    name: tool.name.clone(),
                });
            }
        }
        Ok(Self { tools, index })
    }

    /// All tools, ordered by name.
    #[must_use]
    pub fn tool_schemas(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Looks a tool up by name.
    pub fn resolve(&self, name: &str) -> Result<&ToolDefinition, ToolExecutionError> {
        self.index
            .get(name)
            .map(|position| &self.tools[*position])
            .ok_or_else(|| ToolExecutionError::UnknownTool {
                name: name.to_string(),
            })
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns true when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
