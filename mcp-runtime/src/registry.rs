//! Tool, resource, and prompt registries. Entries keep registration order
//! for listing and a name/URI index for O(1) lookup. Registries are built
//! at startup and read-only at serve time, like the router.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use strato_runtime::Context;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate registration: {0}")]
    Duplicate(String),
    #[error("registration key must not be empty")]
    EmptyKey,
}

/// A tool failure as seen by the server's error mapping.
#[derive(Debug, thiserror::Error)]
pub enum ToolFailure {
    #[error("timed out")]
    Timeout,
    #[error("tool handler panicked")]
    Panicked,
    #[error("{0}")]
    Failed(String),
}

/// Buffered tool execution: arguments in, result payload out.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: &Context, args: Value) -> Result<Value, ToolFailure>;
}

/// Channel a streaming tool emits progress values into.
pub type ProgressSink = tokio::sync::mpsc::Sender<Value>;

/// Streaming tool execution: may emit progress before the final result.
#[async_trait]
pub trait StreamingToolHandler: Send + Sync {
    async fn call(
        &self,
        ctx: &Context,
        args: Value,
        progress: ProgressSink,
    ) -> Result<Value, ToolFailure>;
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Returns the contents value for `resources/read`.
    async fn read(&self, ctx: &Context, uri: &str) -> Result<Value, ToolFailure>;
}

#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Returns the prompt-result structure for `prompts/get`.
    async fn get(&self, ctx: &Context, args: Value) -> Result<Value, ToolFailure>;
}

pub struct ToolEntry {
    pub def: ToolDef,
    pub handler: Arc<dyn ToolHandler>,
    /// Used when the client asks for `text/event-stream`; absent means the
    /// buffered handler serves both modes.
    pub streaming: Option<Arc<dyn StreamingToolHandler>>,
}

#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        def: ToolDef,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        self.insert(def, handler, None)
    }

    pub fn register_streaming(
        &mut self,
        def: ToolDef,
        handler: Arc<dyn ToolHandler>,
        streaming: Arc<dyn StreamingToolHandler>,
    ) -> Result<(), RegistryError> {
        self.insert(def, handler, Some(streaming))
    }

    fn insert(
        &mut self,
        def: ToolDef,
        handler: Arc<dyn ToolHandler>,
        streaming: Option<Arc<dyn StreamingToolHandler>>,
    ) -> Result<(), RegistryError> {
        if def.name.is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        if self.index.contains_key(&def.name) {
            return Err(RegistryError::Duplicate(def.name));
        }
        self.index.insert(def.name.clone(), self.entries.len());
        self.entries.push(ToolEntry {
            def,
            handler,
            streaming,
        });
        Ok(())
    }

    /// Definitions in registration order; a fresh copy each call.
    pub fn list(&self) -> Vec<ToolDef> {
        self.entries.iter().map(|entry| entry.def.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.index.get(name).map(|i| &self.entries[*i])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct ResourceEntry {
    pub def: ResourceDef,
    pub handler: Arc<dyn ResourceHandler>,
}

#[derive(Default)]
pub struct ResourceRegistry {
    entries: Vec<ResourceEntry>,
    index: HashMap<String, usize>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        def: ResourceDef,
        handler: Arc<dyn ResourceHandler>,
    ) -> Result<(), RegistryError> {
        if def.uri.is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        if self.index.contains_key(&def.uri) {
            return Err(RegistryError::Duplicate(def.uri));
        }
        self.index.insert(def.uri.clone(), self.entries.len());
        self.entries.push(ResourceEntry { def, handler });
        Ok(())
    }

    pub fn list(&self) -> Vec<ResourceDef> {
        self.entries.iter().map(|entry| entry.def.clone()).collect()
    }

    pub fn get(&self, uri: &str) -> Option<&ResourceEntry> {
        self.index.get(uri).map(|i| &self.entries[*i])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct PromptEntry {
    pub def: PromptDef,
    pub handler: Arc<dyn PromptHandler>,
}

#[derive(Default)]
pub struct PromptRegistry {
    entries: Vec<PromptEntry>,
    index: HashMap<String, usize>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        def: PromptDef,
        handler: Arc<dyn PromptHandler>,
    ) -> Result<(), RegistryError> {
        if def.name.is_empty() {
            return Err(RegistryError::EmptyKey);
        }
        if self.index.contains_key(&def.name) {
            return Err(RegistryError::Duplicate(def.name));
        }
        self.index.insert(def.name.clone(), self.entries.len());
        self.entries.push(PromptEntry { def, handler });
        Ok(())
    }

    pub fn list(&self) -> Vec<PromptDef> {
        self.entries.iter().map(|entry| entry.def.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&PromptEntry> {
        self.index.get(name).map(|i| &self.entries[*i])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything the server dispatches against.
#[derive(Default)]
pub struct Registries {
    pub tools: ToolRegistry,
    pub resources: ResourceRegistry,
    pub prompts: PromptRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }
}
