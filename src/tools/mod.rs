//! Tool descriptors and the startup-built dispatch table.
//!
//! Tools are registered once, before the gateway starts serving. Dispatch is
//! a name lookup; argument validation happens here so handlers only ever see
//! arguments that satisfy their schema.

mod schema;

use std::{collections::BTreeMap, fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use serde_json::{Map, Value};

pub use rmcp::model::{CallToolResult, Content, Tool as ToolDefinition};
pub use schema::validate_arguments;

type ToolHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<CallToolResult, String>> + Send + Sync>;

/// Errors raised before a tool handler runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {0} not found")]
    NotFound(String),

    #[error("Invalid arguments for tool {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool {0} is already registered")]
    Duplicate(String),
}

/// A named tool: description, argument schema and async handler.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Arc<Map<String, Value>>,
    handler: ToolHandler,
}

impl Tool {
    /// Create a tool from an async handler.
    ///
    /// `input_schema` should be an object schema; anything else is treated
    /// as an empty one. The handler receives the validated argument object.
    /// Returning `Err` produces an `isError` result carrying the message.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult, String>> + Send + 'static,
    {
        let input_schema = match input_schema {
            Value::Object(schema) => schema,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: Arc::new(input_schema),
            handler: Arc::new(move |args: Map<String, Value>| handler(args).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire form for `tools/list`.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        )
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Lookup table of registered tools, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; names must be unique.
    pub fn register(&mut self, tool: Tool) -> Result<(), ToolError> {
        if self.tools.contains_key(tool.name()) {
            return Err(ToolError::Duplicate(tool.name().to_string()));
        }
        tracing::info!(tool = tool.name(), "registering tool");
        self.tools.insert(tool.name().to_string(), tool);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_tool(mut self, tool: Tool) -> Result<Self, ToolError> {
        self.register(tool)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(Tool::definition).collect()
    }

    /// Validate arguments and run the named tool.
    ///
    /// Handler failures, including panics, come back as an `isError` result;
    /// only lookup and validation failures are returned as [`ToolError`].
    pub async fn call(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let arguments = arguments.unwrap_or_default();
        validate_arguments(&tool.input_schema, &arguments).map_err(|reason| {
            ToolError::InvalidArguments {
                tool: name.to_string(),
                reason,
            }
        })?;

        let outcome = AssertUnwindSafe((tool.handler)(arguments))
            .catch_unwind()
            .await;

        Ok(match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(message)) => {
                tracing::warn!(tool = name, %message, "tool returned an error");
                CallToolResult::error(vec![Content::text(message)])
            }
            Err(_) => {
                tracing::error!(tool = name, "tool handler panicked");
                CallToolResult::error(vec![Content::text(format!(
                    "Tool {name} failed unexpectedly"
                ))])
            }
        })
    }
}
