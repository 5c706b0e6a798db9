//! Tool registry: name to immutable descriptor, fixed at startup.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;

use crate::mcp::context::RequestContext;
use crate::mcp::error::{HandlerError, RegistryError};
use crate::mcp::schema::{ParameterSchema, ParameterSpec, ToolArguments};
use crate::mcp::types::{ReturnType, ToolDefinition, ToolOutput};

/// Declaration of one tool, as written by its implementation
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    pub returns: ReturnType,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            returns: ReturnType::Mapping,
        }
    }

    pub fn param(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn returns(mut self, returns: ReturnType) -> Self {
        self.returns = returns;
        self
    }
}

/// A callable tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn call(
        &self,
        ctx: &RequestContext,
        args: ToolArguments,
    ) -> Result<ToolOutput, HandlerError>;
}

/// Registered tool, immutable after registration
pub struct ToolDescriptor {
    name: String,
    description: String,
    schema: ParameterSchema,
    returns: ReturnType,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &ParameterSchema {
        &self.schema
    }

    pub fn return_type(&self) -> ReturnType {
        self.returns
    }

    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.to_json_schema(),
        }
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("parameters", &self.schema.len())
            .field("returns", &self.returns)
            .finish()
    }
}

/// Main tool registry, in registration order
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Name collisions are a startup error, never an overwrite.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> Result<(), RegistryError> {
        let spec = handler.spec();
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }

        let schema = ParameterSchema::check(&name, spec.parameters)?;
        tracing::debug!("Registered tool {} ({} parameters)", name, schema.len());

        self.tools.insert(
            name.clone(),
            ToolDescriptor {
                name,
                description: spec.description,
                schema,
                returns: spec.returns,
                handler,
            },
        );
        Ok(())
    }

    /// Register every handler, stopping at the first failure
    pub fn register_all<I>(&mut self, handlers: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = Arc<dyn ToolHandler>>,
    {
        handlers
            .into_iter()
            .try_for_each(|handler| self.register(handler))
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get all available tool definitions
    pub fn get_all_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(ToolDescriptor::definition).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl ToolHandler for Named {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new(self.0, "test tool").param(ParameterSpec::string("q").optional())
        }

        async fn call(
            &self,
            _ctx: &RequestContext,
            _args: ToolArguments,
        ) -> Result<ToolOutput, HandlerError> {
            Ok(ToolOutput::data(self.0))
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Named("alpha"))).unwrap();
        let err = registry.register(Arc::new(Named("alpha"))).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTool("alpha".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut registry = ToolRegistry::new();
        assert_eq!(
            registry.register(Arc::new(Named("  "))).unwrap_err(),
            RegistryError::EmptyName
        );
    }

    #[test]
    fn test_definitions_keep_registration_order() {
        let mut registry = ToolRegistry::new();
        registry
            .register_all([
                Arc::new(Named("zeta")) as Arc<dyn ToolHandler>,
                Arc::new(Named("alpha")),
            ])
            .unwrap();
        let names: Vec<_> = registry
            .get_all_tool_definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(registry.get("zeta").unwrap().return_type(), ReturnType::Mapping);
    }
}
