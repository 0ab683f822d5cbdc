//! Registry of OT types available to a backend or client session.
//!
//! The registry is constructor-injected wherever types are resolved; there
//! is no process-wide registry. Capabilities are captured once at
//! registration so callers branch on flags instead of probing methods.

use super::{Capabilities, JsonOt, OtType};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// An OT type plus the capabilities it declared when registered.
#[derive(Clone)]
pub struct RegisteredType {
    pub ty: Arc<dyn OtType>,
    pub caps: Capabilities,
}

impl std::fmt::Debug for RegisteredType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredType")
            .field("name", &self.ty.name())
            .field("caps", &self.caps)
            .finish()
    }
}

/// Maps type names to registered OT types.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, RegisteredType>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// A registry with the built-in JSON type.
    pub fn with_defaults() -> Self {
        let ty: Arc<dyn OtType> = Arc::new(JsonOt);
        let caps = ty.capabilities();
        let mut types = HashMap::new();
        types.insert(ty.name().to_string(), RegisteredType { ty, caps });
        Self { types }
    }

    /// Register a type under its own name.
    pub fn register(&mut self, ty: Arc<dyn OtType>) -> Result<()> {
        let name = ty.name().to_string();
        if name.is_empty() {
            return Err(Error::InvalidTypeName);
        }
        if self.types.contains_key(&name) {
            return Err(Error::TypeAlreadyRegistered(name));
        }
        let caps = ty.capabilities();
        self.types.insert(name, RegisteredType { ty, caps });
        Ok(())
    }

    /// Look a type up by name.
    pub fn get(&self, name: &str) -> Result<&RegisteredType> {
        self.types
            .get(name)
            .ok_or_else(|| Error::TypeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::TransformSide;
    use serde_json::Value;

    struct NoopType;

    impl OtType for NoopType {
        fn name(&self) -> &str {
            "noop"
        }

        fn create(&self, data: Value) -> Result<Value> {
            Ok(data)
        }

        fn apply(&self, data: Value, _delta: &Value) -> Result<Value> {
            Ok(data)
        }

        fn transform(&self, delta: &Value, _over: &Value, _side: TransformSide) -> Result<Value> {
            Ok(delta.clone())
        }
    }

    #[test]
    fn defaults_include_json() {
        let registry = TypeRegistry::with_defaults();
        let registered = registry.get("json").unwrap();
        assert_eq!(registered.ty.name(), "json");
        assert!(registered.caps.compose);
        assert!(registered.caps.invert);
    }

    #[test]
    fn unknown_type_errors() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry.get("json").unwrap_err(),
            Error::TypeNotFound("json".into())
        );
    }

    #[test]
    fn duplicate_registration_errors() {
        let mut registry = TypeRegistry::new();
        registry.register(Arc::new(NoopType)).unwrap();
        assert_eq!(
            registry.register(Arc::new(NoopType)).unwrap_err(),
            Error::TypeAlreadyRegistered("noop".into())
        );
    }

    #[test]
    fn capabilities_captured_at_registration() {
        let mut registry = TypeRegistry::new();
        registry.register(Arc::new(NoopType)).unwrap();
        let registered = registry.get("noop").unwrap();
        assert!(!registered.caps.compose);
        assert!(!registered.caps.invert);
        assert!(!registered.caps.normalize);
    }
}
