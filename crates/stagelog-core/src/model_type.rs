// ABOUTME: Registry of entity types that journal stages can reference by small integer id.
// ABOUTME: Built once at startup and injected wherever type names need to be rendered.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// Reserved id for stages that reference nothing.
pub const UNKNOWN: i32 = 0;

/// Reserved id for stages that reference a crash report.
pub const CRASH: i32 = 1;

/// A referencable entity type: a stable numeric id plus a display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelType {
    id: i32,
    name: Cow<'static, str>,
}

impl ModelType {
    pub const UNKNOWN: ModelType = ModelType::new(UNKNOWN, "unknown");
    pub const CRASH: ModelType = ModelType::new(CRASH, "crash");

    pub const fn new(id: i32, name: &'static str) -> Self {
        Self {
            id,
            name: Cow::Borrowed(name),
        }
    }

    /// Build a type whose name is only known at runtime (e.g. loaded from config).
    pub fn named(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: Cow::Owned(name.into()),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Lookup table from type id to descriptor. Unregistered ids resolve to a
/// descriptor whose name is the id itself, so rendering never fails.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: HashMap<i32, ModelType>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        let mut registry = Self {
            types: HashMap::with_capacity(64),
        };
        registry.register([ModelType::UNKNOWN, ModelType::CRASH]);
        registry
    }
}

impl TypeRegistry {
    /// Create a registry holding only the reserved `unknown` and `crash` types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) type descriptors. Intended for startup, before the
    /// registry is shared.
    pub fn register(&mut self, types: impl IntoIterator<Item = ModelType>) {
        for model_type in types {
            self.types.insert(model_type.id(), model_type);
        }
    }

    /// Builder-style variant of [`TypeRegistry::register`].
    pub fn with(mut self, types: impl IntoIterator<Item = ModelType>) -> Self {
        self.register(types);
        self
    }

    pub fn get(&self, id: i32) -> ModelType {
        match self.types.get(&id) {
            Some(model_type) => model_type.clone(),
            None => ModelType::named(id, id.to_string()),
        }
    }

    pub fn name(&self, id: i32) -> Cow<'_, str> {
        match self.types.get(&id) {
            Some(model_type) => Cow::Borrowed(model_type.name()),
            None => Cow::Owned(id.to_string()),
        }
    }

    pub fn contains(&self, id: i32) -> bool {
        self.types.contains_key(&id)
    }
}
