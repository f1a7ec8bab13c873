//! Code generation configuration

use crate::provider::Object;
use crate::scope::Scope;
use crate::Result;
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How resolver types are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TypeLoadMode {
    /// Always generate and compile
    #[default]
    Dynamic,
    /// Only use prebuilt types; a missing one is an error
    Static,
    /// Use a prebuilt type when present, generate otherwise
    Auto,
}

impl TypeLoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeLoadMode::Dynamic => "dynamic",
            TypeLoadMode::Static => "static",
            TypeLoadMode::Auto => "auto",
        }
    }
}

/// A prebuilt build function, equivalent to a generated `build` method.
pub type PrebuiltBuild = Arc<dyn Fn(&Scope) -> Result<Object> + Send + Sync>;

/// Prebuilt resolver types keyed by their convention name.
///
/// Convention names are the names [`GeneratedType`](super::GeneratedType)s
/// get during generation, e.g. `AWidget_r0`.
#[derive(Clone, Default)]
pub struct PrebuiltAssembly {
    name: String,
    types: HashMap<String, PrebuiltBuild, RandomState>,
}

impl PrebuiltAssembly {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: HashMap::default(),
        }
    }

    /// Add a prebuilt type.
    pub fn with_type<F>(mut self, type_name: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Scope) -> Result<Object> + Send + Sync + 'static,
    {
        self.types.insert(type_name.into(), Arc::new(build));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn find(&self, type_name: &str) -> Option<&PrebuiltBuild> {
        self.types.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Debug for PrebuiltAssembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.types.keys().collect();
        names.sort();
        f.debug_struct("PrebuiltAssembly")
            .field("name", &self.name)
            .field("types", &names)
            .finish()
    }
}

/// Settings for resolver generation.
///
/// # Example
///
/// ```rust
/// use lamar::{GenerationRules, TypeLoadMode};
///
/// let rules = GenerationRules::default()
///     .with_namespace("app_resolvers")
///     .with_type_load_mode(TypeLoadMode::Auto);
/// assert_eq!(rules.generated_namespace(), "app_resolvers");
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GenerationRules {
    generated_namespace: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    application_assembly: Option<Arc<PrebuiltAssembly>>,
    type_load_mode: TypeLoadMode,
    generated_code_output_path: PathBuf,
    source_code_writing_enabled: bool,
}

impl Default for GenerationRules {
    fn default() -> Self {
        Self {
            generated_namespace: "lamar_generated".to_string(),
            application_assembly: None,
            type_load_mode: TypeLoadMode::Dynamic,
            generated_code_output_path: PathBuf::from("internal/generated"),
            source_code_writing_enabled: false,
        }
    }
}

impl GenerationRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.generated_namespace = namespace.into();
        self
    }

    /// Where prebuilt types are looked up under `Static` and `Auto`.
    pub fn with_application_assembly(mut self, assembly: PrebuiltAssembly) -> Self {
        self.application_assembly = Some(Arc::new(assembly));
        self
    }

    pub fn with_type_load_mode(mut self, mode: TypeLoadMode) -> Self {
        self.type_load_mode = mode;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.generated_code_output_path = path.into();
        self
    }

    /// Persist generated source under the output path.
    pub fn write_source_code(mut self, enabled: bool) -> Self {
        self.source_code_writing_enabled = enabled;
        self
    }

    #[inline]
    pub fn generated_namespace(&self) -> &str {
        &self.generated_namespace
    }

    #[inline]
    pub fn application_assembly(&self) -> Option<&PrebuiltAssembly> {
        self.application_assembly.as_deref()
    }

    #[inline]
    pub fn type_load_mode(&self) -> TypeLoadMode {
        self.type_load_mode
    }

    #[inline]
    pub fn generated_code_output_path(&self) -> &PathBuf {
        &self.generated_code_output_path
    }

    #[inline]
    pub fn source_code_writing_enabled(&self) -> bool {
        self.source_code_writing_enabled
    }

    /// The prebuilt build function for `type_name`, if the application
    /// assembly has one.
    pub(crate) fn prebuilt(&self, type_name: &str) -> Option<PrebuiltBuild> {
        self.application_assembly
            .as_ref()
            .and_then(|assembly| assembly.find(type_name))
            .cloned()
    }
}
