//! Batches of generated types

use super::generated_type::{CompiledType, GeneratedType};
use super::rules::GenerationRules;
use super::writer::SourceWriter;
use crate::provider::sanitize_identifier;
use crate::{DiError, Result};
use std::path::Path;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Types pending generation, compiled together.
#[derive(Debug)]
pub struct GeneratedAssembly {
    namespace: String,
    types: Vec<GeneratedType>,
}

impl GeneratedAssembly {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            types: Vec::new(),
        }
    }

    pub fn for_rules(rules: &GenerationRules) -> Self {
        Self::new(rules.generated_namespace())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Declare a type implementing `base`.
    pub fn add_type(&mut self, name: impl Into<String>, base: impl Into<String>) -> &mut GeneratedType {
        self.types.push(GeneratedType::new(name, base));
        let last = self.types.len() - 1;
        &mut self.types[last]
    }

    pub fn types(&self) -> &[GeneratedType] {
        &self.types
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Source for every type as one module.
    pub fn generate_source(&self) -> String {
        let mut writer = SourceWriter::new();
        writer.write("// <auto-generated/>");
        writer.write(&format!("BLOCK:pub mod {}", self.namespace));
        writer.write("use lamar::{Object, Resolver, Result, Scope};");
        writer.write("use std::sync::Arc;");
        for ty in &self.types {
            writer.blank_line();
            ty.write(&mut writer);
        }
        writer.write("END");
        writer.into_code()
    }

    /// Compile every pending type in one pass.
    ///
    /// The first failure aborts the batch and carries that type's source.
    /// When source writing is enabled each compiled type is persisted to
    /// `{output path}/{type name}.rs`, overwriting earlier output.
    pub fn compile(self, rules: &GenerationRules) -> Result<Vec<CompiledType>> {
        let Self { namespace, types } = self;

        #[cfg(feature = "logging")]
        debug!(
            target: "lamar",
            namespace = %namespace,
            types = types.len(),
            "Compiling generated types"
        );

        let mut compiled = Vec::with_capacity(types.len());
        for mut ty in types {
            compiled.push(ty.compile(&namespace)?);
        }

        if rules.source_code_writing_enabled() {
            for ty in &compiled {
                write_source(rules.generated_code_output_path(), ty)?;
            }
        }

        Ok(compiled)
    }
}

fn write_source(directory: &Path, ty: &CompiledType) -> Result<()> {
    let path = directory.join(format!("{}.rs", sanitize_identifier(ty.name())));
    let failed = |e: std::io::Error| DiError::SourceWrite {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    std::fs::create_dir_all(directory).map_err(&failed)?;
    std::fs::write(&path, ty.source_code()).map_err(&failed)?;

    #[cfg(feature = "logging")]
    trace!(target: "lamar", path = %path.display(), "Wrote generated source");

    Ok(())
}
