//! Generated types
//!
//! A [`GeneratedType`] is a named struct with injected fields and one or more
//! [`GeneratedMethod`]s. Fields hold singletons: each is resolved from the
//! root scope once and shared by every method of the type.

use super::frame::CompiledMethod;
use super::method::GeneratedMethod;
use super::writer::SourceWriter;
use crate::instance::InstanceId;
use crate::provider::{Object, ServiceType};
use crate::scope::Scope;
use crate::{DiError, Result};
use once_cell::sync::OnceCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A singleton hoisted into a field of a generated type.
pub struct InjectedField {
    name: String,
    service_type: ServiceType,
    instance: InstanceId,
    value: OnceCell<Object>,
}

impl InjectedField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// The field's value, resolved through the root of `scope` on first use.
    pub fn get_or_resolve(&self, scope: &Scope) -> Result<Object> {
        self.value
            .get_or_try_init(|| scope.root().resolve_instance(&self.instance))
            .cloned()
    }

    pub fn is_resolved(&self) -> bool {
        self.value.get().is_some()
    }
}

impl fmt::Debug for InjectedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectedField")
            .field("name", &self.name)
            .field("service_type", &self.service_type)
            .field("instance", &self.instance)
            .finish()
    }
}

/// A type declared for generation.
pub struct GeneratedType {
    name: String,
    base: String,
    fields: Vec<Arc<InjectedField>>,
    methods: Vec<GeneratedMethod>,
}

impl GeneratedType {
    pub fn new(name: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: base.into(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The trait the type implements.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The method called `name`, declared on first request.
    pub fn method_for(&mut self, name: &str, return_type: &ServiceType) -> &mut GeneratedMethod {
        let index = match self.methods.iter().position(|m| m.name() == name) {
            Some(index) => index,
            None => {
                self.methods.push(GeneratedMethod::new(name, return_type.clone()));
                self.methods.len() - 1
            }
        };
        &mut self.methods[index]
    }

    pub fn method(&self, name: &str) -> Option<&GeneratedMethod> {
        self.methods.iter().find(|m| m.name() == name)
    }

    pub fn methods(&self) -> &[GeneratedMethod] {
        &self.methods
    }

    pub fn fields(&self) -> &[Arc<InjectedField>] {
        &self.fields
    }

    /// The field holding `instance`, added on first request.
    pub fn field_for(&mut self, service_type: &ServiceType, instance: &InstanceId) -> Arc<InjectedField> {
        if let Some(field) = self.fields.iter().find(|f| &f.instance == instance) {
            return Arc::clone(field);
        }

        let used: HashSet<&str> = self.fields.iter().map(|f| f.name.as_str()).collect();
        let base = format!("field_{}", service_type.variable_name());
        let mut name = base.clone();
        let mut suffix = 1;
        while used.contains(name.as_str()) {
            suffix += 1;
            name = format!("{}{}", base, suffix);
        }

        let field = Arc::new(InjectedField {
            name,
            service_type: service_type.clone(),
            instance: instance.clone(),
            value: OnceCell::new(),
        });
        self.fields.push(Arc::clone(&field));
        field
    }

    pub fn is_async(&self) -> bool {
        self.methods.iter().any(GeneratedMethod::is_async)
    }

    /// Write the struct and its impl block.
    pub fn write(&self, writer: &mut SourceWriter) {
        writer.write(&format!("BLOCK:pub struct {}", self.name));
        for field in &self.fields {
            writer.write(&format!(
                "{}: Arc<{}>, // {}",
                field.name,
                field.service_type.short_name(),
                field.instance
            ));
        }
        writer.write("END");
        writer.blank_line();

        writer.write(&format!("BLOCK:impl {} for {}", self.base, self.name));
        for (index, method) in self.methods.iter().enumerate() {
            if index > 0 {
                writer.blank_line();
            }
            method.write(writer);
        }
        writer.write("END");
    }

    /// Standalone source for this type inside `namespace`.
    pub fn source_code(&self, namespace: &str) -> String {
        let mut writer = SourceWriter::new();
        writer.write("// <auto-generated/>");
        writer.write(&format!("BLOCK:pub mod {}", namespace));
        writer.write("use lamar::{Object, Resolver, Result, Scope};");
        writer.write("use std::sync::Arc;");
        writer.blank_line();
        self.write(&mut writer);
        writer.write("END");
        writer.into_code()
    }

    /// Arrange and compile every method.
    ///
    /// Failures carry the type's source.
    pub fn compile(&mut self, namespace: &str) -> Result<CompiledType> {
        let mut methods = Vec::with_capacity(self.methods.len());
        let mut failure = None;
        for method in &mut self.methods {
            match method.compile() {
                Ok(compiled) => methods.push(Arc::new(compiled)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let source_code = self.source_code(namespace);
        if let Some(e) = failure {
            return Err(DiError::CodeGeneration {
                type_name: self.name.clone(),
                message: e.to_string(),
                source_code,
            });
        }

        Ok(CompiledType {
            name: self.name.clone(),
            source_code,
            methods,
            fields: self.fields.clone(),
        })
    }
}

impl fmt::Debug for GeneratedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedType")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("fields", &self.fields)
            .field("methods", &self.methods)
            .finish()
    }
}

/// The executable form of a [`GeneratedType`].
#[derive(Clone)]
pub struct CompiledType {
    name: String,
    source_code: String,
    methods: Vec<Arc<CompiledMethod>>,
    fields: Vec<Arc<InjectedField>>,
}

impl CompiledType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    pub fn method(&self, name: &str) -> Option<&Arc<CompiledMethod>> {
        self.methods.iter().find(|m| m.name() == name)
    }

    pub fn fields(&self) -> &[Arc<InjectedField>] {
        &self.fields
    }
}

impl fmt::Debug for CompiledType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledType")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .finish()
    }
}
