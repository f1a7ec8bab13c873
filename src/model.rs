//! Read-only query model over a built graph
//!
//! Used by diagnostics: which families exist, which instances they hold and
//! which of them is the default.

use crate::graph::{FamilySource, ServiceFamily, ServiceGraph};
use crate::instance::{Instance, InstanceId};
use crate::provider::{Lifetime, ServiceType};
use std::fmt::Write;
use std::sync::Arc;

/// Summary of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    pub id: InstanceId,
    pub service_type: ServiceType,
    pub implementation_type: ServiceType,
    pub lifetime: Lifetime,
    pub name: Option<String>,
    pub kind: &'static str,
    pub is_default: bool,
}

impl InstanceRef {
    fn new(instance: &Instance, default: Option<&InstanceId>) -> Self {
        Self {
            id: instance.id().clone(),
            service_type: instance.service_type().clone(),
            implementation_type: instance.implementation_type().clone(),
            lifetime: instance.lifetime(),
            name: instance.name().map(str::to_string),
            kind: instance.kind().name(),
            is_default: default == Some(instance.id()),
        }
    }
}

/// Summary of one family.
#[derive(Debug, Clone)]
pub struct FamilyModel {
    pub service_type: ServiceType,
    pub source: FamilySource,
    pub instances: Vec<InstanceRef>,
    pub message: Option<String>,
}

impl FamilyModel {
    fn new(family: &ServiceFamily) -> Self {
        let default = family.default_instance().map(|i| i.id());
        Self {
            service_type: family.service_type().clone(),
            source: family.source(),
            instances: family.instances().iter().map(|i| InstanceRef::new(i, default)).collect(),
            message: family.message().map(str::to_string),
        }
    }

    pub fn default_instance(&self) -> Option<&InstanceRef> {
        self.instances.iter().find(|i| i.is_default)
    }

    pub fn has_implementations(&self) -> bool {
        !self.instances.is_empty()
    }
}

/// Query surface over one graph snapshot.
#[derive(Clone)]
pub struct ContainerModel {
    graph: Arc<ServiceGraph>,
}

impl ContainerModel {
    pub(crate) fn new(graph: Arc<ServiceGraph>) -> Self {
        Self { graph }
    }

    /// The family for `service_type`, synthesizing it when necessary.
    pub fn for_type(&self, service_type: &ServiceType) -> FamilyModel {
        FamilyModel::new(&self.graph.resolve_family(service_type))
    }

    /// Whether `service_type` has an explicit registration.
    pub fn has_registration_for(&self, service_type: &ServiceType) -> bool {
        self.graph.registered_types().contains(service_type)
    }

    /// Explicitly registered service types in registration order.
    pub fn service_types(&self) -> Vec<ServiceType> {
        self.graph.registered_types().to_vec()
    }

    /// Every family built so far, registered families first.
    pub fn families(&self) -> Vec<FamilyModel> {
        self.graph.families().iter().map(|f| FamilyModel::new(f)).collect()
    }

    /// Top-level instances of every registered family.
    pub fn all_instances(&self) -> Vec<InstanceRef> {
        self.families()
            .into_iter()
            .filter(|f| f.source == FamilySource::Registered)
            .flat_map(|f| f.instances)
            .collect()
    }

    /// Text report of every registered family.
    pub fn what_do_i_have(&self) -> String {
        let mut out = String::new();
        let families: Vec<FamilyModel> = self
            .families()
            .into_iter()
            .filter(|f| f.source == FamilySource::Registered)
            .collect();

        let _ = writeln!(out, "{} registered service type(s)", families.len());
        for family in &families {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", family.service_type);
            for instance in &family.instances {
                let marker = if instance.is_default { "*" } else { " " };
                let name = instance
                    .name
                    .as_deref()
                    .map(|n| format!(" '{}'", n))
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "  {} {} {} ({}, {}){}",
                    marker, instance.id, instance.implementation_type, instance.lifetime, instance.kind, name
                );
            }
        }
        out
    }
}

impl std::fmt::Debug for ContainerModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerModel")
            .field("service_types", &self.graph.registered_types().len())
            .finish()
    }
}
