//! Configuration validation
//!
//! Validation compiles a resolver for every registered instance and collects
//! each failure instead of stopping at the first one.

use crate::error::DiError;
use crate::graph::ServiceGraph;
use crate::instance::Instance;
use crate::provider::ServiceType;
use std::fmt;

#[cfg(feature = "logging")]
use tracing::debug;

/// One broken service type and the reason.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigurationProblem {
    pub service_type: ServiceType,
    pub message: String,
}

impl ConfigurationProblem {
    /// The failure to build `instance`, registered under `service_type`.
    pub(crate) fn for_instance(service_type: &ServiceType, instance: &Instance, error: &DiError) -> Self {
        let message = match instance.name() {
            Some(name) => format!("'{}': {}", name, error),
            None => error.to_string(),
        };
        Self {
            service_type: service_type.clone(),
            message,
        }
    }
}

impl fmt::Display for ConfigurationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service_type, self.message)
    }
}

/// Every configuration problem found in one validation pass.
///
/// Problems are sorted and deduplicated, so validating an unchanged
/// configuration twice yields equal reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    problems: Vec<ConfigurationProblem>,
}

impl ValidationReport {
    pub fn new(mut problems: Vec<ConfigurationProblem>) -> Self {
        problems.sort();
        problems.dedup();
        Self { problems }
    }

    pub fn problems(&self) -> &[ConfigurationProblem] {
        &self.problems
    }

    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Messages reported for `service_type`.
    pub fn messages_for(&self, service_type: &ServiceType) -> Vec<&str> {
        self.problems
            .iter()
            .filter(|p| &p.service_type == service_type)
            .map(|p| p.message.as_str())
            .collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.problems.is_empty() {
            return f.write_str("configuration is valid");
        }
        write!(f, "{} configuration problem(s):", self.problems.len())?;
        for problem in &self.problems {
            write!(f, "\n- {}", problem)?;
        }
        Ok(())
    }
}

/// Build every registered instance's resolver and report what fails.
pub(crate) fn validate(graph: &ServiceGraph) -> ValidationReport {
    let mut problems = Vec::new();

    for service_type in graph.registered_types() {
        let family = graph.resolve_family(service_type);
        for instance in family.instances() {
            if let Err(e) = graph.resolver_for(instance) {
                problems.push(ConfigurationProblem::for_instance(service_type, instance, &e));
            }
        }
    }

    let report = ValidationReport::new(problems);

    #[cfg(feature = "logging")]
    debug!(
        target: "lamar",
        problems = report.len(),
        "Validated configuration"
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::GenerationRules;
    use crate::descriptor::{Parameter, TypeDescriptor};
    use crate::registry::ServiceRegistry;

    struct Widget;

    #[test]
    fn test_report_is_sorted_and_deduplicated() {
        let problem = |ty: &str, message: &str| ConfigurationProblem {
            service_type: ty.into(),
            message: message.to_string(),
        };
        let report = ValidationReport::new(vec![problem("B", "broken"), problem("A", "missing"), problem("B", "broken")]);

        assert_eq!(report.len(), 2);
        assert_eq!(report.problems()[0].service_type, ServiceType::from("A"));
        assert_eq!(report.to_string(), "2 configuration problem(s):\n- A: missing\n- B: broken");
    }

    #[test]
    fn test_validate_collects_every_broken_type() {
        let mut registry = ServiceRegistry::new();
        registry.for_type("Ok").use_value(1u8);
        registry.for_type("IWidget").use_type(
            TypeDescriptor::concrete("Widget".into())
                .constructor(vec![Parameter::new("dep", "Missing".into())], |_| Ok(Widget)),
        );
        registry.for_type("IGadget").use_type(
            TypeDescriptor::concrete("Gadget".into())
                .constructor(vec![Parameter::new("dep", "AlsoMissing".into())], |_| Ok(Widget)),
        );
        let graph = ServiceGraph::build(registry, GenerationRules::default());

        let report = validate(&graph);
        assert_eq!(report.len(), 2);
        assert_eq!(report.messages_for(&"IWidget".into()).len(), 1);
        assert!(report.messages_for(&"IGadget".into())[0].contains("AlsoMissing"));
        assert!(report.messages_for(&"Ok".into()).is_empty());

        // Same graph, same report
        assert_eq!(validate(&graph), report);
    }
}
