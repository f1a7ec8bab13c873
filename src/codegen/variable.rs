//! Variables of a generated method

use crate::provider::ServiceType;
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;

/// Index of a variable within one generated method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

/// The scope argument every generated method receives.
pub const SCOPE: VarId = VarId(0);

/// Names every variable of a method.
///
/// Colliding names get a numeric suffix in first-seen order (`widget`,
/// `widget2`, `widget3`), so generating the same method twice yields the
/// same names.
#[derive(Clone)]
pub struct VariableTable {
    names: Vec<String>,
    types: Vec<Option<ServiceType>>,
    used: HashMap<String, usize, RandomState>,
}

impl VariableTable {
    pub fn new() -> Self {
        let mut table = Self {
            names: Vec::new(),
            types: Vec::new(),
            used: HashMap::default(),
        };
        table.declare("scope");
        table
    }

    /// Declare a new variable based on `base`.
    pub fn declare(&mut self, base: &str) -> VarId {
        let base = if base.is_empty() { "value" } else { base };
        let mut count = self.used.get(base).copied().unwrap_or(0);
        let name = loop {
            count += 1;
            let candidate = if count == 1 {
                base.to_string()
            } else {
                format!("{}{}", base, count)
            };
            if !self.names.contains(&candidate) {
                break candidate;
            }
        };
        self.used.insert(base.to_string(), count);
        self.names.push(name);
        self.types.push(None);
        VarId(self.names.len() - 1)
    }

    /// Declare a variable holding a value of `ty`, named after the type.
    pub fn declare_typed(&mut self, ty: &ServiceType) -> VarId {
        let var = self.declare(&ty.variable_name());
        self.types[var.0] = Some(ty.clone());
        var
    }

    /// The most recently declared variable of `ty`.
    pub fn find_by_type(&self, ty: &ServiceType) -> Option<VarId> {
        self.types
            .iter()
            .rposition(|t| t.as_ref() == Some(ty))
            .map(VarId)
    }

    pub fn type_of(&self, var: VarId) -> Option<&ServiceType> {
        self.types.get(var.0).and_then(Option::as_ref)
    }

    pub fn name(&self, var: VarId) -> &str {
        self.names.get(var.0).map(String::as_str).unwrap_or("_")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for VariableTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for VariableTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collisions_get_suffixes_in_order() {
        let mut vars = VariableTable::new();
        let a = vars.declare("widget");
        let b = vars.declare("widget");
        let c = vars.declare("widget");

        assert_eq!(vars.name(SCOPE), "scope");
        assert_eq!(vars.name(a), "widget");
        assert_eq!(vars.name(b), "widget2");
        assert_eq!(vars.name(c), "widget3");
    }

    #[test]
    fn test_suffix_does_not_shadow_existing_name() {
        let mut vars = VariableTable::new();
        vars.declare("widget2");
        vars.declare("widget");
        let second = vars.declare("widget");

        assert_ne!(vars.name(second), "widget2");
    }

    #[test]
    fn test_find_by_type_returns_latest() {
        let mut vars = VariableTable::new();
        let ty = ServiceType::named("ConsoleLogger");
        let first = vars.declare_typed(&ty);
        let second = vars.declare_typed(&ty);

        assert_eq!(vars.name(first), "console_logger");
        assert_eq!(vars.find_by_type(&ty), Some(second));
        assert_eq!(vars.find_by_type(&ServiceType::named("Other")), None);
    }

    #[test]
    fn test_scope_name_is_reserved() {
        let mut vars = VariableTable::new();
        let shadow = vars.declare("scope");
        assert_eq!(vars.name(shadow), "scope2");
    }
}
