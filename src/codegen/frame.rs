//! Frames and compiled steps
//!
//! A [`Frame`] is one step of generated build logic. It declares which
//! variables it creates and which it uses, writes its source statements and
//! compiles itself into a [`Step`]: a closure reading its inputs from the
//! method's variable slots and writing its output back.

use super::variable::{VarId, VariableTable};
use super::writer::SourceWriter;
use crate::factory::BoxFuture;
use crate::provider::{Object, ServiceType};
use crate::scope::Scope;
use crate::{DiError, Result};
use std::sync::Arc;

pub type SyncOp = Arc<dyn Fn(&Scope, &[Object]) -> Result<Object> + Send + Sync>;
pub type AsyncOp = Arc<dyn Fn(Scope, Vec<Object>) -> BoxFuture<'static, Result<Object>> + Send + Sync>;
pub type EffectOp = Arc<dyn Fn(&Scope, &[Object]) -> Result<()> + Send + Sync>;

/// The executable part of a step.
#[derive(Clone)]
pub enum Op {
    /// Produce a value synchronously
    Sync(SyncOp),
    /// Produce a value by awaiting a future
    Async(AsyncOp),
    /// Act on the inputs without producing a value
    Effect(EffectOp),
}

/// A compiled frame.
#[derive(Clone)]
pub struct Step {
    pub inputs: Vec<VarId>,
    pub output: Option<VarId>,
    pub op: Op,
}

impl Step {
    pub fn sync<F>(inputs: Vec<VarId>, output: VarId, op: F) -> Self
    where
        F: Fn(&Scope, &[Object]) -> Result<Object> + Send + Sync + 'static,
    {
        Self {
            inputs,
            output: Some(output),
            op: Op::Sync(Arc::new(op)),
        }
    }

    pub fn deferred<F>(inputs: Vec<VarId>, output: VarId, op: F) -> Self
    where
        F: Fn(Scope, Vec<Object>) -> BoxFuture<'static, Result<Object>> + Send + Sync + 'static,
    {
        Self {
            inputs,
            output: Some(output),
            op: Op::Async(Arc::new(op)),
        }
    }

    pub fn effect<F>(inputs: Vec<VarId>, op: F) -> Self
    where
        F: Fn(&Scope, &[Object]) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            inputs,
            output: None,
            op: Op::Effect(Arc::new(op)),
        }
    }
}

/// One step of generated build logic.
pub trait Frame: Send + Sync {
    /// Short description used in arrangement errors.
    fn description(&self) -> String;

    /// Variables this frame declares.
    fn creates(&self) -> Vec<VarId> {
        Vec::new()
    }

    /// Variables this frame reads.
    fn uses(&self) -> Vec<VarId> {
        Vec::new()
    }

    /// Bind variables the frame refers to by type rather than by identity.
    /// Runs once per method before arrangement.
    fn find_variables(&mut self, _variables: &VariableTable) -> Result<()> {
        Ok(())
    }

    fn is_async(&self) -> bool {
        false
    }

    /// The variable the enclosing method returns, for frames ending a method.
    fn returns(&self) -> Option<VarId> {
        None
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter);

    /// Compile into a step, `None` for frames without runtime behavior.
    fn compile(&self) -> Result<Option<Step>>;
}

/// Ends a method by returning the latest variable of a type.
pub struct ReturnFrame {
    service_type: ServiceType,
    var: Option<VarId>,
}

impl ReturnFrame {
    pub fn of_type(service_type: ServiceType) -> Self {
        Self {
            service_type,
            var: None,
        }
    }

    pub fn of_var(service_type: ServiceType, var: VarId) -> Self {
        Self {
            service_type,
            var: Some(var),
        }
    }
}

impl Frame for ReturnFrame {
    fn description(&self) -> String {
        format!("return {}", self.service_type)
    }

    fn uses(&self) -> Vec<VarId> {
        self.var.into_iter().collect()
    }

    fn find_variables(&mut self, variables: &VariableTable) -> Result<()> {
        if self.var.is_none() {
            self.var = variables.find_by_type(&self.service_type);
        }
        if self.var.is_none() {
            return Err(DiError::Internal(format!(
                "no variable of type {} to return",
                self.service_type
            )));
        }
        Ok(())
    }

    fn returns(&self) -> Option<VarId> {
        self.var
    }

    fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
        let name = self.var.map(|v| variables.name(v)).unwrap_or("_");
        writer.write(&format!("return Ok({});", name));
    }

    fn compile(&self) -> Result<Option<Step>> {
        Ok(None)
    }
}

// =============================================================================
// Compiled methods
// =============================================================================

/// An arranged, compiled method: steps run in order over a slot per variable.
pub struct CompiledMethod {
    name: String,
    return_type: ServiceType,
    steps: Vec<Step>,
    slots: usize,
    returns: VarId,
    is_async: bool,
}

impl CompiledMethod {
    pub(crate) fn new(
        name: String,
        return_type: ServiceType,
        steps: Vec<Step>,
        slots: usize,
        returns: VarId,
    ) -> Self {
        let is_async = steps.iter().any(|s| matches!(s.op, Op::Async(_)));
        Self {
            name,
            return_type,
            steps,
            slots,
            returns,
            is_async,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    fn inputs(slots: &[Option<Object>], inputs: &[VarId]) -> Result<Vec<Object>> {
        inputs
            .iter()
            .map(|var| {
                slots
                    .get(var.index())
                    .cloned()
                    .flatten()
                    .ok_or_else(|| DiError::Internal(format!("variable {} read before assignment", var.index())))
            })
            .collect()
    }

    fn result(&self, mut slots: Vec<Option<Object>>) -> Result<Object> {
        slots
            .get_mut(self.returns.index())
            .and_then(Option::take)
            .ok_or_else(|| DiError::Internal(format!("method {} produced no value", self.name)))
    }

    /// Run every step synchronously.
    pub fn invoke(&self, scope: &Scope) -> Result<Object> {
        let mut slots: Vec<Option<Object>> = vec![None; self.slots];
        for step in &self.steps {
            let inputs = Self::inputs(&slots, &step.inputs)?;
            match &step.op {
                Op::Sync(op) => {
                    let value = op(scope, &inputs)?;
                    if let Some(output) = step.output {
                        slots[output.index()] = Some(value);
                    }
                }
                Op::Effect(op) => op(scope, &inputs)?,
                Op::Async(_) => {
                    return Err(DiError::AsyncResolutionRequired {
                        service_type: self.return_type.clone(),
                    });
                }
            }
        }
        self.result(slots)
    }

    /// Run every step, awaiting asynchronous ones.
    pub async fn invoke_async(&self, scope: &Scope) -> Result<Object> {
        let mut slots: Vec<Option<Object>> = vec![None; self.slots];
        for step in &self.steps {
            let inputs = Self::inputs(&slots, &step.inputs)?;
            let value = match &step.op {
                Op::Sync(op) => Some(op(scope, &inputs)?),
                Op::Async(op) => Some(op(scope.clone(), inputs).await?),
                Op::Effect(op) => {
                    op(scope, &inputs)?;
                    None
                }
            };
            if let (Some(output), Some(value)) = (step.output, value) {
                slots[output.index()] = Some(value);
            }
        }
        self.result(slots)
    }
}

impl std::fmt::Debug for CompiledMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledMethod")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("is_async", &self.is_async)
            .finish()
    }
}
