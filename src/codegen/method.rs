//! Generated methods and frame arrangement

use super::frame::{CompiledMethod, Frame};
use super::variable::{SCOPE, VarId, VariableTable};
use super::writer::SourceWriter;
use crate::provider::ServiceType;
use crate::{DiError, Result};
use std::collections::HashMap;

/// A frame's position in the arranged chain with the index of its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrangedFrame {
    pub frame: usize,
    pub next: Option<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Placed,
}

/// One method of a generated type: a frame list plus its variables.
pub struct GeneratedMethod {
    name: String,
    return_type: ServiceType,
    frames: Vec<Box<dyn Frame>>,
    variables: VariableTable,
    arranged: Option<Vec<ArrangedFrame>>,
}

impl GeneratedMethod {
    pub fn new(name: impl Into<String>, return_type: ServiceType) -> Self {
        Self {
            name: name.into(),
            return_type,
            frames: Vec::new(),
            variables: VariableTable::new(),
            arranged: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> &ServiceType {
        &self.return_type
    }

    pub fn add_frame(&mut self, frame: impl Frame + 'static) {
        self.frames.push(Box::new(frame));
        self.arranged = None;
    }

    pub fn frames(&self) -> &[Box<dyn Frame>] {
        &self.frames
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut VariableTable {
        &mut self.variables
    }

    /// Whether any frame awaits; the signature and callers follow this flag.
    pub fn is_async(&self) -> bool {
        self.frames.iter().any(|f| f.is_async())
    }

    /// Order frames so every variable is created before it is used.
    ///
    /// Frames are visited in insertion order; a frame pulls the creators of
    /// the variables it uses in front of itself. A variable nobody creates,
    /// or creators that depend on each other, fail the arrangement.
    pub fn arrange(&mut self) -> Result<&[ArrangedFrame]> {
        if self.arranged.is_none() {
            let variables = &self.variables;
            for frame in &mut self.frames {
                if let Err(e) = frame.find_variables(variables) {
                    return Err(DiError::Internal(format!("method '{}': {}", self.name, e)));
                }
            }
            let order = self.arrange_frames()?;
            self.arranged = Some(order);
        }
        Ok(self.arranged.as_deref().unwrap_or_default())
    }

    fn arrangement_error(&self, message: String) -> DiError {
        DiError::Internal(format!("method '{}': {}", self.name, message))
    }

    fn arrange_frames(&self) -> Result<Vec<ArrangedFrame>> {
        let mut creators: HashMap<VarId, usize> = HashMap::new();
        for (index, frame) in self.frames.iter().enumerate() {
            for var in frame.creates() {
                if let Some(previous) = creators.insert(var, index) {
                    return Err(self.arrangement_error(format!(
                        "variable '{}' is created by both '{}' and '{}'",
                        self.variables.name(var),
                        self.frames[previous].description(),
                        frame.description()
                    )));
                }
            }
        }

        let mut marks: Vec<Option<Mark>> = vec![None; self.frames.len()];
        let mut order: Vec<usize> = Vec::with_capacity(self.frames.len());
        for index in 0..self.frames.len() {
            self.place(index, &creators, &mut marks, &mut order)?;
        }

        Ok(order
            .iter()
            .enumerate()
            .map(|(position, &frame)| ArrangedFrame {
                frame,
                next: order.get(position + 1).copied(),
            })
            .collect())
    }

    fn place(
        &self,
        index: usize,
        creators: &HashMap<VarId, usize>,
        marks: &mut [Option<Mark>],
        order: &mut Vec<usize>,
    ) -> Result<()> {
        match marks[index] {
            Some(Mark::Placed) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(self.arrangement_error(format!(
                    "frame '{}' depends on its own output",
                    self.frames[index].description()
                )));
            }
            None => {}
        }

        marks[index] = Some(Mark::Visiting);
        for var in self.frames[index].uses() {
            if var == SCOPE {
                continue;
            }
            let creator = creators.get(&var).copied().ok_or_else(|| {
                self.arrangement_error(format!(
                    "no frame creates variable '{}' used by '{}'",
                    self.variables.name(var),
                    self.frames[index].description()
                ))
            })?;
            self.place(creator, creators, marks, order)?;
        }
        marks[index] = Some(Mark::Placed);
        order.push(index);
        Ok(())
    }

    /// Arranged frame indices, following successor links from the head.
    fn chain(&self) -> Vec<usize> {
        let Some(arranged) = &self.arranged else {
            return (0..self.frames.len()).collect();
        };
        let mut successors = vec![None; self.frames.len()];
        for link in arranged {
            if let Some(slot) = successors.get_mut(link.frame) {
                *slot = link.next;
            }
        }

        let mut chain = Vec::with_capacity(arranged.len());
        let mut current = arranged.first().map(|a| a.frame);
        while let Some(frame) = current {
            if chain.len() == arranged.len() {
                break;
            }
            chain.push(frame);
            current = successors.get(frame).copied().flatten();
        }
        chain
    }

    /// Write the method; frames in arranged order when arranged, insertion
    /// order otherwise.
    pub fn write(&self, writer: &mut SourceWriter) {
        let asyncness = if self.is_async() { "async " } else { "" };
        writer.write(&format!(
            "BLOCK:{}fn {}(&self, scope: &Scope) -> Result<Object>",
            asyncness, self.name
        ));
        for index in self.chain() {
            self.frames[index].generate_code(&self.variables, writer);
        }
        writer.write("END");
    }

    /// Compile the arranged frames.
    pub fn compile(&mut self) -> Result<CompiledMethod> {
        self.arrange()?;
        let mut steps = Vec::with_capacity(self.frames.len());
        let mut returns = None;
        for index in self.chain() {
            let frame = &self.frames[index];
            if let Some(var) = frame.returns() {
                returns = Some(var);
            }
            if let Some(step) = frame.compile()? {
                steps.push(step);
            }
        }

        let returns = returns.ok_or_else(|| self.arrangement_error("no frame returns a value".into()))?;
        Ok(CompiledMethod::new(
            self.name.clone(),
            self.return_type.clone(),
            steps,
            self.variables.len(),
            returns,
        ))
    }
}

impl std::fmt::Debug for GeneratedMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedMethod")
            .field("name", &self.name)
            .field("frames", &self.frames.len())
            .field("variables", &self.variables)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::frame::{ReturnFrame, Step};
    use crate::provider::{Object, object};
    use crate::scope::Scope;

    /// Creates `output` from `inputs` by summing `u32` values.
    struct SumFrame {
        inputs: Vec<VarId>,
        output: VarId,
        constant: u32,
    }

    impl Frame for SumFrame {
        fn description(&self) -> String {
            format!("sum into {}", self.output.index())
        }

        fn creates(&self) -> Vec<VarId> {
            vec![self.output]
        }

        fn uses(&self) -> Vec<VarId> {
            self.inputs.clone()
        }

        fn generate_code(&self, variables: &VariableTable, writer: &mut SourceWriter) {
            let mut terms = vec![self.constant.to_string()];
            terms.extend(self.inputs.iter().map(|v| variables.name(*v).to_string()));
            writer.write(&format!("let {} = {};", variables.name(self.output), terms.join(" + ")));
        }

        fn compile(&self) -> Result<Option<Step>> {
            let constant = self.constant;
            Ok(Some(Step::sync(self.inputs.clone(), self.output, move |_, args: &[Object]| {
                let mut total = constant;
                for arg in args {
                    total += *arg.downcast_ref::<u32>().ok_or_else(DiError::type_mismatch::<u32>)?;
                }
                Ok(object(total))
            })))
        }
    }

    fn method_with_out_of_order_frames() -> GeneratedMethod {
        let ty = ServiceType::named("Total");
        let mut method = GeneratedMethod::new("build", ty.clone());
        let a = method.variables_mut().declare("a");
        let total = method.variables_mut().declare_typed(&ty);

        // Consumer first, creator second
        method.add_frame(SumFrame {
            inputs: vec![a],
            output: total,
            constant: 1,
        });
        method.add_frame(SumFrame {
            inputs: vec![],
            output: a,
            constant: 41,
        });
        method.add_frame(ReturnFrame::of_type(ty));
        method
    }

    #[test]
    fn test_creators_are_placed_before_users() {
        let mut method = method_with_out_of_order_frames();
        let arranged = method.arrange().unwrap().to_vec();

        let order: Vec<usize> = arranged.iter().map(|a| a.frame).collect();
        assert_eq!(order, vec![1, 0, 2]);
        assert_eq!(arranged[0].next, Some(0));
        assert_eq!(arranged[2].next, None);
    }

    #[test]
    fn test_arranged_source_and_execution() {
        let mut method = method_with_out_of_order_frames();
        method.arrange().unwrap();

        let mut writer = SourceWriter::new();
        method.write(&mut writer);
        assert_eq!(
            writer.code(),
            "fn build(&self, scope: &Scope) -> Result<Object> {\n    let a = 41;\n    let total = 1 + a;\n    return Ok(total);\n}\n"
        );

        let compiled = method.compile().unwrap();
        let value = compiled.invoke(&Scope::detached()).unwrap();
        assert_eq!(*value.downcast_ref::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_long_chain_runs_in_arranged_order() {
        let ty = ServiceType::named("Total");
        let mut method = GeneratedMethod::new("build", ty.clone());
        let count = 300;
        let vars: Vec<VarId> = (0..count)
            .map(|i| {
                if i + 1 == count {
                    method.variables_mut().declare_typed(&ty)
                } else {
                    method.variables_mut().declare(&format!("v{}", i))
                }
            })
            .collect();

        // Every frame is added before the frame creating its input
        for i in (0..count).rev() {
            method.add_frame(SumFrame {
                inputs: if i == 0 { vec![] } else { vec![vars[i - 1]] },
                output: vars[i],
                constant: 1,
            });
        }
        method.add_frame(ReturnFrame::of_type(ty));

        let arranged: Vec<usize> = method.arrange().unwrap().iter().map(|a| a.frame).collect();
        assert_eq!(method.chain(), arranged);
        assert_eq!(arranged.first(), Some(&(count - 1)));

        let compiled = method.compile().unwrap();
        let value = compiled.invoke(&Scope::detached()).unwrap();
        assert_eq!(*value.downcast_ref::<u32>().unwrap(), count as u32);
    }

    #[test]
    fn test_missing_creator_is_an_error() {
        let ty = ServiceType::named("Total");
        let mut method = GeneratedMethod::new("build", ty.clone());
        let orphan = method.variables_mut().declare("orphan");
        let total = method.variables_mut().declare_typed(&ty);
        method.add_frame(SumFrame {
            inputs: vec![orphan],
            output: total,
            constant: 0,
        });

        let err = method.arrange().unwrap_err();
        assert!(err.to_string().contains("no frame creates variable 'orphan'"));
    }

    #[test]
    fn test_cyclic_variables_are_an_error() {
        let ty = ServiceType::named("Total");
        let mut method = GeneratedMethod::new("build", ty);
        let a = method.variables_mut().declare("a");
        let b = method.variables_mut().declare("b");
        method.add_frame(SumFrame {
            inputs: vec![b],
            output: a,
            constant: 0,
        });
        method.add_frame(SumFrame {
            inputs: vec![a],
            output: b,
            constant: 0,
        });

        assert!(method.arrange().unwrap_err().to_string().contains("depends on its own output"));
    }
}
