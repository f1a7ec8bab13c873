//! Resolver code generation
//!
//! Build logic is authored as [`Frame`]s collected into
//! [`GeneratedMethod`]s on [`GeneratedType`]s. Arrangement orders frames by
//! the variables they create and use; each type then renders deterministic
//! source text and compiles into closures over a slot per variable.
//!
//! Types are batched in a [`GeneratedAssembly`]. [`GenerationRules`] decide
//! whether types are generated, loaded from a [`PrebuiltAssembly`], or both.

mod assembly;
mod frame;
mod generated_type;
mod method;
mod rules;
mod variable;
mod writer;

pub use assembly::GeneratedAssembly;
pub use frame::{CompiledMethod, Frame, Op, ReturnFrame, Step};
pub use generated_type::{CompiledType, GeneratedType, InjectedField};
pub use method::{ArrangedFrame, GeneratedMethod};
pub use rules::{GenerationRules, PrebuiltAssembly, PrebuiltBuild, TypeLoadMode};
pub use variable::{SCOPE, VarId, VariableTable};
pub use writer::SourceWriter;
