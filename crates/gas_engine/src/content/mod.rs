//! XML content defs: discovery of base and mod sources, compilation into a
//! [`DefDatabase`] of effect, ability and character defs.

mod compiler;
mod database;
mod discovery;
mod types;

pub use compiler::{compile_def_database, ContentCompileError, ContentErrorCode, SourceLocation};
pub use database::{
    AttributeModifier, CharacterDef, DefDatabase, DurationPolicy, EffectDef, ModifierOp,
};
pub use types::{ContentPlanError, ContentPlanRequest};
