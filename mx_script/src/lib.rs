//! Script layer of the micromagnetic runtime: typed values, field
//! configurations, the case-insensitive identifier registry and the
//! whole-script compiler.

pub mod compiler;
pub mod config;
pub mod registry;
pub mod value;

pub use compiler::{
    compile, Action, CompileError, CompileErrorKind, Expr, Location, Statement, StatementSequence,
};
pub use config::{Config, FieldConfig};
pub use registry::{
    Binding, EntryKind, EntrySummary, Registry, RegistryEntry, RegistryError, Signature,
};
pub use value::{EvalError, Type, Value};

// Re-exported so embedders build vectors with the same glam version.
pub use glam::DVec3;
