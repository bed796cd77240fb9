//! The middle-end of the compiler: name resolution, type checking, and
//! implicit-conversion insertion.

pub mod check;
pub mod scope;
pub mod types;

pub use check::{check, Diagnostic, DiagnosticKind};
pub use types::{BaseTy, FnTy, Ty, ValueTy};
