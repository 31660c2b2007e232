//! Data models for savestate

mod dead_letter;
mod operation;
mod profile;

pub use dead_letter::DeadLetter;
pub use operation::{FieldMap, MergeSemantics, Operation, OperationId, OperationKind};
pub use profile::{MonotonicFields, ProfileSnapshot, ScalarFields, SetFields};
