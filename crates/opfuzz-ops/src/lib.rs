//! Operator kinds, validity predicates and constraint solving.
//!
//! The [`OperatorSpecRegistry`] maps operator names to a signature template
//! and a [`ValidityPredicate`]. Predicates are organised per case (input
//! ranks plus structural attribute values) and hold a dtype table, a CNF
//! constraint over dimensions and numeric attributes, and one expression per
//! output dimension. Graph construction turns a predicate into a
//! [`Problem`] and asks a [`Solver`] for a satisfying assignment.

pub mod catalog;
pub mod expr;
pub mod formula;
pub mod predicate;
pub mod registry;
pub mod signature;
pub mod solver;
pub mod template;

pub use expr::{Assignment, BinOp, Expr, Var};
pub use formula::{Atom, Clause, Cmp, Formula};
pub use predicate::{CaseRule, DtypeRule, ValidityPredicate};
pub use registry::{OpEntry, OperatorKind, OperatorSpecRegistry, RegistryError};
pub use signature::{AttrDomain, AttrSlot, CaseKey, InputSlot, OpInstance, Signature};
pub use solver::{Domain, FiniteDomainSolver, Problem, SolveOutcome, Solver, SolverError};
pub use template::{RuleTemplate, ShapeRule};
