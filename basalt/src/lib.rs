//! ## Background
//!
//! A query optimizer accepts a statement and outputs a physical plan ready to be executed.
//! This crate follows the classic two phase design of rule based rewriting followed by a
//! cost based choice of physical operators.
//!
//! Rule based rewriting applies a fixed list of substitution rules to the logical plan, each
//! of them at most once and in a fixed order: decorrelation of sub-queries, predicate push
//! down, column pruning, unique key derivation, aggregation elimination and aggregation push
//! down. Which rules run is selected by a bitmask, the caller's flags intersected with the
//! rules the plan builder found useful for the statement.
//!
//! Cost based conversion walks the rewritten plan top down with a required physical
//! property (an ordering and a row limit hint), and memoizes the cheapest physical plan of
//! every `(node, property)` pair, in the spirit of the System R style dynamic programming
//! described in [1].
//!
//! ## Design
//!
//! * [`planner`] Builds logical plans from statements.
//! * [`rules`] Logical rewrite rules.
//! * [`physical`] Physical conversion and the passes cleaning up its result.
//! * [`optimizer`] Entry point, [`optimizer::optimize`].
//! * [`operator`] Relational operators.
//! * [`properties`] Physical properties.
//!
//! ## Reference
//!
//! 1. Selinger, P. Griffiths, et al. "Access path selection in a relational database management
//! system." Readings in Artificial Intelligence and Databases. Morgan Kaufmann, 1989. 511-522.
//! 2. Neumann, T. and Kemper, A., 2015. Unnesting arbitrary queries. BTW 2015.

#[macro_use]
extern crate lazy_static;

pub mod ast;
pub mod catalog;
pub mod config;
pub mod cost;
pub mod error;
pub mod expr;
pub mod operator;
pub mod optimizer;
pub mod physical;
pub mod plan;
pub mod planner;
pub mod properties;
pub mod resolve;
pub mod rules;
pub mod stat;

#[cfg(test)]
mod test_utils;
