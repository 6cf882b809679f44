//! # SQL Lineage Analyzer Library
//!
//! View dependency and column lineage analysis for SQL schemas.
//!
//! A [`schema::Schema`] (loaded from DDL or a catalog file) is analyzed in
//! three stages:
//!
//! 1. [`query`] parses every view definition into a structural model
//! 2. [`graph`] builds the view dependency graph, detecting cycles and
//!    ordering views leaf-first
//! 3. [`lineage`] traces every output column back to base table columns
//!
//! [`analysis`] drives the stages over a whole schema and collects every
//! failure as a value.

pub mod analysis;
pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod lineage;
pub mod output;
pub mod preprocessor;
pub mod query;
pub mod schema;
