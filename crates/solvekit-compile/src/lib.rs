#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Deferred solver invocations.
pub mod action;

/// Partitioning markers and attributes by the affects relation.
pub mod affects;

/// The basic strategy: per-frame animated solves or a single line-up solve.
pub mod basic;

/// Compile caching keyed by marker visibility.
pub mod cache;

/// Attribute solve categories.
pub mod category;

/// Collections of strategies, markers and attributes.
pub mod collection;

/// Error types for compiling strategies.
pub mod error;

/// Solver argument flags compiled from scene state.
pub mod flags;

/// Ordered frame lists without duplicates.
pub mod frames;

/// Automatic root frame selection.
pub mod root_frame;

/// The compile protocol and the tagged strategy type.
pub mod solver;

/// The multi-stage standard strategy.
pub mod standard;

/// A single solver invocation.
pub mod step;

/// Bundle triangulation.
pub mod triangulate;

pub use action::{Action, ActionPair};
pub use basic::SolverBasic;
pub use cache::{compile_with_cache, CompileCache, VisibilityKey};
pub use category::{categorise, classify, AttrCategory};
pub use collection::{compile_collection, Collection};
pub use error::SolverError;
pub use frames::FrameList;
pub use root_frame::get_root_frames_from_markers;
pub use solver::{ActionIter, Solver, SolverCompile};
pub use standard::{RootFrameStrategy, SolverStandard};
pub use step::SolverStep;
pub use triangulate::SolverTriangulate;
