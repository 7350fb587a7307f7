//! climexpr End-to-End Test Infrastructure
//!
//! Integration tests for the canonical expression flows:
//!
//! - Canonicalization: expression -> CRS -> expression
//! - Resolution: wildcarded datasets against synthetic data trees
//! - Macros: extraction, matching and rewriting
//! - Evaluation: operator requests handed to a recording evaluator
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p climexpr-tests
//! ```

pub mod fixtures;

pub use fixtures::{demo_registry, init_tracing, DataTree, RecordedRequest, RecordingEvaluator};
