//! Integration tests for the clip world
//!
//! Exercise the full query path over a deterministic fake evaluator: broad
//! phase, filtering, narrow-phase dispatch and result assembly.
