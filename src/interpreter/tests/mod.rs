//! Engine tests
//!
//! Organized by feature area. Most programs are built with
//! `program::builder` and lowered first; some run unlowered to exercise
//! structured control flow directly.

mod control_flow_tests;
mod helpers;
