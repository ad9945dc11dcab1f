//! Replay stream generation
//!
//! Everything that turns ordered records into SQL text: identifier and
//! literal formatting, the optional DDL prelude, and the insert stream
//! itself.

pub mod ddl;
pub mod literal;
pub mod writer;
