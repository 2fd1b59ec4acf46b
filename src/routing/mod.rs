//! Request routing: pattern compilation and the priority route table.

pub mod matcher;
pub mod router;
