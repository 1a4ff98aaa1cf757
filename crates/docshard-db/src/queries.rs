//! Database query functions organized by domain.

pub mod documents;
pub mod indexes;
pub mod schemas;
pub mod sequences;
pub mod tenants;
