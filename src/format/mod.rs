//! PSPF/2025 binary format: index block, slot table, operation chains,
//! metadata and manifest documents

pub mod chain;
pub mod constants;
pub mod index;
pub mod manifest;
pub mod metadata;
pub mod slots;
