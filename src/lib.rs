//! pspf - Progressive Secure Package Format (PSPF/2025) engine
//!
//! This crate builds and executes polyglot files that are simultaneously a
//! native executable and a structured, signed, multi-slot archive: format
//! codec, slot transform pipeline, builder, self-extracting launcher, and
//! the content-addressed workenv cache.

// Enforce strict code quality and reliability
#![deny(
    // Safety
    unsafe_code,

    // Correctness
    missing_debug_implementations,
    unreachable_pub,

    // Future compatibility
    future_incompatible,

    // Rust 2018 idioms
    rust_2018_idioms,
)]
#![warn(
    // Error handling best practices
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,

    // Performance
    clippy::inefficient_to_string,
    clippy::large_enum_variant,

    // Code clarity and maintainability
    clippy::cognitive_complexity,
    clippy::type_complexity,

    // Best practices
    clippy::clone_on_ref_ptr,
    clippy::wildcard_imports,
    clippy::enum_glob_use,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::explicit_iter_loop,
    clippy::explicit_into_iter_loop,
)]

pub mod api;
pub mod builder;
pub mod cache;
pub mod crypto;
pub mod error;
pub mod exit_codes;
pub mod format;
pub mod launcher;
pub mod logger;
pub mod pipeline;
pub mod platform;
pub mod reader;
pub mod validation;
pub mod verify;
pub mod version;

// Re-export the main API surface
pub use api::{BuildOptions, LaunchOptions, build_package, launch_package, verify_package};
pub use error::{PspfError, Result};
pub use platform::platform_string;
pub use validation::ValidationLevel;
