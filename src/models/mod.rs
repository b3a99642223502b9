//! Data types shared between the workflow, storage and API layers

/// Comparison records and image uploads.
pub mod comparison;
/// Login and registration credentials.
pub mod credentials;
