//! Domain layer: artifact identity, capture context, consent, errors.

pub mod artifact;
pub mod consent;
pub mod context;
pub mod errors;
