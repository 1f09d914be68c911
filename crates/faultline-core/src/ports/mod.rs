//! Port traits - seams between the policy layer and its adapters.

pub mod capture_backend;
