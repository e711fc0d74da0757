//! JSON-RPC surface: wire types, errors, dispatch, and method handlers.

pub mod context;
pub mod errors;
pub mod handlers;
pub mod registry;
pub mod types;
pub mod validation;
