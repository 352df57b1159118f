//! Entity-persistence engine shared by every resource service.
//! - Call router making in-process and HTTP calls indistinguishable.
//! - Tenant-scoped document store adapter.
//! - Reference resolution and change notification fan-out keeping
//!   denormalized copies in sync across services.
//! - Generic facade running the write lifecycle for each resource definition.

pub mod errors;
pub mod observability;
pub mod router;
pub mod store;
pub mod schema;
pub mod references;
pub mod notifications;
pub mod facade;
pub mod resources;
#[cfg(test)]
pub mod test_support;
#[cfg(test)]
mod tests;
