//! Data model shared by every resource service: entity documents, request
//! context, projections, queries, patches, reference declarations and
//! notification envelopes, plus the sea-orm tables behind the postgres backend.

pub mod errors;
pub mod db;
pub mod context;
pub mod entity;
pub mod projection;
pub mod query;
pub mod patch;
pub mod reference;
pub mod envelope;
pub mod document;
pub mod outbox;

pub use context::RequestContext;
pub use envelope::{NotificationEnvelope, NotificationType};
pub use patch::Patch;
pub use projection::Projection;
pub use query::{Page, Query};
pub use reference::{ReferenceDeclaration, ReferenceKey};
