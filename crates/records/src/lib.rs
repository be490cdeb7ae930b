//! `records` crate: the execution data model and typed remote queries.
//!
//! Provides the wire rows returned by the query service, the enriched
//! [`models::ExecutionRecord`] handed to callers, and one query function per
//! named remote operation. No retry or scheduling logic lives here.

pub mod error;
pub mod models;
pub mod queries;

pub use error::QueryError;
pub use models::{
    ExecutionRecord, ExecutionStatus, FormRef, OrganizationRef, RawExecution, TriggerInfo,
    TriggerKind, UserRef, WorkflowRef,
};
