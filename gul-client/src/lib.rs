// gul-client/src/lib.rs
// ============================================================================
// Module: GUL Client Library
// Description: Public API surface for the embedded geofence client.
// Purpose: Expose configuration, the sync engine, and the query engine.
// Dependencies: crate::{config, errors, http, query, syncer}
// ============================================================================

//! ## Overview
//! The client polls a static manifest URL, verifies what it fetched, applies
//! the smallest sufficient update inside a single store transaction, and
//! answers millisecond-scale point-in-fence queries that gate flight. A
//! failed or cancelled sync leaves the local dataset exactly as it was: the
//! local state is always the latest successfully verified dataset.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod errors;
pub mod http;
pub mod query;
pub mod syncer;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ClientConfig;
pub use errors::SyncError;
pub use http::HttpFetcher;
pub use query::check_at;
pub use syncer::AutoSync;
pub use syncer::ShutdownHandle;
pub use syncer::SyncOutcome;
pub use syncer::SyncReport;
pub use syncer::SyncState;
pub use syncer::Syncer;
