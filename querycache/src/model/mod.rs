//! Object model seen through the cache
//!
//! Domain records, access-control descriptors and query descriptions as the
//! caching layer needs them. Query evaluation itself belongs to the wrapped
//! object store.

pub mod object;
pub mod query;

pub use object::{
    pointer, reference_id, Acl, DataObject, Permission, PUBLIC_PRINCIPAL, RESERVED_FIELDS,
};
pub use query::{Query, QueryOp};
