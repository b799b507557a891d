#![forbid(unsafe_code)]

pub(in crate::store) mod audit_tx;
pub(in crate::store) mod child_tx;
pub(in crate::store) mod entity_tx;
pub(in crate::store) mod link_tx;
pub(in crate::store) mod schema;
