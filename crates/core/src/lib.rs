#![forbid(unsafe_code)]

pub mod conflict;
pub mod entity;
pub mod patch;
pub mod reconcile;
pub mod rules;
