#![allow(unused_crate_dependencies)]

#[path = "integration/common/mod.rs"]
mod common;

#[path = "integration/contributions.rs"]
mod contributions;

#[path = "integration/dynamic.rs"]
mod dynamic;

#[path = "integration/persistence.rs"]
mod persistence;
