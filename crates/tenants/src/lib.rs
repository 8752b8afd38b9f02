//! Tenant registry and connection routing.
//!
//! The registry maps a tenant key to the location of that tenant's isolated
//! database. The router turns a key into a live, pooled [`StoreHandle`].

pub mod error;
pub mod registry;
pub mod router;

pub use {
    error::{Error, Result},
    registry::{SqliteTenantRegistry, Tenant, TenantRegistration, TenantRegistry, open_sqlite},
    router::{ConnectionRouter, RouterOptions, StoreHandle, open_tenant_store},
};
