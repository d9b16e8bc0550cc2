// apps/gateway/src/web/handlers/mod.rs

pub mod billing_handlers;
pub mod inventory_handlers;
