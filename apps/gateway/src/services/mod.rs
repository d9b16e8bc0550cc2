// apps/gateway/src/services/mod.rs

pub mod inventory_proxy;
