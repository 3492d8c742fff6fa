pub mod blob_store;
pub mod lifecycle;
pub mod membership;
pub mod naming;
pub mod quota;
