pub mod email_summary;
pub mod enrichment;
pub mod memory_store;
