//! File-backed state used by the ingress to persist its route table.

pub mod json_map_store;
