// Domain layer: document model, wire types and ports. No I/O here.

pub mod api;
pub mod model;
pub mod ports;
