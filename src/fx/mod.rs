pub mod chain;
pub mod curve;
pub mod graph;
pub mod stages;
