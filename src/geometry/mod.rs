pub mod extractor;
pub mod geometry_model;
pub mod selector;
