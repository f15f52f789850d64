pub mod resolver;
pub mod source;

pub use resolver::{LayerSizes, SizeCache, SizeOracle, SizeResolver};
pub use source::{repository_id, HttpLayerSource, LayerInfo, LayerSource};
