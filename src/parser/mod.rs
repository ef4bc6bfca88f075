//! Parser module for YAML and interpolation handling

pub mod expressions;
pub mod syntax;
mod yaml;

pub use expressions::{find_interpolations, Interpolation, InterpolationScope};
pub use syntax::parse_tree;
pub use yaml::parse_yaml;
