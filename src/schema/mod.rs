//! Schema module for CircleCI configuration keywords

mod keywords;

pub use keywords::{
    is_builtin_step, is_keyword, is_root_keyword, BUILTIN_STEPS, KEYWORDS, ROOT_KEYWORDS,
};
