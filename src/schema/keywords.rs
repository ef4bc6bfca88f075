//! CircleCI configuration keywords
//!
//! Built-in step names are accepted by the step validator without a
//! declaration; the keyword tables drive semantic highlighting.

/// Steps provided by CircleCI itself
pub const BUILTIN_STEPS: &[&str] = &[
    "run",
    "checkout",
    "setup_remote_docker",
    "save_cache",
    "restore_cache",
    "store_artifacts",
    "store_test_results",
    "persist_to_workspace",
    "attach_workspace",
    "add_ssh_keys",
    // Flow control
    "when",
    "unless",
    "steps",
];

/// Keys allowed at the top level of a configuration
pub const ROOT_KEYWORDS: &[&str] = &[
    "version",
    "setup",
    "orbs",
    "commands",
    "parameters",
    "executors",
    "jobs",
    "workflows",
];

/// Keys highlighted wherever they appear below the top level
pub const KEYWORDS: &[&str] = &[
    "parameters",
    "description",
    "executor",
    "steps",
    "filters",
    "environment",
    "working_directory",
    "docker",
    "requires",
    "jobs",
    "triggers",
];

/// Check if a step name is a CircleCI built-in
pub fn is_builtin_step(name: &str) -> bool {
    BUILTIN_STEPS.contains(&name)
}

/// Check if a key is a known top-level key
pub fn is_root_keyword(key: &str) -> bool {
    ROOT_KEYWORDS.contains(&key)
}

/// Check if a key is highlighted as a keyword below the top level
pub fn is_keyword(key: &str) -> bool {
    KEYWORDS.contains(&key)
}
