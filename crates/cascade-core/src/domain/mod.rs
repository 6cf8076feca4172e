/// Identifiers and tokens
pub mod ids;

/// Block references and resolved packages
pub mod block;

/// Flow versions and their step graphs
pub mod flow_version;

/// Queue jobs
pub mod job;

/// Flow runs
pub mod run;
