pub mod composite;
pub mod errors;
pub mod format_util;
pub mod gantt;
pub mod github;
pub mod log_parser;
