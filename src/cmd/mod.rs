//! CLI command implementations.
//!
//! | Module     | Commands handled                       |
//! |------------|----------------------------------------|
//! | `timeline` | the default `actions-gantt <url>` run  |

pub mod timeline;

pub use timeline::cmd_timeline;
