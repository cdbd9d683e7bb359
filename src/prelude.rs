//! Convenience re-exports for easy importing
//!
//! Import everything you need with:
//! ```rust
//! use apitoolkit_actix::prelude::*;
//! ```

pub use crate::config::Config;
pub use crate::context::{report_error, RequestContext};
pub use crate::error::ToolkitError;
pub use crate::middleware::ApiToolkit;
