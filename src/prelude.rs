//! Convenient imports for common functionality.
//!
//! ```rust
//! use breakwater_data::prelude::*;
//! ```

pub use crate::activity::{ActivityContext, ActivityEvent, ActivityLog};
pub use crate::cache::ResponseCache;
pub use crate::config::{CacheConfig, DataLayerConfig, PoolConfig, RetryPolicy};
pub use crate::database::{Database, ExecuteOutcome, HealthSnapshot, QueryMode};
pub use crate::error::{DataAccessError, ErrorClass};
pub use crate::results::{ResultSet, Row, WriteResult};
pub use crate::types::SqlValue;
