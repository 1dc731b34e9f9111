//! Request-time services: query permissions, transaction policy, validation, CRUD execution.

mod crud;
pub mod limits;
pub mod transaction;
mod validation;
pub use crud::{strip_hidden, CrudService};
pub use limits::{allow, authorize, deny, Polarity, QueryFeature, QueryLimitConfig, QueryLimitRule};
pub use validation::{compiled, RequestValidator};
