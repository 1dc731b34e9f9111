//! Resourceful SDK: a declarative entity tree turned into routed, transactional CRUD endpoints.

pub mod case;
pub mod config;
pub mod db;
pub mod error;
pub mod extensions;
pub mod extractors;
pub mod handlers;
pub mod query;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;

pub use config::{load_from_dir, load_from_file, resolve, FullConfig, Operation, ResolvedApi};
pub use db::{Database, DbScope, PgDatabase, Transaction};
pub use error::{AppError, ConfigError};
pub use extensions::{Extensions, HookContext, HookFuture, HookStage, InitContext, SerializeContext};
pub use extractors::CurrentLanguage;
pub use routes::{application, mount, RouteTable, RouteTreeBuilder};
pub use state::AppState;
