//! # casemirror-store
//!
//! SQLite store for mirrored stages and test cases, and the read-only query
//! layer served to clients.
//!
//! [`Store::replace_all`] swaps the whole snapshot in one transaction;
//! [`QueryService`] reads from separate connections and always sees one
//! committed generation.

pub mod error;
pub mod query;
mod schema;
pub mod store;

pub use error::{QueryError, StoreError};
pub use query::{GitInfo, QueryService, StageSummary, StagesView, TestCaseRow, TestCasesView};
pub use store::Store;
