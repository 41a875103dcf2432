//! Request-to-query translation: filter compilation and fetch plan assembly.

pub mod assemble;
pub mod filter;
pub mod plan;
pub mod predicate;

pub use assemble::{apply_arg_filter, apply_sort, Pagination};
pub use filter::{param_string_to_list, FilterClause, OperatorFn, OperatorTable};
pub use plan::{FetchPlan, Projection, Resolution, SortKey};
pub use predicate::{like, CompareOp, Predicate};
