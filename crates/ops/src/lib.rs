//! fnpkg ops: package lifecycle operations and keeping dependent functions consistent.
//!
//! Every operation runs its remote calls strictly in sequence; nothing here retries.

#![forbid(unsafe_code)]

pub mod dependents;
pub mod package;
pub mod render;

pub use dependents::{DependentQuery, ListFilterQuery};
pub use package::{
    check_lookup_name, check_name, CreatePackage, DeleteOutcome, PackageInfo, PackageManager, PackageSummary,
    UpdateOutcome, UpdatePackage,
};
pub use render::{render_info, render_list};
