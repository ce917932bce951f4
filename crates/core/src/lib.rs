//! fnpkg core types: archives, package/function resources, client config and errors.

#![forbid(unsafe_code)]

pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod resources;

pub use archive::{Archive, ArchiveKind, ARCHIVE_LITERAL_SIZE_LIMIT};
pub use client::{ResourceClient, WatchEvent};
pub use config::ClientConfig;
pub use error::{BoxError, ClientError, PkgError, PkgResult};
pub use resources::{
    BuildStatus, EnvironmentReference, Function, FunctionPackageRef, FunctionSpec, Package,
    PackageRef, PackageSpec, PackageStatus, RESOURCE_GROUP, RESOURCE_VERSION,
};

pub mod prelude {
    pub use super::{
        Archive, ArchiveKind, BuildStatus, ClientConfig, ClientError, Function, Package, PackageSpec,
        PkgError, PkgResult, ResourceClient, WatchEvent,
    };
}
