//! Custom resources stored by the platform: `packages.fission.io` and `functions.fission.io`.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::archive::{self, Archive};

pub const RESOURCE_GROUP: &str = "fission.io";
pub const RESOURCE_VERSION: &str = "v1";

/// Lifecycle of the deployable artifact of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Succeeded,
    #[default]
    Pending,
    Running,
    Failed,
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Pending => "pending",
            BuildStatus::Running => "running",
            BuildStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentReference {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageStatus {
    #[serde(rename = "buildstatus", default)]
    pub build_status: BuildStatus,
    #[serde(rename = "buildlog", default, skip_serializing_if = "String::is_empty")]
    pub build_log: String,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "fission.io",
    version = "v1",
    kind = "Package",
    plural = "packages",
    namespaced,
    schema = "disabled",
    derive = "PartialEq"
)]
pub struct PackageSpec {
    pub environment: EnvironmentReference,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "archive::deserialize_optional")]
    pub source: Option<Archive>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "archive::deserialize_optional")]
    pub deployment: Option<Archive>,
    #[serde(default)]
    pub status: PackageStatus,
}

impl Package {
    pub fn build_status(&self) -> BuildStatus {
        self.spec.status.build_status
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}

/// Reference from a function to the package revision it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(rename = "resourceversion", default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionPackageRef {
    #[serde(rename = "packageref")]
    pub package_ref: PackageRef,
    #[serde(rename = "functionName", default, skip_serializing_if = "String::is_empty")]
    pub function_name: String,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "fission.io",
    version = "v1",
    kind = "Function",
    plural = "functions",
    namespaced,
    schema = "disabled",
    derive = "PartialEq"
)]
pub struct FunctionSpec {
    #[serde(default)]
    pub environment: EnvironmentReference,
    pub package: FunctionPackageRef,
}

impl Function {
    pub fn package_ref(&self) -> &PackageRef {
        &self.spec.package.package_ref
    }

    pub fn references(&self, package_name: &str) -> bool {
        self.spec.package.package_ref.name == package_name
    }
}
