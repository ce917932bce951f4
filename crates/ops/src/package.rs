//! Package record manager: create/update/get/info/list/delete.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fnpkg_archive::{ArchiveFetcher, ArchiveResolver};
use fnpkg_core::{
    ArchiveKind, BuildStatus, ClientConfig, ClientError, EnvironmentReference, Function, Package, PackageSpec,
    PackageStatus, PkgError, PkgResult, ResourceClient,
};
use fnpkg_storage::StorageService;
use metrics::counter;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dependents::{DependentQuery, ListFilterQuery};

#[derive(Debug, Clone, Default)]
pub struct CreatePackage {
    pub environment: String,
    pub source: Option<PathBuf>,
    pub deployment: Option<PathBuf>,
    pub description: Option<String>,
}

impl CreatePackage {
    /// Argument checks done before any file or remote access.
    pub fn validate(&self) -> PkgResult<()> {
        if self.environment.trim().is_empty() {
            return Err(PkgError::MissingArgument("Need --env argument.".into()));
        }
        if non_empty_path(self.source.as_deref()).is_none() && non_empty_path(self.deployment.as_deref()).is_none() {
            return Err(PkgError::MissingArgument(
                "Need --src to specify source archive, or use --deploy to specify deployment archive.".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdatePackage {
    pub name: String,
    pub environment: Option<String>,
    pub description: Option<String>,
    pub source: Option<PathBuf>,
    pub deployment: Option<PathBuf>,
    pub force: bool,
}

impl UpdatePackage {
    pub fn validate(&self) -> PkgResult<()> {
        check_name(&self.name)?;
        let set = |s: &Option<String>| s.as_deref().is_some_and(|s| !s.is_empty());
        if !set(&self.environment)
            && !set(&self.description)
            && non_empty_path(self.source.as_deref()).is_none()
            && non_empty_path(self.deployment.as_deref()).is_none()
        {
            return Err(PkgError::MissingArgument("Need --env or --desc or --src or --deploy argument.".into()));
        }
        Ok(())
    }
}

/// Name check for `update` and `delete`.
pub fn check_name(name: &str) -> PkgResult<()> {
    if name.trim().is_empty() {
        return Err(PkgError::MissingArgument("Need --name argument.".into()));
    }
    Ok(())
}

/// Name check for `get` and `info`.
pub fn check_lookup_name(name: &str) -> PkgResult<()> {
    if name.trim().is_empty() {
        return Err(PkgError::MissingArgument("Need name of package, use --name".into()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub package: Package,
    /// Dependent functions re-pointed at the new package revision.
    pub functions_updated: Vec<String>,
}

/// Result of a delete request. A blocked delete is informational, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted { package: String },
    Blocked { package: String, dependents: Vec<String> },
}

impl DeleteOutcome {
    /// Turn a blocked delete into `PkgError::Conflict` for callers that want a hard error.
    pub fn into_result(self) -> PkgResult<String> {
        match self {
            DeleteOutcome::Deleted { package } => Ok(package),
            DeleteOutcome::Blocked { package, dependents } => Err(PkgError::Conflict { package, op: "delete", dependents }),
        }
    }
}

/// One row of `package list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSummary {
    pub name: String,
    pub status: BuildStatus,
    pub environment: String,
    pub description: String,
}

/// Full detail for `package info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageInfo {
    pub name: String,
    pub namespace: String,
    pub resource_version: String,
    pub status: BuildStatus,
    pub environment: String,
    pub description: String,
    pub source: Option<ArchiveKind>,
    pub deployment: Option<ArchiveKind>,
    pub build_log: String,
}

impl From<&Package> for PackageSummary {
    fn from(p: &Package) -> Self {
        Self {
            name: p.metadata.name.clone().unwrap_or_default(),
            status: p.build_status(),
            environment: p.spec.environment.name.clone(),
            description: p.spec.description.clone(),
        }
    }
}

impl From<&Package> for PackageInfo {
    fn from(p: &Package) -> Self {
        Self {
            name: p.metadata.name.clone().unwrap_or_default(),
            namespace: p.metadata.namespace.clone().unwrap_or_default(),
            resource_version: p.resource_version().unwrap_or_default().to_string(),
            status: p.build_status(),
            environment: p.spec.environment.name.clone(),
            description: p.spec.description.clone(),
            source: p.spec.source.as_ref().map(|a| a.kind()),
            deployment: p.spec.deployment.as_ref().map(|a| a.kind()),
            build_log: p.spec.status.build_log.clone(),
        }
    }
}

pub struct PackageManager {
    cfg: ClientConfig,
    packages: Arc<dyn ResourceClient<Package>>,
    functions: Arc<dyn ResourceClient<Function>>,
    dependents: Arc<dyn DependentQuery>,
    resolver: ArchiveResolver,
    fetcher: ArchiveFetcher,
}

impl PackageManager {
    pub fn new(
        cfg: ClientConfig,
        packages: Arc<dyn ResourceClient<Package>>,
        functions: Arc<dyn ResourceClient<Function>>,
        storage: Arc<dyn StorageService>,
    ) -> Self {
        let dependents = Arc::new(ListFilterQuery::new(functions.clone()));
        let resolver = ArchiveResolver::new(&cfg, storage.clone());
        let fetcher = ArchiveFetcher::new(storage);
        Self { cfg, packages, functions, dependents, resolver, fetcher }
    }

    pub fn with_dependent_query(mut self, q: Arc<dyn DependentQuery>) -> Self {
        self.dependents = q;
        self
    }

    /// Directory under which `get` allocates its per-call download directories.
    pub fn with_download_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fetcher = self.fetcher.with_temp_root(root);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    pub async fn create(&self, req: CreatePackage) -> PkgResult<Package> {
        req.validate()?;
        let source = non_empty_path(req.source.as_deref());
        let deployment = non_empty_path(req.deployment.as_deref());

        let mut spec = PackageSpec {
            environment: EnvironmentReference { namespace: self.cfg.namespace.clone(), name: req.environment.clone() },
            description: req.description.unwrap_or_default(),
            ..Default::default()
        };
        let mut status = BuildStatus::Succeeded;
        if let Some(path) = deployment {
            spec.deployment = Some(self.resolver.resolve(path).await?);
            if source.is_some() {
                warn!("deployment archive may be overwritten by the builder after source compilation");
            }
        }
        if let Some(path) = source {
            spec.source = Some(self.resolver.resolve(path).await?);
            status = BuildStatus::Pending;
        }
        spec.status = PackageStatus { build_status: status, build_log: String::new() };

        let name = Uuid::new_v4().to_string().to_lowercase();
        let mut pkg = Package::new(&name, spec);
        pkg.metadata.namespace = Some(self.cfg.namespace.clone());
        let created = self.packages.create(&pkg).await.map_err(|e| match e {
            ClientError::AlreadyExists { .. } => PkgError::AlreadyExists(name.clone()),
            other => PkgError::Persist(other),
        })?;
        counter!("package_create_total", 1u64);
        info!(pkg = %name, env = %req.environment, status = %status, "package created");
        Ok(created)
    }

    pub async fn update(&self, req: UpdatePackage) -> PkgResult<UpdateOutcome> {
        req.validate()?;
        let environment = req.environment.as_deref().filter(|s| !s.is_empty());
        let description = req.description.as_deref().filter(|s| !s.is_empty());
        let source = non_empty_path(req.source.as_deref());
        let deployment = non_empty_path(req.deployment.as_deref());

        let mut pkg = self.fetch_package(&req.name).await?;
        let dependents = self.dependents.functions_referencing(&req.name).await?;
        if !req.force && !dependents.is_empty() {
            return Err(PkgError::Conflict { package: req.name.clone(), op: "update", dependents: names_of(&dependents) });
        }

        let mut needs_build = false;
        if let Some(env) = environment {
            pkg.spec.environment.name = env.to_string();
            needs_build = true;
        }
        if let Some(path) = source {
            pkg.spec.source = Some(self.resolver.resolve(path).await?);
            needs_build = true;
        }
        if let Some(path) = deployment {
            pkg.spec.deployment = Some(self.resolver.resolve(path).await?);
        }
        if let Some(desc) = description {
            pkg.spec.description = desc.to_string();
        }
        if needs_build {
            pkg.spec.status.build_status = BuildStatus::Pending;
        }

        let updated = self.packages.update(&pkg).await.map_err(|e| match e {
            ClientError::NotFound { .. } => PkgError::NotFound(req.name.clone()),
            other => PkgError::Persist(other),
        })?;
        let new_rv = updated.resource_version().unwrap_or_default().to_string();
        counter!("package_update_total", 1u64);
        info!(pkg = %req.name, rv = %new_rv, rebuild = needs_build, dependents = dependents.len(), "package updated");

        // Earlier successes are kept if a later function update fails.
        let mut functions_updated = Vec::with_capacity(dependents.len());
        for mut f in dependents {
            let fname = f.metadata.name.clone().unwrap_or_default();
            f.spec.package.package_ref.resource_version = new_rv.clone();
            self.functions.update(&f).await.map_err(|source| PkgError::FunctionUpdate {
                function: fname.clone(),
                updated_before: functions_updated.len(),
                source,
            })?;
            functions_updated.push(fname);
        }
        Ok(UpdateOutcome { package: updated, functions_updated })
    }

    /// Download source and deployment archives of `name`; returns the written paths.
    pub async fn get(&self, name: &str, target: Option<&str>) -> PkgResult<Vec<PathBuf>> {
        check_lookup_name(name)?;
        let pkg = self.fetch_package(name).await?;
        let target = match target.filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => {
                info!(pkg = %name, "empty target file name, using package name instead");
                name.to_string()
            }
        };
        let mut written = Vec::new();
        for archive in [&pkg.spec.source, &pkg.spec.deployment].into_iter().flatten() {
            written.push(self.fetcher.fetch(archive, &target).await?);
        }
        counter!("package_get_total", 1u64);
        Ok(written)
    }

    pub async fn info(&self, name: &str) -> PkgResult<PackageInfo> {
        check_lookup_name(name)?;
        let pkg = self.fetch_package(name).await?;
        Ok(PackageInfo::from(&pkg))
    }

    pub async fn list(&self) -> PkgResult<Vec<PackageSummary>> {
        let all = self.packages.list().await?;
        Ok(all.iter().map(PackageSummary::from).collect())
    }

    pub async fn delete(&self, name: &str, force: bool) -> PkgResult<DeleteOutcome> {
        check_name(name)?;
        let dependents = self.dependents.functions_referencing(name).await?;
        if !force && !dependents.is_empty() {
            let dependents = names_of(&dependents);
            warn!(pkg = %name, dependents = ?dependents, "package is used by functions; delete skipped (use -f to force)");
            counter!("package_delete_blocked_total", 1u64);
            return Ok(DeleteOutcome::Blocked { package: name.to_string(), dependents });
        }
        self.packages.delete(name).await.map_err(|e| match e {
            ClientError::NotFound { .. } => PkgError::NotFound(name.to_string()),
            other => PkgError::Persist(other),
        })?;
        counter!("package_delete_total", 1u64);
        info!(pkg = %name, forced = force && !dependents.is_empty(), "package deleted");
        Ok(DeleteOutcome::Deleted { package: name.to_string() })
    }

    async fn fetch_package(&self, name: &str) -> PkgResult<Package> {
        self.packages.get(name).await.map_err(|e| match e {
            ClientError::NotFound { .. } => PkgError::NotFound(name.to_string()),
            other => PkgError::Client(other),
        })
    }
}

fn non_empty_path(p: Option<&Path>) -> Option<&Path> {
    p.filter(|p| !p.as_os_str().is_empty())
}

fn names_of(fns: &[Function]) -> Vec<String> {
    fns.iter().filter_map(|f| f.metadata.name.clone()).collect()
}
