#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use fnpkg_core::{
    ArchiveKind, BuildStatus, ClientConfig, ClientError, Function, FunctionPackageRef, FunctionSpec, Package,
    PackageRef, PkgError, ResourceClient, WatchEvent,
};
use fnpkg_ops::{CreatePackage, DeleteOutcome, PackageManager, UpdatePackage};
use fnpkg_storage::MemoryStorage;
use fnpkg_store::MemoryStore;
use tokio::sync::mpsc;

struct Harness {
    mgr: PackageManager,
    packages: Arc<MemoryStore<Package>>,
    functions: Arc<MemoryStore<Function>>,
    storage: Arc<MemoryStorage>,
    files: tempfile::TempDir,
    _downloads: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let cfg = ClientConfig::new("http://controller:8888").unwrap();
        let packages = Arc::new(MemoryStore::<Package>::new("default"));
        let functions = Arc::new(MemoryStore::<Function>::new("default"));
        Self::with_functions(cfg, packages, functions.clone(), functions)
    }

    fn with_functions(
        cfg: ClientConfig,
        packages: Arc<MemoryStore<Package>>,
        functions: Arc<MemoryStore<Function>>,
        function_client: Arc<dyn ResourceClient<Function>>,
    ) -> Self {
        let storage = Arc::new(MemoryStorage::new(&cfg));
        let downloads = tempfile::tempdir().unwrap();
        let mgr = PackageManager::new(cfg, packages.clone(), function_client, storage.clone())
            .with_download_root(downloads.path());
        Self { mgr, packages, functions, storage, files: tempfile::tempdir().unwrap(), _downloads: downloads }
    }

    fn file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let p = self.files.path().join(name);
        std::fs::write(&p, bytes).unwrap();
        p
    }

    async fn function_for(&self, fname: &str, pkg: &Package) -> Function {
        let f = Function::new(
            fname,
            FunctionSpec {
                package: FunctionPackageRef {
                    package_ref: PackageRef {
                        namespace: "default".into(),
                        name: pkg.metadata.name.clone().unwrap(),
                        resource_version: pkg.resource_version().unwrap().to_string(),
                    },
                    function_name: String::new(),
                },
                ..Default::default()
            },
        );
        self.functions.create(&f).await.unwrap()
    }

    async fn create_src(&self) -> Package {
        let src = self.file("handler.py", b"def main():\n    return 'hello'\n");
        self.mgr
            .create(CreatePackage { environment: "python".into(), source: Some(src), ..Default::default() })
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn create_with_small_source_is_pending_literal() {
    let h = Harness::new();
    let content = vec![b'x'; 50];
    let src = h.file("handler.py", &content);
    let pkg = h
        .mgr
        .create(CreatePackage { environment: "python".into(), source: Some(src), ..Default::default() })
        .await
        .unwrap();

    let name = pkg.metadata.name.clone().unwrap();
    assert_eq!(name, name.to_lowercase());
    let stored = h.packages.get(&name).await.unwrap();
    assert_eq!(stored.build_status(), BuildStatus::Pending);
    let source = stored.spec.source.as_ref().unwrap();
    assert_eq!(source.kind(), ArchiveKind::Literal);
    assert_eq!(source.as_literal().unwrap(), &content[..]);
    assert!(stored.spec.deployment.is_none());
    assert_eq!(stored.spec.environment.name, "python");
    assert_eq!(stored.spec.environment.namespace, "default");
}

#[tokio::test]
async fn create_with_large_deployment_is_succeeded_url() {
    let h = Harness::new();
    let deploy = h.file("bin.zip", &vec![0u8; 10 * 1024 * 1024]);
    let pkg = h
        .mgr
        .create(CreatePackage { environment: "python".into(), deployment: Some(deploy), ..Default::default() })
        .await
        .unwrap();

    assert_eq!(pkg.build_status(), BuildStatus::Succeeded);
    let dep = pkg.spec.deployment.as_ref().unwrap();
    assert_eq!(dep.kind(), ArchiveKind::Url);
    assert!(dep.as_url().unwrap().starts_with("http://controller:8888/proxy/storage/v1/archive?id="));
    assert_eq!(h.storage.len(), 1);
}

#[tokio::test]
async fn create_with_source_and_deployment_is_pending() {
    let h = Harness::new();
    let src = h.file("src.py", b"print(1)");
    let dep = h.file("dep.py", b"print(2)");
    let pkg = h
        .mgr
        .create(CreatePackage {
            environment: "python".into(),
            source: Some(src),
            deployment: Some(dep),
            description: Some("both".into()),
        })
        .await
        .unwrap();
    assert_eq!(pkg.build_status(), BuildStatus::Pending);
    assert_eq!(pkg.spec.description, "both");
}

#[tokio::test]
async fn create_validates_before_any_remote_call() {
    let h = Harness::new();
    let err = h.mgr.create(CreatePackage { environment: String::new(), ..Default::default() }).await.unwrap_err();
    assert!(matches!(err, PkgError::MissingArgument(ref m) if m.contains("--env")));
    let err = h.mgr.create(CreatePackage { environment: "python".into(), ..Default::default() }).await.unwrap_err();
    assert!(matches!(err, PkgError::MissingArgument(ref m) if m.contains("--src")));
    assert!(h.packages.is_empty());
}

#[tokio::test]
async fn create_with_unreadable_file_persists_nothing() {
    let h = Harness::new();
    let err = h
        .mgr
        .create(CreatePackage {
            environment: "python".into(),
            source: Some(PathBuf::from("/no/such/handler.py")),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PkgError::FileAccess { .. }));
    assert!(h.packages.is_empty());
}

#[tokio::test]
async fn update_source_always_goes_pending() {
    let h = Harness::new();
    let dep = h.file("dep.py", b"compiled");
    let pkg = h
        .mgr
        .create(CreatePackage { environment: "python".into(), deployment: Some(dep), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(pkg.build_status(), BuildStatus::Succeeded);
    let name = pkg.metadata.name.clone().unwrap();

    let new_src = h.file("v2.py", b"print('v2')");
    let out = h
        .mgr
        .update(UpdatePackage { name: name.clone(), source: Some(new_src), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(out.package.build_status(), BuildStatus::Pending);
    assert_eq!(out.package.spec.source.as_ref().unwrap().as_literal().unwrap(), b"print('v2')");
    // Deployment untouched.
    assert_eq!(out.package.spec.deployment, pkg.spec.deployment);
}

#[tokio::test]
async fn update_deployment_alone_keeps_status() {
    let h = Harness::new();
    let pkg = h.create_src().await;
    let name = pkg.metadata.name.clone().unwrap();
    // Simulate the builder finishing.
    let mut built = h.packages.get(&name).await.unwrap();
    built.spec.status.build_status = BuildStatus::Succeeded;
    h.packages.update(&built).await.unwrap();

    let dep = h.file("dep.bin", b"artifact");
    let out = h
        .mgr
        .update(UpdatePackage { name: name.clone(), deployment: Some(dep), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(out.package.build_status(), BuildStatus::Succeeded);
    assert_eq!(out.package.spec.deployment.as_ref().unwrap().as_literal().unwrap(), b"artifact");
}

#[tokio::test]
async fn update_environment_triggers_rebuild_and_description_does_not() {
    let h = Harness::new();
    let dep = h.file("dep.bin", b"artifact");
    let pkg = h
        .mgr
        .create(CreatePackage { environment: "python".into(), deployment: Some(dep), ..Default::default() })
        .await
        .unwrap();
    let name = pkg.metadata.name.clone().unwrap();

    let out = h
        .mgr
        .update(UpdatePackage { name: name.clone(), description: Some("new desc".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(out.package.build_status(), BuildStatus::Succeeded);
    assert_eq!(out.package.spec.description, "new desc");

    let out = h
        .mgr
        .update(UpdatePackage { name, environment: Some("python3".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(out.package.build_status(), BuildStatus::Pending);
    assert_eq!(out.package.spec.environment.name, "python3");
}

#[tokio::test]
async fn update_requires_a_change_and_an_existing_package() {
    let h = Harness::new();
    let err = h.mgr.update(UpdatePackage { name: "p".into(), ..Default::default() }).await.unwrap_err();
    assert!(matches!(err, PkgError::MissingArgument(_)));
    let err = h
        .mgr
        .update(UpdatePackage { name: "missing".into(), description: Some("d".into()), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, PkgError::NotFound(ref n) if n == "missing"));
}

#[tokio::test]
async fn update_with_dependents_without_force_is_rejected_repeatably() {
    let h = Harness::new();
    let pkg = h.create_src().await;
    let name = pkg.metadata.name.clone().unwrap();
    h.function_for("fn1", &pkg).await;
    let before = h.packages.get(&name).await.unwrap();

    for _ in 0..2 {
        let src = h.file("v2.py", b"v2");
        let err = h
            .mgr
            .update(UpdatePackage { name: name.clone(), source: Some(src), ..Default::default() })
            .await
            .unwrap_err();
        match err {
            PkgError::Conflict { ref dependents, op, .. } => {
                assert_eq!(dependents, &vec!["fn1".to_string()]);
                assert_eq!(op, "update");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.packages.get(&name).await.unwrap(), before);
    }
    // Rejected before resolving the new archive.
    assert!(h.storage.is_empty());
}

#[tokio::test]
async fn forced_update_repoints_every_dependent() {
    let h = Harness::new();
    let pkg = h.create_src().await;
    let other = h.create_src().await;
    let name = pkg.metadata.name.clone().unwrap();
    for f in ["fn1", "fn2", "fn3"] {
        h.function_for(f, &pkg).await;
    }
    let bystander = h.function_for("fn-other", &other).await;

    let out = h
        .mgr
        .update(UpdatePackage { name: name.clone(), description: Some("v2".into()), force: true, ..Default::default() })
        .await
        .unwrap();
    let new_rv = out.package.resource_version().unwrap().to_string();
    assert_ne!(Some(new_rv.as_str()), pkg.resource_version());
    assert_eq!(out.functions_updated, vec!["fn1", "fn2", "fn3"]);

    let fns = h.functions.list().await.unwrap();
    let repointed = fns.iter().filter(|f| f.references(&name) && f.package_ref().resource_version == new_rv).count();
    assert_eq!(repointed, 3);
    let untouched = h.functions.get("fn-other").await.unwrap();
    assert_eq!(untouched.package_ref(), bystander.package_ref());
}

/// Delegates to a memory store but fails updates of one named function.
struct FailingFunctions {
    inner: Arc<MemoryStore<Function>>,
    fail_on: &'static str,
}

#[async_trait::async_trait]
impl ResourceClient<Function> for FailingFunctions {
    async fn create(&self, obj: &Function) -> Result<Function, ClientError> {
        self.inner.create(obj).await
    }
    async fn get(&self, name: &str) -> Result<Function, ClientError> {
        self.inner.get(name).await
    }
    async fn update(&self, obj: &Function) -> Result<Function, ClientError> {
        if obj.metadata.name.as_deref() == Some(self.fail_on) {
            return Err(ClientError::Transport("connection reset".into()));
        }
        self.inner.update(obj).await
    }
    async fn delete(&self, name: &str) -> Result<(), ClientError> {
        self.inner.delete(name).await
    }
    async fn list(&self) -> Result<Vec<Function>, ClientError> {
        self.inner.list().await
    }
    async fn watch(&self) -> Result<mpsc::Receiver<WatchEvent<Function>>, ClientError> {
        self.inner.watch().await
    }
}

#[tokio::test]
async fn failing_dependent_update_aborts_without_rollback() {
    let cfg = ClientConfig::new("http://controller:8888").unwrap();
    let packages = Arc::new(MemoryStore::<Package>::new("default"));
    let functions = Arc::new(MemoryStore::<Function>::new("default"));
    let failing = Arc::new(FailingFunctions { inner: functions.clone(), fail_on: "fn2" });
    let h = Harness::with_functions(cfg, packages, functions, failing);

    let pkg = h.create_src().await;
    let name = pkg.metadata.name.clone().unwrap();
    for f in ["fn1", "fn2", "fn3"] {
        h.function_for(f, &pkg).await;
    }

    let err = h
        .mgr
        .update(UpdatePackage { name: name.clone(), description: Some("v2".into()), force: true, ..Default::default() })
        .await
        .unwrap_err();
    match err {
        PkgError::FunctionUpdate { ref function, updated_before, .. } => {
            assert_eq!(function, "fn2");
            assert_eq!(updated_before, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
    let new_rv = h.packages.get(&name).await.unwrap().resource_version().unwrap().to_string();
    assert_eq!(h.functions.get("fn1").await.unwrap().package_ref().resource_version, new_rv);
    assert_ne!(h.functions.get("fn3").await.unwrap().package_ref().resource_version, new_rv);
}

#[tokio::test]
async fn delete_referenced_package_is_blocked_not_failed() {
    let h = Harness::new();
    let pkg = h.create_src().await;
    let name = pkg.metadata.name.clone().unwrap();
    h.function_for("fn1", &pkg).await;

    let out = h.mgr.delete(&name, false).await.unwrap();
    assert_eq!(out, DeleteOutcome::Blocked { package: name.clone(), dependents: vec!["fn1".into()] });
    assert!(h.packages.get(&name).await.is_ok());
    assert!(matches!(out.into_result(), Err(PkgError::Conflict { op: "delete", .. })));

    let out = h.mgr.delete(&name, true).await.unwrap();
    assert_eq!(out, DeleteOutcome::Deleted { package: name.clone() });
    assert!(h.packages.get(&name).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn delete_unreferenced_and_missing() {
    let h = Harness::new();
    let pkg = h.create_src().await;
    let name = pkg.metadata.name.clone().unwrap();
    assert!(matches!(h.mgr.delete(&name, false).await.unwrap(), DeleteOutcome::Deleted { .. }));
    assert!(matches!(h.mgr.delete(&name, false).await, Err(PkgError::NotFound(_))));
    assert!(matches!(h.mgr.delete("", false).await, Err(PkgError::MissingArgument(_))));
}

#[tokio::test]
async fn get_downloads_both_archives_under_target_name() {
    let h = Harness::new();
    let src = h.file("handler.py", b"source bytes");
    let dep = h.file("dep.bin", b"deploy bytes");
    let pkg = h
        .mgr
        .create(CreatePackage {
            environment: "python".into(),
            source: Some(src),
            deployment: Some(dep),
            ..Default::default()
        })
        .await
        .unwrap();
    let name = pkg.metadata.name.clone().unwrap();

    let paths = h.mgr.get(&name, Some("out")).await.unwrap();
    assert_eq!(paths.len(), 2);
    assert_eq!(std::fs::read(&paths[0]).unwrap(), b"source bytes");
    assert_eq!(std::fs::read(&paths[1]).unwrap(), b"deploy bytes");
    assert!(paths.iter().all(|p| p.file_name().unwrap() == "out"));

    let paths = h.mgr.get(&name, None).await.unwrap();
    assert_eq!(paths[0].file_name().unwrap().to_str(), Some(name.as_str()));
}

#[tokio::test]
async fn list_and_info_project_the_record() {
    let h = Harness::new();
    let pkg = h.create_src().await;
    let name = pkg.metadata.name.clone().unwrap();

    let rows = h.mgr.list().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, name);
    assert_eq!(rows[0].status, BuildStatus::Pending);
    assert_eq!(rows[0].environment, "python");

    let mut failed = h.packages.get(&name).await.unwrap();
    failed.spec.status.build_status = BuildStatus::Failed;
    failed.spec.status.build_log = "ModuleNotFoundError: requests".into();
    h.packages.update(&failed).await.unwrap();

    let info = h.mgr.info(&name).await.unwrap();
    assert_eq!(info.status, BuildStatus::Failed);
    assert_eq!(info.build_log, "ModuleNotFoundError: requests");
    assert_eq!(info.source, Some(ArchiveKind::Literal));
    assert_eq!(info.deployment, None);
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["status"], "failed");
    assert!(matches!(h.mgr.info("nope").await, Err(PkgError::NotFound(_))));
}
