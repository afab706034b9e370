//! Cluster lifecycle orchestration
//!
//! A create runs these steps in order, undoing completed ones in reverse if a
//! later step fails:
//!
//! 1. check for an existing cluster with the same name
//! 2. create the PCE container cluster (yields the pairing token)
//! 3. resolve and attach labels
//! 4. register a workload profile for the target namespace
//! 5. store the secret record in Vault
//! 6. provision the namespace, token Secret and ServiceAccount
//! 7. mark the cluster online
//!
//! Deletes walk the same resources backwards and only touch what exists.

pub mod locks;
pub mod record;
pub mod steps;

pub use locks::NameLocks;
pub use record::ClusterSecret;
pub use steps::{Operation, Resource, RollbackFailure, RollbackReport, Step};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::BackendError;
use crate::config::Settings;
use crate::context::{validate_cluster_name, validate_labels, LabelSpec, RequestContext};
use crate::error::{ClusterOperationError, Error};
use crate::labels::LabelResolver;
use crate::pce::{
    ClusterUpdate, ContainerCluster, Label, LabelRef, NewCluster, PceApi, WorkloadProfile,
};
use crate::runtime::{
    ownership_labels, token_secret_name, ClusterRuntime, NamespaceBinding, ObjectInfo,
};
use crate::vault::SecretStore;

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Prefix for secret records inside the KV mount
    pub secret_path: String,
    pub default_namespace: String,
    pub service_account: String,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            secret_path: settings.vault.secret_path.clone(),
            default_namespace: settings.kubernetes.namespace.clone(),
            service_account: settings.kubernetes.service_account.clone(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            secret_path: "illumio-cluster-manager".to_string(),
            default_namespace: "illumio-system".to_string(),
            service_account: "illumio-service".to_string(),
        }
    }
}

/// Resources a create has made so far, in creation order
#[derive(Debug, Default)]
/// Resources are recorded before their create call goes out, so a write that
/// lands without an answer is still undone.
struct CreateProgress {
    cluster_href: Option<String>,
    secret_path: Option<String>,
    kube_objects: Vec<Resource>,
}

type StepResult<T> = Result<T, (Step, Error)>;

#[derive(Clone)]
pub struct ClusterOrchestrator {
    pce: Arc<dyn PceApi>,
    secrets: Arc<dyn SecretStore>,
    runtime: Arc<dyn ClusterRuntime>,
    labels: LabelResolver,
    config: Arc<OrchestratorConfig>,
    locks: NameLocks,
}

impl ClusterOrchestrator {
    pub fn new(
        pce: Arc<dyn PceApi>,
        secrets: Arc<dyn SecretStore>,
        runtime: Arc<dyn ClusterRuntime>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            labels: LabelResolver::new(pce.clone()),
            pce,
            secrets,
            runtime,
            config: Arc::new(config),
            locks: NameLocks::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Where the secret record for `cluster` lives
    pub fn secret_path_for(&self, cluster: &str) -> String {
        format!("{}/clusters/{}", self.config.secret_path.trim_matches('/'), cluster)
    }

    // ------------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------------

    /// Create a cluster and everything it needs, or return the existing online one.
    ///
    /// The workflow runs on its own task: dropping the returned future does not
    /// interrupt a create or its rollback halfway.
    pub async fn create_cluster(&self, ctx: RequestContext) -> Result<ContainerCluster, Error> {
        ctx.validate()?;

        let span = info_span!(
            "create_cluster",
            cluster = %ctx.cluster_name,
            op = %ctx.operation_id,
            dry_run = ctx.dry_run
        );
        let this = self.clone();
        let handle = tokio::spawn(
            async move {
                let result = {
                    let _guard = this.locks.acquire(&ctx.cluster_name).await;
                    this.run_create(&ctx).await
                };
                this.locks.prune();
                result
            }
            .instrument(span),
        );

        handle
            .await
            .map_err(|e| Error::Aborted(format!("create workflow task failed: {}", e)))?
    }

    async fn run_create(&self, ctx: &RequestContext) -> Result<ContainerCluster, Error> {
        let name = ctx.cluster_name.as_str();

        let existing = self.pce.find_cluster(name).await.map_err(|e| {
            ClusterOperationError::new(Operation::Create, name, Step::CheckExisting, Error::pce(e))
        })?;

        let replacing = existing.is_some();
        if let Some(existing) = existing {
            if existing.online && !ctx.force_recreate {
                info!(href = %existing.href, "Cluster already online");
                return Ok(existing);
            }
            if ctx.dry_run {
                info!(
                    href = %existing.href,
                    online = existing.online,
                    "Dry run: existing cluster would be replaced"
                );
            } else {
                warn!(
                    href = %existing.href,
                    online = existing.online,
                    "Replacing existing cluster"
                );
                self.run_delete(name).await?;
            }
        }

        if ctx.dry_run {
            return self.simulate_create(ctx, replacing).await;
        }

        let mut progress = CreateProgress::default();
        match self.apply_create(ctx, &mut progress).await {
            Ok(cluster) => {
                info!(href = %cluster.href, namespace = %ctx.namespace, "Cluster online");
                Ok(cluster)
            }
            Err((step, cause)) => {
                error!(step = %step, error = %cause, "Create failed, rolling back");
                let report = self.rollback(&progress).await;
                if report.is_complete() {
                    info!(undone = report.undone.len(), "Rollback complete");
                } else {
                    error!(
                        failed = report.failed.len(),
                        "Rollback incomplete, manual cleanup required"
                    );
                }
                Err(ClusterOperationError::new(Operation::Create, name, step, cause)
                    .with_rollback(report)
                    .into())
            }
        }
    }

    async fn apply_create(
        &self,
        ctx: &RequestContext,
        progress: &mut CreateProgress,
    ) -> StepResult<ContainerCluster> {
        let name = ctx.cluster_name.as_str();

        let request = NewCluster {
            name: name.to_string(),
            description: ctx.description.clone(),
            enforcement_mode: ctx.enforcement_mode,
        };
        let mut cluster = match self.pce.create_cluster(&request).await {
            Ok(cluster) => cluster,
            Err(e) => {
                // a retried POST answers Conflict when the first attempt landed
                if e.is_conflict() {
                    if let Ok(Some(landed)) = self.pce.find_cluster(name).await {
                        warn!(href = %landed.href, "Create landed without a response");
                        progress.cluster_href = Some(landed.href);
                    }
                }
                return Err((Step::CreatePceCluster, Error::pce(e)));
            }
        };
        progress.cluster_href = Some(cluster.href.clone());
        info!(href = %cluster.href, "Created PCE container cluster");

        let token = cluster.token.take().ok_or_else(|| {
            (
                Step::CreatePceCluster,
                Error::BackendRejection(BackendError::Decode(
                    "create response did not include a container cluster token".to_string(),
                )),
            )
        })?;

        let labels = self
            .labels
            .resolve_all(&ctx.labels)
            .await
            .map_err(|e| (Step::AttachLabels, e))?;
        if !labels.is_empty() {
            let refs: Vec<LabelRef> = labels.iter().map(Label::reference).collect();
            self.pce
                .update_cluster(&cluster.href, &ClusterUpdate::labels(refs.clone()))
                .await
                .map_err(|e| (Step::AttachLabels, Error::pce(e)))?;
            cluster.labels = refs;
            debug!(count = labels.len(), "Attached labels");
        }

        let profile = WorkloadProfile::for_namespace(
            &ctx.namespace,
            ctx.enforcement_mode,
            cluster.labels.clone(),
        );
        self.pce
            .create_workload_profile(&cluster.href, &profile)
            .await
            .map_err(|e| (Step::RegisterWorkloadProfile, Error::pce(e)))?;
        debug!(namespace = %ctx.namespace, "Registered workload profile");

        let path = self.secret_path_for(name);
        let record = ClusterSecret {
            cluster_name: name.to_string(),
            cluster_href: cluster.href.clone(),
            cluster_id: cluster.cluster_id().to_string(),
            cluster_token: token,
            namespace: ctx.namespace.clone(),
            service_account: self.config.service_account.clone(),
            enforcement_mode: ctx.enforcement_mode,
            created_at: Utc::now(),
        };
        let data = record.to_data().map_err(|e| (Step::StoreSecret, e))?;
        self.ensure_no_secret_record(&path)
            .await
            .map_err(|e| (Step::StoreSecret, e))?;
        progress.secret_path = Some(path.clone());
        let version = self
            .secrets
            .write_secret(&path, &data, Some(0))
            .await
            .map_err(|e| (Step::StoreSecret, Error::secret(e)))?;
        info!(path = %path, version = version, "Stored cluster secret");

        let stored = self
            .secrets
            .read_secret(&path, None)
            .await
            .map_err(|e| (Step::ProvisionNamespace, Error::secret(e)))?
            .ok_or_else(|| {
                (
                    Step::ProvisionNamespace,
                    Error::secret(BackendError::NotFound(path.clone())),
                )
            })?;
        let stored =
            ClusterSecret::from_data(&stored.data).map_err(|e| (Step::ProvisionNamespace, e))?;
        let binding = self
            .provision_binding(&stored, progress)
            .await
            .map_err(|e| (Step::ProvisionNamespace, e))?;
        info!(
            namespace = %binding.namespace,
            service_account = %binding.service_account,
            adopted = !binding.namespace_created,
            "Provisioned namespace binding"
        );

        self.pce
            .update_cluster(&cluster.href, &ClusterUpdate::online(true))
            .await
            .map_err(|e| (Step::MarkOnline, Error::pce(e)))?;
        cluster.online = true;

        Ok(cluster)
    }

    async fn provision_binding(
        &self,
        secret: &ClusterSecret,
        progress: &mut CreateProgress,
    ) -> Result<NamespaceBinding, Error> {
        let namespace = secret.namespace.as_str();
        let labels = ownership_labels(&secret.cluster_name);

        let existing = self
            .runtime
            .get_namespace(namespace)
            .await
            .map_err(Error::runtime)?;
        let namespace_created = match existing {
            Some(_) => {
                debug!(namespace = %namespace, "Adopting existing namespace");
                false
            }
            None => {
                progress.kube_objects.push(Resource::Namespace {
                    name: namespace.to_string(),
                });
                self.runtime
                    .create_namespace(namespace, &labels)
                    .await
                    .map_err(Error::runtime)?;
                true
            }
        };

        let secret_name = token_secret_name(&secret.service_account);
        let data = BTreeMap::from([
            ("cluster_id".to_string(), secret.cluster_id.clone()),
            ("cluster_token".to_string(), secret.cluster_token.expose().to_string()),
        ]);
        let existing = self
            .runtime
            .get_secret(namespace, &secret_name)
            .await
            .map_err(Error::runtime)?;
        ensure_absent(existing, "secret", namespace)?;
        progress.kube_objects.push(Resource::KubeSecret {
            namespace: namespace.to_string(),
            name: secret_name.clone(),
        });
        self.runtime
            .create_secret(namespace, &secret_name, &data, &labels)
            .await
            .map_err(Error::runtime)?;

        let existing = self
            .runtime
            .get_service_account(namespace, &secret.service_account)
            .await
            .map_err(Error::runtime)?;
        ensure_absent(existing, "service account", namespace)?;
        progress.kube_objects.push(Resource::ServiceAccount {
            namespace: namespace.to_string(),
            name: secret.service_account.clone(),
        });
        self.runtime
            .create_service_account(namespace, &secret.service_account, &secret_name, &labels)
            .await
            .map_err(Error::runtime)?;

        Ok(NamespaceBinding {
            namespace: namespace.to_string(),
            service_account: secret.service_account.clone(),
            secret_name,
            cluster_href: secret.cluster_href.clone(),
            namespace_created,
        })
    }

    /// Read-only rehearsal of a create. When `replacing`, the existing
    /// cluster's secret record would be removed first.
    async fn simulate_create(
        &self,
        ctx: &RequestContext,
        replacing: bool,
    ) -> Result<ContainerCluster, Error> {
        let name = ctx.cluster_name.as_str();
        let fail = |step: Step, cause: Error| -> Error {
            ClusterOperationError::new(Operation::Create, name, step, cause).into()
        };

        let mut refs = Vec::new();
        for spec in &ctx.labels {
            match self
                .labels
                .find_label(&spec.key, &spec.value)
                .await
                .map_err(|e| fail(Step::AttachLabels, e))?
            {
                Some(label) => refs.push(label.reference()),
                None => info!(label = %spec, "Dry run: label would be created"),
            }
        }

        let path = self.secret_path_for(name);
        if replacing {
            info!(path = %path, "Dry run: secret record would be replaced");
        } else {
            self.ensure_no_secret_record(&path)
                .await
                .map_err(|e| fail(Step::StoreSecret, e))?;
        }

        match self
            .runtime
            .get_namespace(&ctx.namespace)
            .await
            .map_err(|e| fail(Step::ProvisionNamespace, Error::runtime(e)))?
        {
            Some(_) => {
                info!(namespace = %ctx.namespace, "Dry run: existing namespace would be adopted")
            }
            None => info!(namespace = %ctx.namespace, "Dry run: namespace would be created"),
        }

        Ok(ContainerCluster {
            href: String::new(),
            name: name.to_string(),
            description: ctx.description.clone(),
            enforcement_mode: ctx.enforcement_mode,
            online: false,
            token: None,
            labels: refs,
            created_at: None,
            updated_at: None,
        })
    }

    /// A record left behind by another cluster must not be overwritten
    async fn ensure_no_secret_record(&self, path: &str) -> Result<(), Error> {
        let existing = self
            .secrets
            .read_secret(path, None)
            .await
            .map_err(Error::secret)?;
        match existing {
            Some(_) => Err(Error::secret(BackendError::Conflict(format!(
                "secret record already exists at {}",
                path
            )))),
            None => Ok(()),
        }
    }

    async fn rollback(&self, progress: &CreateProgress) -> RollbackReport {
        let mut undo: Vec<Resource> = progress.kube_objects.iter().rev().cloned().collect();
        if let Some(path) = &progress.secret_path {
            undo.push(Resource::SecretRecord { path: path.clone() });
        }
        if let Some(href) = &progress.cluster_href {
            undo.push(Resource::PceCluster { href: href.clone() });
        }

        let mut report = RollbackReport::default();
        for resource in undo {
            match self.remove(&resource).await {
                Ok(()) => {
                    debug!(resource = %resource, "Rolled back");
                    report.undone.push(resource);
                }
                Err(e) if e.is_not_found() => report.undone.push(resource),
                Err(e) => {
                    warn!(resource = %resource, error = %e, "Rollback step failed");
                    report.failed.push(RollbackFailure {
                        resource,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    /// One delete call through the owning adapter, which applies its own retry policy
    async fn remove(&self, resource: &Resource) -> Result<(), BackendError> {
        match resource {
            Resource::PceCluster { href } => self.pce.delete_cluster(href).await,
            Resource::SecretRecord { path } => self.secrets.delete_secret(path).await,
            Resource::Namespace { name } => self.runtime.delete_namespace(name).await,
            Resource::ServiceAccount { namespace, name } => {
                self.runtime.delete_service_account(namespace, name).await
            }
            Resource::KubeSecret { namespace, name } => {
                self.runtime.delete_secret(namespace, name).await
            }
        }
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    /// Remove the cluster and everything provisioned for it. Succeeds without
    /// side effects when nothing exists.
    pub async fn delete_cluster(&self, name: &str) -> Result<bool, Error> {
        validate_cluster_name(name)?;

        let span = info_span!("delete_cluster", cluster = %name, op = %Uuid::new_v4());
        let this = self.clone();
        let name = name.to_string();
        let handle = tokio::spawn(
            async move {
                let result = {
                    let _guard = this.locks.acquire(&name).await;
                    this.run_delete(&name).await
                };
                this.locks.prune();
                result
            }
            .instrument(span),
        );

        handle
            .await
            .map_err(|e| Error::Aborted(format!("delete workflow task failed: {}", e)))?
    }

    /// Caller holds the name lock
    async fn run_delete(&self, name: &str) -> Result<bool, Error> {
        let fail = |step: Step, cause: Error, remaining: Vec<Resource>| -> Error {
            ClusterOperationError::new(Operation::Delete, name, step, cause)
                .with_remaining(remaining)
                .into()
        };

        let remaining = self
            .discover(name)
            .await
            .map_err(|e| fail(Step::CheckExisting, e, Vec::new()))?;

        if remaining.is_empty() {
            info!("Nothing to delete");
            return Ok(true);
        }

        for (i, resource) in remaining.iter().enumerate() {
            match self.remove(resource).await {
                Ok(()) => info!(resource = %resource, "Deleted"),
                Err(e) if e.is_not_found() => debug!(resource = %resource, "Already gone"),
                Err(e) => {
                    error!(resource = %resource, error = %e, "Delete failed");
                    let cause = match resource {
                        Resource::PceCluster { .. } => Error::pce(e),
                        Resource::SecretRecord { .. } => Error::secret(e),
                        _ => Error::runtime(e),
                    };
                    return Err(fail(resource.delete_step(), cause, remaining[i..].to_vec()));
                }
            }
        }

        Ok(true)
    }

    /// Existing resources for `name`, in deletion order. Read-only.
    async fn discover(&self, name: &str) -> Result<Vec<Resource>, Error> {
        let cluster = self.pce.find_cluster(name).await.map_err(Error::pce)?;

        let path = self.secret_path_for(name);
        let record = self.secrets.read_secret(&path, None).await.map_err(Error::secret)?;

        let (namespace, service_account) = match record
            .as_ref()
            .map(|r| ClusterSecret::from_data(&r.data))
        {
            Some(Ok(secret)) => (secret.namespace, secret.service_account),
            Some(Err(e)) => {
                warn!(
                    path = %path,
                    error = %e,
                    "Unreadable secret record, using default namespace"
                );
                (self.config.default_namespace.clone(), self.config.service_account.clone())
            }
            None => (self.config.default_namespace.clone(), self.config.service_account.clone()),
        };

        let mut found = Vec::new();

        if let Some(account) = self
            .runtime
            .get_service_account(&namespace, &service_account)
            .await
            .map_err(Error::runtime)?
        {
            if account.is_owned_by(name) {
                found.push(Resource::ServiceAccount {
                    namespace: namespace.clone(),
                    name: service_account.clone(),
                });
            }
        }

        let secret_name = token_secret_name(&service_account);
        if let Some(secret) = self
            .runtime
            .get_secret(&namespace, &secret_name)
            .await
            .map_err(Error::runtime)?
        {
            if secret.is_owned_by(name) {
                found.push(Resource::KubeSecret {
                    namespace: namespace.clone(),
                    name: secret_name,
                });
            }
        }

        if let Some(ns) = self.runtime.get_namespace(&namespace).await.map_err(Error::runtime)? {
            if ns.is_owned_by(name) {
                found.push(Resource::Namespace { name: namespace.clone() });
            } else {
                debug!(
                    namespace = %namespace,
                    "Namespace not created for this cluster, keeping it"
                );
            }
        }

        if record.is_some() {
            found.push(Resource::SecretRecord { path });
        }
        if let Some(cluster) = cluster {
            found.push(Resource::PceCluster { href: cluster.href });
        }

        Ok(found)
    }

    // ------------------------------------------------------------------------
    // Queries and relabel
    // ------------------------------------------------------------------------

    pub async fn get_cluster(&self, name: &str) -> Result<Option<ContainerCluster>, Error> {
        self.pce.find_cluster(name).await.map_err(Error::pce)
    }

    pub async fn list_clusters(&self) -> Result<Vec<ContainerCluster>, Error> {
        self.pce.list_clusters().await.map_err(Error::pce)
    }

    /// Replace the cluster's label set
    pub async fn update_cluster_labels(
        &self,
        name: &str,
        labels: &[LabelSpec],
    ) -> Result<ContainerCluster, Error> {
        validate_cluster_name(name)?;
        validate_labels(labels)?;

        let result = {
            let _guard = self.locks.acquire(name).await;
            self.relabel(name, labels).await
        };
        self.locks.prune();
        result
    }

    async fn relabel(&self, name: &str, labels: &[LabelSpec]) -> Result<ContainerCluster, Error> {
        let mut cluster = self
            .pce
            .find_cluster(name)
            .await
            .map_err(Error::pce)?
            .ok_or_else(|| {
                Error::BackendRejection(BackendError::NotFound(format!("cluster '{}'", name)))
            })?;

        let resolved = self.labels.resolve_all(labels).await?;
        let refs: Vec<LabelRef> = resolved.iter().map(Label::reference).collect();
        self.pce
            .update_cluster(&cluster.href, &ClusterUpdate::labels(refs.clone()))
            .await
            .map_err(Error::pce)?;

        info!(cluster = %name, count = refs.len(), "Updated cluster labels");
        cluster.labels = refs;
        Ok(cluster)
    }
}

/// Objects found under the name this cluster is about to create belong to
/// something else and are never recorded for rollback.
fn ensure_absent(existing: Option<ObjectInfo>, kind: &str, namespace: &str) -> Result<(), Error> {
    match existing {
        Some(object) => Err(Error::runtime(BackendError::Conflict(format!(
            "{} {}/{} already exists",
            kind, namespace, object.name
        )))),
        None => Ok(()),
    }
}
