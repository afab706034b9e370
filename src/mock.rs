//! In-memory backends with call recording and failure injection

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::backend::BackendError;
use crate::pce::{
    ClusterToken, ClusterUpdate, ContainerCluster, EnforcementMode, Label, NewCluster, PceApi,
    WorkloadProfile,
};
use crate::runtime::{ClusterRuntime, ObjectInfo};
use crate::vault::{SecretRecord, SecretStore};

const MUTATING_PREFIXES: [&str; 4] = ["create_", "update_", "delete_", "write_"];

/// Records calls by operation name and hands out queued failures
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<&'static str>>,
    failures: Mutex<HashMap<&'static str, VecDeque<BackendError>>>,
    lost_acks: Mutex<HashMap<&'static str, VecDeque<BackendError>>>,
}

impl Recorder {
    async fn hit(&self, op: &'static str) -> Result<(), BackendError> {
        // let concurrent workflows interleave at every backend call
        tokio::task::yield_now().await;
        self.calls.lock().unwrap().push(op);
        match self.failures.lock().unwrap().get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Error returned after a write has been applied
    fn ack(&self, op: &'static str) -> Result<(), BackendError> {
        match self.lost_acks.lock().unwrap().get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The next `op` takes effect but answers with `err`
    pub fn lose_ack_next(&self, op: &'static str, err: BackendError) {
        self.lost_acks.lock().unwrap().entry(op).or_default().push_back(err);
    }

    pub fn fail_next(&self, op: &'static str, err: BackendError) {
        self.fail_times(op, 1, err);
    }

    pub fn fail_times(&self, op: &'static str, times: usize, err: BackendError) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(err.clone());
        }
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == op).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| MUTATING_PREFIXES.iter().any(|p| c.starts_with(p)))
            .count()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

// ============================================================================
// PCE
// ============================================================================

#[derive(Default)]
struct PceState {
    clusters: Vec<ContainerCluster>,
    labels: Vec<Label>,
    profiles: Vec<(String, WorkloadProfile)>,
    next_id: u64,
}

impl PceState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct FakePce {
    recorder: Recorder,
    state: Mutex<PceState>,
    hidden_label_finds: AtomicUsize,
}

impl Deref for FakePce {
    type Target = Recorder;

    fn deref(&self) -> &Recorder {
        &self.recorder
    }
}

impl FakePce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_label(&self, key: &str, value: &str) -> Label {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let label = Label {
            href: format!("/orgs/1/labels/{}", id),
            key: key.to_string(),
            value: value.to_string(),
            created_at: None,
        };
        state.labels.push(label.clone());
        label
    }

    pub fn seed_cluster(&self, name: &str, online: bool) -> ContainerCluster {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let cluster = ContainerCluster {
            href: format!("/orgs/1/container_clusters/c{}", id),
            name: name.to_string(),
            description: None,
            enforcement_mode: EnforcementMode::VisibilityOnly,
            online,
            token: None,
            labels: Vec::new(),
            created_at: None,
            updated_at: None,
        };
        state.clusters.push(cluster.clone());
        cluster
    }

    /// The next `n` label lookups miss even if the label exists
    pub fn hide_labels_for_next_finds(&self, n: usize) {
        self.hidden_label_finds.store(n, Ordering::SeqCst);
    }

    pub fn cluster(&self, name: &str) -> Option<ContainerCluster> {
        self.state
            .lock()
            .unwrap()
            .clusters
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn cluster_count(&self) -> usize {
        self.state.lock().unwrap().clusters.len()
    }

    pub fn label_count(&self) -> usize {
        self.state.lock().unwrap().labels.len()
    }

    pub fn profiles(&self) -> Vec<WorkloadProfile> {
        self.state
            .lock()
            .unwrap()
            .profiles
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl PceApi for FakePce {
    async fn find_cluster(&self, name: &str) -> Result<Option<ContainerCluster>, BackendError> {
        self.hit("find_cluster").await?;
        Ok(self.cluster(name))
    }

    async fn list_clusters(&self) -> Result<Vec<ContainerCluster>, BackendError> {
        self.hit("list_clusters").await?;
        Ok(self.state.lock().unwrap().clusters.clone())
    }

    async fn create_cluster(&self, cluster: &NewCluster) -> Result<ContainerCluster, BackendError> {
        self.hit("create_cluster").await?;
        let mut state = self.state.lock().unwrap();
        if state.clusters.iter().any(|c| c.name == cluster.name) {
            return Err(BackendError::Conflict(format!("cluster {}", cluster.name)));
        }
        let id = state.next_id();
        let created = ContainerCluster {
            href: format!("/orgs/1/container_clusters/c{}", id),
            name: cluster.name.clone(),
            description: cluster.description.clone(),
            enforcement_mode: cluster.enforcement_mode,
            online: false,
            token: None,
            labels: Vec::new(),
            created_at: None,
            updated_at: None,
        };
        state.clusters.push(created.clone());
        self.ack("create_cluster")?;
        Ok(ContainerCluster {
            token: Some(ClusterToken::new(format!("1_token{}", id))),
            ..created
        })
    }

    async fn update_cluster(&self, href: &str, update: &ClusterUpdate) -> Result<(), BackendError> {
        self.hit("update_cluster").await?;
        let mut state = self.state.lock().unwrap();
        let cluster = state
            .clusters
            .iter_mut()
            .find(|c| c.href == href)
            .ok_or_else(|| BackendError::NotFound(href.to_string()))?;
        if let Some(labels) = &update.labels {
            cluster.labels = labels.clone();
        }
        if let Some(online) = update.online {
            cluster.online = online;
        }
        if let Some(description) = &update.description {
            cluster.description = Some(description.clone());
        }
        Ok(())
    }

    async fn delete_cluster(&self, href: &str) -> Result<(), BackendError> {
        self.hit("delete_cluster").await?;
        let mut state = self.state.lock().unwrap();
        let before = state.clusters.len();
        state.clusters.retain(|c| c.href != href);
        if state.clusters.len() == before {
            return Err(BackendError::NotFound(href.to_string()));
        }
        state.profiles.retain(|(owner, _)| owner != href);
        Ok(())
    }

    async fn find_label(&self, key: &str, value: &str) -> Result<Option<Label>, BackendError> {
        self.hit("find_label").await?;
        let hidden = self
            .hidden_label_finds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if hidden.is_ok() {
            return Ok(None);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .labels
            .iter()
            .find(|l| l.key == key && l.value == value)
            .cloned())
    }

    async fn create_label(&self, key: &str, value: &str) -> Result<Label, BackendError> {
        self.hit("create_label").await?;
        let mut state = self.state.lock().unwrap();
        if state.labels.iter().any(|l| l.key == key && l.value == value) {
            return Err(BackendError::Conflict(format!("label {}={}", key, value)));
        }
        let id = state.next_id();
        let label = Label {
            href: format!("/orgs/1/labels/{}", id),
            key: key.to_string(),
            value: value.to_string(),
            created_at: None,
        };
        state.labels.push(label.clone());
        Ok(label)
    }

    async fn create_workload_profile(
        &self,
        cluster_href: &str,
        profile: &WorkloadProfile,
    ) -> Result<WorkloadProfile, BackendError> {
        self.hit("create_workload_profile").await?;
        let mut state = self.state.lock().unwrap();
        if !state.clusters.iter().any(|c| c.href == cluster_href) {
            return Err(BackendError::NotFound(cluster_href.to_string()));
        }
        let id = state.next_id();
        let created = WorkloadProfile {
            href: format!("{}/container_workload_profiles/p{}", cluster_href, id),
            ..profile.clone()
        };
        state.profiles.push((cluster_href.to_string(), created.clone()));
        Ok(created)
    }
}

// ============================================================================
// Secret store
// ============================================================================

#[derive(Default)]
pub struct FakeSecretStore {
    recorder: Recorder,
    secrets: Mutex<BTreeMap<String, (u64, Map<String, Value>)>>,
}

impl Deref for FakeSecretStore {
    type Target = Recorder;

    fn deref(&self) -> &Recorder {
        &self.recorder
    }
}

impl FakeSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.secrets.lock().unwrap().contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<Map<String, Value>> {
        self.secrets.lock().unwrap().get(path).map(|(_, d)| d.clone())
    }

    pub fn seed(&self, path: &str, data: Map<String, Value>) {
        self.secrets.lock().unwrap().insert(path.to_string(), (1, data));
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().unwrap().len()
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn read_secret(
        &self,
        path: &str,
        _version: Option<u64>,
    ) -> Result<Option<SecretRecord>, BackendError> {
        self.hit("read_secret").await?;
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .get(path)
            .map(|(version, data)| SecretRecord {
                path: path.to_string(),
                version: *version,
                data: data.clone(),
                created_time: None,
            }))
    }

    async fn write_secret(
        &self,
        path: &str,
        data: &Map<String, Value>,
        cas: Option<u64>,
    ) -> Result<u64, BackendError> {
        self.hit("write_secret").await?;
        let mut secrets = self.secrets.lock().unwrap();
        let current = secrets.get(path).map(|(v, _)| *v).unwrap_or(0);
        if let Some(expected) = cas {
            if expected != current {
                return Err(BackendError::Conflict(
                    "check-and-set parameter did not match the current version".to_string(),
                ));
            }
        }
        secrets.insert(path.to_string(), (current + 1, data.clone()));
        self.ack("write_secret")?;
        Ok(current + 1)
    }

    async fn delete_secret(&self, path: &str) -> Result<(), BackendError> {
        self.hit("delete_secret").await?;
        self.secrets.lock().unwrap().remove(path);
        Ok(())
    }

    async fn list_secrets(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        self.hit("list_secrets").await?;
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

// ============================================================================
// Cluster runtime
// ============================================================================

type Labels = BTreeMap<String, String>;
type ObjectKey = (String, String);

#[derive(Default)]
struct RuntimeState {
    namespaces: BTreeMap<String, Labels>,
    service_accounts: BTreeMap<ObjectKey, (Labels, String)>,
    secrets: BTreeMap<ObjectKey, (Labels, BTreeMap<String, String>)>,
}

#[derive(Default)]
pub struct FakeRuntime {
    recorder: Recorder,
    state: Mutex<RuntimeState>,
}

impl Deref for FakeRuntime {
    type Target = Recorder;

    fn deref(&self) -> &Recorder {
        &self.recorder
    }
}

fn key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_namespace(&self, name: &str, labels: Labels) {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .insert(name.to_string(), labels);
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().unwrap().namespaces.contains_key(name)
    }

    pub fn has_service_account(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .service_accounts
            .contains_key(&key(namespace, name))
    }

    pub fn secret_data(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(&key(namespace, name))
            .map(|(_, data)| data.clone())
    }

    /// Namespaces, service accounts and secrets combined
    pub fn object_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.namespaces.len() + state.service_accounts.len() + state.secrets.len()
    }

    fn require_namespace(state: &RuntimeState, namespace: &str) -> Result<(), BackendError> {
        if state.namespaces.contains_key(namespace) {
            Ok(())
        } else {
            Err(BackendError::NotFound(format!("namespace {}", namespace)))
        }
    }
}

#[async_trait]
impl ClusterRuntime for FakeRuntime {
    async fn get_namespace(&self, name: &str) -> Result<Option<ObjectInfo>, BackendError> {
        self.hit("get_namespace").await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .namespaces
            .get(name)
            .map(|labels| ObjectInfo {
                name: name.to_string(),
                labels: labels.clone(),
            }))
    }

    async fn create_namespace(&self, name: &str, labels: &Labels) -> Result<(), BackendError> {
        self.hit("create_namespace").await?;
        let mut state = self.state.lock().unwrap();
        if state.namespaces.contains_key(name) {
            return Err(BackendError::Conflict(format!("namespace {}", name)));
        }
        state.namespaces.insert(name.to_string(), labels.clone());
        self.ack("create_namespace")
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), BackendError> {
        self.hit("delete_namespace").await?;
        let mut state = self.state.lock().unwrap();
        if state.namespaces.remove(name).is_none() {
            return Err(BackendError::NotFound(format!("namespace {}", name)));
        }
        state.service_accounts.retain(|(ns, _), _| ns != name);
        state.secrets.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObjectInfo>, BackendError> {
        self.hit("get_service_account").await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .service_accounts
            .get(&key(namespace, name))
            .map(|(labels, _)| ObjectInfo {
                name: name.to_string(),
                labels: labels.clone(),
            }))
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        name: &str,
        secret_name: &str,
        labels: &Labels,
    ) -> Result<(), BackendError> {
        self.hit("create_service_account").await?;
        let mut state = self.state.lock().unwrap();
        Self::require_namespace(&state, namespace)?;
        if state.service_accounts.contains_key(&key(namespace, name)) {
            return Err(BackendError::Conflict(format!("service account {}/{}", namespace, name)));
        }
        state
            .service_accounts
            .insert(key(namespace, name), (labels.clone(), secret_name.to_string()));
        self.ack("create_service_account")
    }

    async fn delete_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), BackendError> {
        self.hit("delete_service_account").await?;
        self.state
            .lock()
            .unwrap()
            .service_accounts
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| {
                BackendError::NotFound(format!("service account {}/{}", namespace, name))
            })
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ObjectInfo>, BackendError> {
        self.hit("get_secret").await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .secrets
            .get(&key(namespace, name))
            .map(|(labels, _)| ObjectInfo {
                name: name.to_string(),
                labels: labels.clone(),
            }))
    }

    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
        labels: &Labels,
    ) -> Result<(), BackendError> {
        self.hit("create_secret").await?;
        let mut state = self.state.lock().unwrap();
        Self::require_namespace(&state, namespace)?;
        if state.secrets.contains_key(&key(namespace, name)) {
            return Err(BackendError::Conflict(format!("secret {}/{}", namespace, name)));
        }
        state
            .secrets
            .insert(key(namespace, name), (labels.clone(), data.clone()));
        self.ack("create_secret")
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), BackendError> {
        self.hit("delete_secret").await?;
        self.state
            .lock()
            .unwrap()
            .secrets
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("secret {}/{}", namespace, name)))
    }
}
