//! 部署动作
//!
//! 把一批渲染好的资源对象按顺序收敛到集群：查询当前状态、处理非托管标记、
//! 根据模式执行 create/patch/apply、调用合并策略、设置控制器引用并维护缓存。
//! 任意一个对象失败都会立即中止整批处理。

use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stratus_common::gvk::CUSTOM_RESOURCE_DEFINITION;
use stratus_common::metadata::{
    ANNOTATION_INSTANCE_GENERATION, ANNOTATION_INSTANCE_NAME, ANNOTATION_INSTANCE_UID,
    ANNOTATION_MANAGED, ANNOTATION_PLATFORM_TYPE, ANNOTATION_PLATFORM_VERSION, LABEL_PART_OF,
    LABEL_PLATFORM, MANAGED_FALSE, PLATFORM_FIELD_OWNER,
};
use stratus_common::{error::ignore_not_found, resources, Error, Gvk, Result};
use tracing::{debug, info};

use crate::cache::{cache_key, ResourceCache};
use crate::client::WriteParams;
use crate::merge::apply_merge_policy;
use crate::metrics;
use crate::ownership::{remove_owner_references, set_controller_reference, OwnerSelector};
use crate::request::ReconciliationRequest;

/// 部署模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// server-side apply
    #[default]
    Apply,
    /// 对已存在对象发送 apply 类型补丁，不存在时创建
    Patch,
}

/// 部署动作
#[derive(Debug, Clone, Default)]
pub struct DeployAction {
    field_owner: Option<String>,
    mode: DeployMode,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    cache: Option<ResourceCache>,
    legacy_owners: Vec<OwnerSelector>,
}

impl DeployAction {
    /// 创建默认的部署动作（apply 模式、无缓存）
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置字段所有者，默认为实例类型的小写形式
    pub fn with_field_owner(mut self, value: impl Into<String>) -> Self {
        self.field_owner = Some(value.into());
        self
    }

    /// 设置部署模式
    pub fn with_mode(mut self, mode: DeployMode) -> Self {
        self.mode = mode;
        self
    }

    /// 为所有对象添加标签
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    /// 为所有对象添加注解
    pub fn with_annotation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(name.into(), value.into());
        self
    }

    /// 启用缓存，缓存可以在多个控制器之间共享
    pub fn with_cache(mut self, cache: ResourceCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 查询当前对象后移除指向这些遗留所有者的引用
    pub fn with_legacy_owners(mut self, owners: Vec<OwnerSelector>) -> Self {
        self.legacy_owners = owners;
        self
    }

    /// 收敛请求中的全部资源，返回实际写入的对象数
    pub async fn run(&self, rr: &ReconciliationRequest) -> Result<usize> {
        if let Some(cache) = &self.cache {
            cache.sync().await;
        }

        let controller = rr.instance.kind.to_lowercase();
        let mut written = 0;

        for obj in &rr.resources {
            let deployed = self.deploy(rr, obj.clone()).await.map_err(|e| {
                let gvk = Gvk::of(obj).map(|g| g.to_string()).unwrap_or_default();
                Error::deploy(gvk, resources::namespaced_name(obj), e)
            })?;

            if deployed {
                metrics::record_deployed(&controller);
                written += 1;
            }
        }

        debug!(
            controller = %controller,
            total = rr.resources.len(),
            written,
            "部署动作完成"
        );
        Ok(written)
    }

    async fn deploy(&self, rr: &ReconciliationRequest, mut obj: DynamicObject) -> Result<bool> {
        let gvk = Gvk::of(&obj)?;
        let mut current = self.lookup(rr, &gvk, &obj).await?;

        if !self.legacy_owners.is_empty() {
            if let Some(mut existing) = current.take() {
                let removed = remove_owner_references(rr.client.as_ref(), &mut existing, |r| {
                    self.legacy_owners.iter().any(|s| s.matches(r))
                })
                .await;
                current = match removed {
                    Ok(_) => Some(existing),
                    Err(e) if e.is_not_found() => {
                        debug!(object = %resources::format_object(&existing), "对象已被删除，按不存在处理");
                        None
                    }
                    Err(e) => return Err(e),
                };
            }
        }

        if let Some(current) = &current {
            if resources::has_annotation(current, ANNOTATION_MANAGED, &[MANAGED_FALSE]) {
                debug!(object = %resources::format_object(current), "对象已标记为非托管，跳过");
                return Ok(false);
            }
        }

        let is_crd = gvk.is(CUSTOM_RESOURCE_DEFINITION);
        let field_owner = if is_crd {
            PLATFORM_FIELD_OWNER.to_string()
        } else {
            self.field_owner
                .clone()
                .unwrap_or_else(|| rr.instance.kind.to_lowercase())
        };

        self.stamp(rr, &mut obj, &field_owner);
        if is_crd {
            resources::set_label(&mut obj, LABEL_PLATFORM, "true");
        }

        let original = obj.clone();

        if let (Some(cache), Some(current)) = (&self.cache, &current) {
            if cache.has(&cache_key(current, &obj)?).await {
                debug!(object = %resources::format_object(&obj), "缓存命中，跳过写入");
                return Ok(false);
            }
        }

        let params = WriteParams::forced(field_owner);
        let (deployed_obj, deployed) =
            if resources::has_annotation(&obj, ANNOTATION_MANAGED, &[MANAGED_FALSE]) {
                resources::remove_annotation(&mut obj, ANNOTATION_MANAGED);
                self.create(rr, obj, &params).await?
            } else {
                if !is_crd && rr.manager.owns(&gvk) {
                    set_controller_reference(&rr.instance, &mut obj)?;
                }
                match self.mode {
                    DeployMode::Patch => self.patch(rr, obj, current.as_ref(), &params).await?,
                    DeployMode::Apply => self.apply(rr, obj, current.as_ref(), &params).await?,
                }
            };

        if let Some(cache) = &self.cache {
            if deployed {
                cache.add(cache_key(&deployed_obj, &original)?).await;
            }
        }

        Ok(deployed)
    }

    /// 写入簿记注解与标签
    fn stamp(&self, rr: &ReconciliationRequest, obj: &mut DynamicObject, field_owner: &str) {
        resources::set_labels(obj, &self.labels);
        resources::set_annotations(obj, &self.annotations);
        resources::set_annotation(
            obj,
            ANNOTATION_INSTANCE_GENERATION,
            &rr.instance.generation.to_string(),
        );
        resources::set_annotation(obj, ANNOTATION_INSTANCE_NAME, &rr.instance.name);
        resources::set_annotation(obj, ANNOTATION_INSTANCE_UID, &rr.instance.uid);
        resources::set_annotation(obj, ANNOTATION_PLATFORM_TYPE, &rr.release.name);
        resources::set_annotation(obj, ANNOTATION_PLATFORM_VERSION, &rr.release.version);

        let part_of_unset = resources::get_label(obj, LABEL_PART_OF).map_or(true, |v| v.is_empty());
        if part_of_unset && !field_owner.is_empty() {
            resources::set_label(obj, LABEL_PART_OF, field_owner);
        }
    }

    async fn lookup(
        &self,
        rr: &ReconciliationRequest,
        gvk: &Gvk,
        obj: &DynamicObject,
    ) -> Result<Option<DynamicObject>> {
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::structural("metadata.name", "object has no name"))?;
        ignore_not_found(
            rr.client
                .get(gvk, obj.metadata.namespace.as_deref(), name)
                .await,
        )
    }

    /// 仅在对象不存在时创建，已存在视为成功但不算作写入
    async fn create(
        &self,
        rr: &ReconciliationRequest,
        obj: DynamicObject,
        params: &WriteParams,
    ) -> Result<(DynamicObject, bool)> {
        debug!(object = %resources::format_object(&obj), "create");
        match rr.client.create(&obj, params).await {
            Ok(created) => Ok((created, true)),
            Err(e) if e.is_already_exists() => Ok((obj, false)),
            Err(e) => Err(e),
        }
    }

    async fn patch(
        &self,
        rr: &ReconciliationRequest,
        mut obj: DynamicObject,
        current: Option<&DynamicObject>,
        params: &WriteParams,
    ) -> Result<(DynamicObject, bool)> {
        debug!(object = %resources::format_object(&obj), "patch");
        apply_merge_policy(DeployMode::Patch, current, &mut obj)?;

        let result = match current {
            None => rr.client.create(&obj, params).await,
            Some(current) => rr.client.patch(current, &obj, params).await,
        };
        tolerate_races(result, obj)
    }

    async fn apply(
        &self,
        rr: &ReconciliationRequest,
        mut obj: DynamicObject,
        current: Option<&DynamicObject>,
        params: &WriteParams,
    ) -> Result<(DynamicObject, bool)> {
        debug!(object = %resources::format_object(&obj), "apply");
        apply_merge_policy(DeployMode::Apply, current, &mut obj)?;

        let (applied, deployed) = tolerate_races(rr.client.apply(&obj, params).await, obj)?;
        if deployed && current.is_none() {
            info!(object = %resources::format_object(&applied), "已创建对象");
        }
        Ok((applied, deployed))
    }
}

/// 查询与写入之间对象被并发删除或创建时，视为未写入而不是失败
fn tolerate_races(
    result: Result<DynamicObject>,
    obj: DynamicObject,
) -> Result<(DynamicObject, bool)> {
    match result {
        Ok(written) => Ok((written, true)),
        Err(e) if e.is_not_found() || e.is_already_exists() => {
            debug!(object = %resources::format_object(&obj), "写入时发生并发变更: {}", e);
            Ok((obj, false))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeClusterClient;
    use crate::client::ClusterClient;
    use crate::crd::Release;
    use crate::request::{InstanceRef, OwnedKinds};
    use rstest::rstest;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    fn instance(kind: &str) -> InstanceRef {
        InstanceRef {
            api_version: "components.platform.stratus.io/v1alpha1".into(),
            kind: kind.into(),
            name: "default-dashboard".into(),
            namespace: None,
            uid: "d-uid".into(),
            generation: 2,
        }
    }

    fn request(client: &Arc<FakeClusterClient>, resources: Vec<DynamicObject>) -> ReconciliationRequest {
        ReconciliationRequest {
            client: client.clone(),
            instance: instance("Dashboard"),
            resources,
            release: Release {
                name: "stratus".into(),
                version: "1.2.0".into(),
            },
            manager: Arc::new(OwnedKinds::new([
                ("", "ConfigMap"),
                ("apps", "Deployment"),
                ("rbac.authorization.k8s.io", "ClusterRole"),
            ])),
        }
    }

    fn object(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn config_map(value: &str) -> DynamicObject {
        object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "settings", "namespace": "stratus" },
            "data": { "key": value }
        }))
    }

    fn deployment(replicas: i64, cpu: &str) -> DynamicObject {
        object(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "server", "namespace": "stratus" },
            "spec": {
                "replicas": replicas,
                "template": { "spec": { "containers": [{
                    "name": "server",
                    "image": "stratus/server:1",
                    "resources": { "requests": { "cpu": cpu } }
                }] } }
            }
        }))
    }

    fn action(cached: bool) -> DeployAction {
        let action = DeployAction::new();
        if cached {
            action.with_cache(ResourceCache::default())
        } else {
            action
        }
    }

    fn stored_config_map(client: &FakeClusterClient) -> DynamicObject {
        client
            .object(&Gvk::new("", "v1", "ConfigMap"), Some("stratus"), "settings")
            .unwrap()
    }

    #[rstest]
    #[case::cached(true, 1)]
    #[case::uncached(false, 2)]
    #[tokio::test]
    async fn test_repeated_deploy_is_idempotent(#[case] cached: bool, #[case] writes: usize) {
        let client = Arc::new(FakeClusterClient::new());
        let action = action(cached);
        let rr = request(&client, vec![config_map("a")]);

        assert_eq!(action.run(&rr).await.unwrap(), 1);
        let first = stored_config_map(&client).metadata.resource_version;

        action.run(&rr).await.unwrap();
        assert_eq!(client.writes(), writes);
        assert_eq!(stored_config_map(&client).metadata.resource_version, first);
    }

    #[tokio::test]
    async fn test_external_change_forces_write() {
        let client = Arc::new(FakeClusterClient::new());
        let action = action(true);
        let rr = request(&client, vec![config_map("a")]);

        action.run(&rr).await.unwrap();
        let mut edited = stored_config_map(&client);
        edited.data["data"] = json!({ "key": "edited" });
        client.seed(edited);

        assert_eq!(action.run(&rr).await.unwrap(), 1);
        assert_eq!(client.writes(), 2);
        assert_eq!(stored_config_map(&client).data["data"]["key"], "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entry_expires() {
        let client = Arc::new(FakeClusterClient::new());
        let action = DeployAction::new().with_cache(ResourceCache::new(Duration::from_secs(60)));
        let rr = request(&client, vec![config_map("a")]);

        action.run(&rr).await.unwrap();
        action.run(&rr).await.unwrap();
        assert_eq!(client.writes(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        action.run(&rr).await.unwrap();
        assert_eq!(client.writes(), 2);
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    #[tokio::test]
    async fn test_unmanaged_current_is_skipped(#[case] cached: bool) {
        let client = Arc::new(FakeClusterClient::new());
        let mut current = config_map("user");
        resources::set_annotation(&mut current, ANNOTATION_MANAGED, MANAGED_FALSE);
        let seeded = client.seed(current);

        let rr = request(&client, vec![config_map("operator")]);
        assert_eq!(action(cached).run(&rr).await.unwrap(), 0);

        let stored = stored_config_map(&client);
        assert_eq!(client.writes(), 0);
        assert_eq!(stored.data["data"]["key"], "user");
        assert!(stored.metadata.owner_references.is_none());
        assert_eq!(stored.metadata.resource_version, seeded.metadata.resource_version);
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    #[tokio::test]
    async fn test_unmanaged_desired_is_created_once(#[case] cached: bool) {
        let client = Arc::new(FakeClusterClient::new());
        let mut desired = config_map("initial");
        resources::set_annotation(&mut desired, ANNOTATION_MANAGED, MANAGED_FALSE);
        let action = action(cached);
        let rr = request(&client, vec![desired]);

        assert_eq!(action.run(&rr).await.unwrap(), 1);
        let stored = stored_config_map(&client);
        assert!(!resources::has_annotation(&stored, ANNOTATION_MANAGED, &[]));

        let mut edited = stored;
        edited.data["data"] = json!({ "key": "user" });
        client.seed(edited);

        assert_eq!(action.run(&rr).await.unwrap(), 0);
        assert_eq!(client.writes(), 1);
        assert_eq!(stored_config_map(&client).data["data"]["key"], "user");
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    #[tokio::test]
    async fn test_patch_mode_preserves_replicas(#[case] cached: bool) {
        let client = Arc::new(FakeClusterClient::new());
        client.seed(deployment(3, "2"));

        let rr = request(&client, vec![deployment(1, "1")]);
        action(cached)
            .with_mode(DeployMode::Patch)
            .run(&rr)
            .await
            .unwrap();

        let live = client
            .object(&Gvk::new("apps", "v1", "Deployment"), Some("stratus"), "server")
            .unwrap();
        assert_eq!(live.data["spec"]["replicas"], json!(3));

        let bodies = client.bodies();
        let body = bodies.last().unwrap();
        assert!(body["spec"].get("replicas").is_none());
        assert!(body["spec"]["template"]["spec"]["containers"][0]
            .get("resources")
            .is_none());
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    #[tokio::test]
    async fn test_apply_mode_keeps_live_resources(#[case] cached: bool) {
        let client = Arc::new(FakeClusterClient::new());
        client.seed(deployment(3, "2"));

        let rr = request(&client, vec![deployment(1, "1")]);
        action(cached).run(&rr).await.unwrap();

        let live = client
            .object(&Gvk::new("apps", "v1", "Deployment"), Some("stratus"), "server")
            .unwrap();
        assert_eq!(live.data["spec"]["replicas"], json!(3));
        assert_eq!(
            live.data["spec"]["template"]["spec"]["containers"][0]["resources"],
            json!({ "requests": { "cpu": "2" } })
        );
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    #[tokio::test]
    async fn test_aggregated_cluster_role_has_no_rules(#[case] cached: bool) {
        let client = Arc::new(FakeClusterClient::new());
        let role = object(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1",
            "kind": "ClusterRole",
            "metadata": { "name": "stratus-view" },
            "aggregationRule": { "clusterRoleSelectors": [{ "matchLabels": { "view": "true" } }] },
            "rules": []
        }));
        action(cached).run(&request(&client, vec![role])).await.unwrap();

        let live = client
            .object(
                &Gvk::new("rbac.authorization.k8s.io", "v1", "ClusterRole"),
                None,
                "stratus-view",
            )
            .unwrap();
        assert!(live.data.get("rules").is_none());
        assert!(live.data.get("aggregationRule").is_some());
    }

    #[test_log::test(tokio::test)]
    async fn test_stamps_bookkeeping_metadata() {
        let client = Arc::new(FakeClusterClient::new());
        let secret = object(json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": { "name": "token", "namespace": "stratus" }
        }));
        let rr = request(&client, vec![config_map("a"), secret]);
        DeployAction::new()
            .with_label("team", "platform")
            .with_annotation("note", "rendered")
            .run(&rr)
            .await
            .unwrap();

        let stored = stored_config_map(&client);
        let annotations = stored.metadata.annotations.clone().unwrap();
        assert_eq!(annotations[ANNOTATION_INSTANCE_GENERATION], "2");
        assert_eq!(annotations[ANNOTATION_INSTANCE_NAME], "default-dashboard");
        assert_eq!(annotations[ANNOTATION_INSTANCE_UID], "d-uid");
        assert_eq!(annotations[ANNOTATION_PLATFORM_TYPE], "stratus");
        assert_eq!(annotations[ANNOTATION_PLATFORM_VERSION], "1.2.0");
        assert_eq!(annotations["note"], "rendered");

        let labels = stored.metadata.labels.clone().unwrap();
        assert_eq!(labels[LABEL_PART_OF], "dashboard");
        assert_eq!(labels["team"], "platform");

        let owners = stored.metadata.owner_references.unwrap();
        assert_eq!(owners[0].uid, "d-uid");
        assert_eq!(owners[0].controller, Some(true));

        let secret = client
            .object(&Gvk::new("", "v1", "Secret"), Some("stratus"), "token")
            .unwrap();
        assert!(secret.metadata.owner_references.is_none());
        assert_eq!(client.field_owners(), vec!["dashboard", "dashboard"]);
    }

    #[tokio::test]
    async fn test_crd_uses_platform_field_owner() {
        let client = Arc::new(FakeClusterClient::new());
        let crd = object(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": { "name": "dashboards.components.platform.stratus.io" },
            "spec": { "group": "components.platform.stratus.io" }
        }));
        let mut rr = request(&client, vec![crd]);
        rr.manager = Arc::new(OwnedKinds::new([("apiextensions.k8s.io", "CustomResourceDefinition")]));
        DeployAction::new()
            .with_field_owner("dashboard-controller")
            .run(&rr)
            .await
            .unwrap();

        let live = client
            .object(
                &Gvk::new("apiextensions.k8s.io", "v1", "CustomResourceDefinition"),
                None,
                "dashboards.components.platform.stratus.io",
            )
            .unwrap();
        assert!(live.metadata.owner_references.is_none());
        assert!(resources::has_label(&live, LABEL_PLATFORM, &["true"]));
        assert!(resources::has_label(&live, LABEL_PART_OF, &[PLATFORM_FIELD_OWNER]));
        assert_eq!(client.field_owners(), vec![PLATFORM_FIELD_OWNER]);
    }

    #[tokio::test]
    async fn test_failure_aborts_batch() {
        let client = Arc::new(FakeClusterClient::new());
        client.fail_on("apply", "ConfigMap");
        let rr = request(&client, vec![config_map("a"), deployment(1, "1")]);

        let err = action(false).run(&rr).await.unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("failure deploying v1, Kind=ConfigMap stratus/settings"));
        assert!(client
            .object(&Gvk::new("apps", "v1", "Deployment"), Some("stratus"), "server")
            .is_none());
    }

    #[tokio::test]
    async fn test_legacy_owner_removed_on_lookup() {
        let client = Arc::new(FakeClusterClient::new());
        let mut current = config_map("a");
        current.metadata.owner_references = Some(vec![
            k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                api_version: "legacy.stratus.io/v1".into(),
                kind: "Cluster".into(),
                name: "old".into(),
                uid: "legacy-uid".into(),
                controller: Some(true),
                ..Default::default()
            },
        ]);
        client.seed(current);

        let rr = request(&client, vec![config_map("a")]);
        DeployAction::new()
            .with_legacy_owners(vec![OwnerSelector::kind("legacy.stratus.io", "Cluster")])
            .run(&rr)
            .await
            .unwrap();

        let owners = stored_config_map(&client).metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, "d-uid");
    }

    /// 在查询之后模拟并发变更的客户端
    struct RacingClient {
        inner: FakeClusterClient,
        target: &'static str,
        deleted_after_lookup: bool,
    }

    #[async_trait::async_trait]
    impl ClusterClient for RacingClient {
        async fn get(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<DynamicObject> {
            if name != self.target {
                return self.inner.get(gvk, namespace, name).await;
            }
            if self.deleted_after_lookup {
                let found = self.inner.get(gvk, namespace, name).await?;
                self.inner.delete(gvk, namespace, name).await?;
                Ok(found)
            } else {
                Err(Error::NotFound {
                    gvk: gvk.to_string(),
                    name: name.to_string(),
                })
            }
        }

        async fn list(
            &self,
            gvk: &Gvk,
            namespace: Option<&str>,
            label_selector: Option<&str>,
        ) -> Result<Vec<DynamicObject>> {
            self.inner.list(gvk, namespace, label_selector).await
        }

        async fn create(&self, obj: &DynamicObject, params: &WriteParams) -> Result<DynamicObject> {
            self.inner.create(obj, params).await
        }

        async fn patch(
            &self,
            current: &DynamicObject,
            body: &DynamicObject,
            params: &WriteParams,
        ) -> Result<DynamicObject> {
            self.inner.patch(current, body, params).await
        }

        async fn apply(&self, obj: &DynamicObject, params: &WriteParams) -> Result<DynamicObject> {
            self.inner.apply(obj, params).await
        }

        async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject> {
            self.inner.replace(obj).await
        }

        async fn delete(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<()> {
            self.inner.delete(gvk, namespace, name).await
        }

        async fn patch_status(
            &self,
            gvk: &Gvk,
            namespace: Option<&str>,
            name: &str,
            status: &Value,
        ) -> Result<DynamicObject> {
            self.inner.patch_status(gvk, namespace, name, status).await
        }
    }

    fn named_config_map(name: &str) -> DynamicObject {
        object(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "stratus" },
            "data": { "key": "value" }
        }))
    }

    fn racing_request(client: Arc<RacingClient>) -> ReconciliationRequest {
        let mut rr = request(
            &Arc::new(FakeClusterClient::new()),
            vec![named_config_map("a"), named_config_map("b")],
        );
        rr.client = client;
        rr
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    #[tokio::test]
    async fn test_deleted_after_lookup_does_not_abort_batch(#[case] cached: bool) {
        let client = Arc::new(RacingClient {
            inner: FakeClusterClient::new(),
            target: "a",
            deleted_after_lookup: true,
        });
        client.inner.seed(named_config_map("a"));
        client.inner.seed(named_config_map("b"));
        let rr = racing_request(client.clone());

        let written = action(cached)
            .with_mode(DeployMode::Patch)
            .run(&rr)
            .await
            .unwrap();
        assert_eq!(written, 1);

        let gvk = Gvk::new("", "v1", "ConfigMap");
        assert!(client.inner.object(&gvk, Some("stratus"), "a").is_none());
        let b = client.inner.object(&gvk, Some("stratus"), "b").unwrap();
        assert!(resources::has_annotation(&b, ANNOTATION_INSTANCE_UID, &["d-uid"]));
    }

    #[tokio::test]
    async fn test_created_after_lookup_is_not_a_failure() {
        let client = Arc::new(RacingClient {
            inner: FakeClusterClient::new(),
            target: "a",
            deleted_after_lookup: false,
        });
        client.inner.seed(named_config_map("a"));
        let rr = racing_request(client.clone());

        let written = DeployAction::new()
            .with_mode(DeployMode::Patch)
            .run(&rr)
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert!(client
            .inner
            .object(&Gvk::new("", "v1", "ConfigMap"), Some("stratus"), "b")
            .is_some());
    }

    #[tokio::test]
    async fn test_owner_cleanup_failure_is_wrapped_once() {
        let client = Arc::new(FakeClusterClient::new());
        let mut current = config_map("a");
        current.metadata.owner_references = Some(vec![
            k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                api_version: "legacy.stratus.io/v1".into(),
                kind: "Cluster".into(),
                name: "old".into(),
                uid: "legacy-uid".into(),
                ..Default::default()
            },
        ]);
        client.seed(current);
        client.fail_on("replace", "ConfigMap");

        let rr = request(&client, vec![config_map("a")]);
        let err = DeployAction::new()
            .with_legacy_owners(vec![OwnerSelector::kind("legacy.stratus.io", "Cluster")])
            .run(&rr)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert_eq!(message.matches("failure deploying").count(), 1);
        assert!(message.contains("injected replace failure for ConfigMap"));
    }

    #[tokio::test]
    async fn test_written_objects_are_counted() {
        let client = Arc::new(FakeClusterClient::new());
        let mut rr = request(&client, vec![config_map("a")]);
        rr.instance = instance("CounterProbe");
        let counter = metrics::DEPLOYED_RESOURCES.with_label_values(&["counterprobe"]);
        let before = counter.get();

        let action = action(true);
        action.run(&rr).await.unwrap();
        action.run(&rr).await.unwrap();
        assert_eq!(counter.get() - before, 1);
    }
}
