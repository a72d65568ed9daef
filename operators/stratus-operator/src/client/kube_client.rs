//! 基于 kube-rs 的集群客户端实现

use async_trait::async_trait;
use kube::{
    api::{
        Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
    },
    client::Client,
    ResourceExt,
};
use serde_json::{json, Value};
use stratus_common::{resources, Error, Gvk, Result};
use tracing::debug;

use super::{ClusterClient, WriteParams};

/// kube-rs 客户端包装
#[derive(Clone)]
pub struct KubeClusterClient {
    /// Kubernetes 客户端
    client: Client,
}

impl KubeClusterClient {
    /// 创建新的集群客户端
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, gvk: &Gvk, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = ApiResource::from_gvk(&gvk.to_kube());
        match namespace {
            Some(ns) if !ns.is_empty() => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn api_for(&self, obj: &DynamicObject) -> Result<(Gvk, Api<DynamicObject>)> {
        let gvk = Gvk::of(obj)?;
        let api = self.api(&gvk, obj.metadata.namespace.as_deref());
        Ok((gvk, api))
    }
}

/// 将 kube-rs 错误映射为可区分的错误变体
fn map_error(err: kube::Error, gvk: &Gvk, name: &str) -> Error {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound {
            gvk: gvk.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            Error::AlreadyExists {
                gvk: gvk.to_string(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(resp) => Error::Api {
            code: resp.code,
            reason: resp.reason,
            message: resp.message,
        },
        other => Error::Kube(other),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<DynamicObject> {
        self.api(gvk, namespace)
            .get(name)
            .await
            .map_err(|e| map_error(e, gvk, name))
    }

    async fn list(
        &self,
        gvk: &Gvk,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .api(gvk, namespace)
            .list(&params)
            .await
            .map_err(|e| map_error(e, gvk, ""))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &DynamicObject, params: &WriteParams) -> Result<DynamicObject> {
        let (gvk, api) = self.api_for(obj)?;
        let name = resources::namespaced_name(obj);
        debug!(gvk = %gvk, name = %name, "创建对象");

        let pp = PostParams {
            field_manager: Some(params.field_owner.clone()).filter(|f| !f.is_empty()),
            ..Default::default()
        };
        api.create(&pp, obj)
            .await
            .map_err(|e| map_error(e, &gvk, &name))
    }

    async fn patch(
        &self,
        current: &DynamicObject,
        body: &DynamicObject,
        params: &WriteParams,
    ) -> Result<DynamicObject> {
        let (gvk, api) = self.api_for(current)?;
        let name = current.name_any();
        debug!(gvk = %gvk, name = %resources::namespaced_name(current), "补丁对象");

        let mut pp = PatchParams::apply(&params.field_owner);
        if params.force {
            pp = pp.force();
        }
        api.patch(&name, &pp, &Patch::Apply(body))
            .await
            .map_err(|e| map_error(e, &gvk, &name))
    }

    async fn apply(&self, obj: &DynamicObject, params: &WriteParams) -> Result<DynamicObject> {
        let (gvk, api) = self.api_for(obj)?;
        let name = obj.name_any();
        debug!(gvk = %gvk, name = %resources::namespaced_name(obj), "应用对象");

        let mut pp = PatchParams::apply(&params.field_owner);
        if params.force {
            pp = pp.force();
        }
        api.patch(&name, &pp, &Patch::Apply(obj))
            .await
            .map_err(|e| map_error(e, &gvk, &name))
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let (gvk, api) = self.api_for(obj)?;
        let name = obj.name_any();
        api.replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_error(e, &gvk, &name))
    }

    async fn delete(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<()> {
        debug!(gvk = %gvk, name = %name, "删除对象");
        self.api(gvk, namespace)
            .delete(name, &DeleteParams::foreground())
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, gvk, name))
    }

    async fn patch_status(
        &self,
        gvk: &Gvk,
        namespace: Option<&str>,
        name: &str,
        status: &Value,
    ) -> Result<DynamicObject> {
        let patch = json!({ "status": status });
        self.api(gvk, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_error(e, gvk, name))
    }
}
