//! 内存集群客户端，仅用于测试
//!
//! 写操作按 JSON merge 语义合并到存储对象中，只有内容变化时才递增 resourceVersion。

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use stratus_common::{resources, Error, Gvk, Result};

use super::{ClusterClient, WriteParams};

type ObjectKey = (String, String, String, String);

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, Value>,
    resource_version: u64,
    uid: u64,
    writes: usize,
    deletes: usize,
    status_patches: usize,
    bodies: Vec<Value>,
    field_owners: Vec<String>,
    failures: HashSet<(String, String)>,
    one_shot_failures: HashSet<(String, String)>,
}

/// 内存集群客户端
#[derive(Default)]
pub struct FakeClusterClient {
    state: Mutex<FakeState>,
}

fn key_of(gvk: &Gvk, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        gvk.group.clone(),
        gvk.kind.clone(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

fn object_key(obj: &DynamicObject) -> Result<ObjectKey> {
    let gvk = Gvk::of(obj)?;
    Ok(key_of(
        &gvk,
        obj.metadata.namespace.as_deref(),
        obj.metadata.name.as_deref().unwrap_or_default(),
    ))
}

fn not_found(key: &ObjectKey) -> Error {
    Error::NotFound {
        gvk: format!("{}/{}", key.0, key.1),
        name: format!("{}/{}", key.2, key.3),
    }
}

/// RFC 7386 JSON merge patch
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (k, v) in patch {
                if v.is_null() {
                    target.remove(k);
                } else {
                    merge(target.entry(k.clone()).or_insert(Value::Null), v);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn without_resource_version(value: &Value) -> Value {
    let mut value = value.clone();
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove("resourceVersion");
    }
    value
}

fn to_object(value: &Value) -> Result<DynamicObject> {
    Ok(serde_json::from_value(value.clone())?)
}

impl FakeState {
    fn check_failure(&mut self, op: &str, key: &ObjectKey) -> Result<()> {
        let target = (op.to_string(), key.1.clone());
        if self.failures.contains(&target) || self.one_shot_failures.remove(&target) {
            return Err(Error::Api {
                code: 500,
                reason: "InternalError".into(),
                message: format!("injected {} failure for {}", op, key.1),
            });
        }
        Ok(())
    }

    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn insert_new(&mut self, key: ObjectKey, mut value: Value) -> Result<DynamicObject> {
        self.uid += 1;
        let uid = format!("uid-{}", self.uid);
        let rv = self.next_resource_version();
        if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert("uid".into(), json!(uid));
            meta.insert("resourceVersion".into(), json!(rv));
            meta.insert("generation".into(), json!(1));
        }
        let obj = to_object(&value)?;
        self.objects.insert(key, value);
        Ok(obj)
    }

    fn store_updated(&mut self, key: ObjectKey, old: &Value, mut value: Value) -> Result<DynamicObject> {
        if without_resource_version(old) != without_resource_version(&value) {
            let rv = self.next_resource_version();
            resources::set_nested_field(&mut value, &["metadata", "resourceVersion"], json!(rv))?;
        } else if let Some(rv) = resources::nested_field(old, &["metadata", "resourceVersion"]) {
            let rv = rv.clone();
            resources::set_nested_field(&mut value, &["metadata", "resourceVersion"], rv)?;
        }
        let obj = to_object(&value)?;
        self.objects.insert(key, value);
        Ok(obj)
    }

    fn merge_into(&mut self, key: ObjectKey, body: &Value) -> Result<DynamicObject> {
        let old = self.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;
        let mut patch = body.clone();
        if let Some(meta) = patch.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("resourceVersion");
            meta.remove("uid");
        }
        let mut value = old.clone();
        merge(&mut value, &patch);
        self.store_updated(key, &old, value)
    }
}

impl FakeClusterClient {
    /// 创建空的客户端
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// 以外部写入者的身份存入对象，不计入写操作次数
    pub fn seed(&self, obj: DynamicObject) -> DynamicObject {
        let key = object_key(&obj).unwrap();
        let value = serde_json::to_value(&obj).unwrap();
        let mut state = self.lock();
        match state.objects.get(&key).cloned() {
            Some(old) => state.store_updated(key, &old, value).unwrap(),
            None => state.insert_new(key, value).unwrap(),
        }
    }

    /// 读取存储中的对象
    pub fn object(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        let state = self.lock();
        state
            .objects
            .get(&key_of(gvk, namespace, name))
            .map(|v| to_object(v).unwrap())
    }

    /// 成功的写操作（create/patch/apply/replace）次数
    ///
    /// 因对象已存在而被拒绝的 create 不计入。
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// 删除次数
    pub fn deletes(&self) -> usize {
        self.lock().deletes
    }

    /// status 补丁次数
    pub fn status_patches(&self) -> usize {
        self.lock().status_patches
    }

    /// patch/apply 发送的请求体
    pub fn bodies(&self) -> Vec<Value> {
        self.lock().bodies.clone()
    }

    /// 写操作使用的字段所有者
    pub fn field_owners(&self) -> Vec<String> {
        self.lock().field_owners.clone()
    }

    /// 对给定操作与类型注入服务端错误
    pub fn fail_on(&self, op: &str, kind: &str) {
        self.lock().failures.insert((op.to_string(), kind.to_string()));
    }

    /// 让下一次指定操作失败，之后恢复正常
    pub fn fail_once(&self, op: &str, kind: &str) {
        self.lock()
            .one_shot_failures
            .insert((op.to_string(), kind.to_string()));
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<DynamicObject> {
        let key = key_of(gvk, namespace, name);
        let mut state = self.lock();
        state.check_failure("get", &key)?;
        state
            .objects
            .get(&key)
            .map(to_object)
            .unwrap_or_else(|| Err(not_found(&key)))
    }

    async fn list(
        &self,
        gvk: &Gvk,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let selector: Vec<(&str, &str)> = label_selector
            .unwrap_or_default()
            .split(',')
            .filter_map(|s| s.split_once('='))
            .collect();
        let state = self.lock();
        state
            .objects
            .iter()
            .filter(|(k, _)| k.0 == gvk.group && k.1 == gvk.kind)
            .filter(|(k, _)| namespace.map_or(true, |ns| k.2 == ns))
            .filter(|(_, v)| {
                selector.iter().all(|(lk, lv)| {
                    resources::nested_field(v, &["metadata", "labels", *lk]).and_then(Value::as_str)
                        == Some(*lv)
                })
            })
            .map(|(_, v)| to_object(v))
            .collect()
    }

    async fn create(&self, obj: &DynamicObject, params: &WriteParams) -> Result<DynamicObject> {
        let key = object_key(obj)?;
        let mut state = self.lock();
        state.check_failure("create", &key)?;
        if state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                gvk: key.1.clone(),
                name: key.3.clone(),
            });
        }
        state.writes += 1;
        state.field_owners.push(params.field_owner.clone());
        state.insert_new(key, serde_json::to_value(obj)?)
    }

    async fn patch(
        &self,
        current: &DynamicObject,
        body: &DynamicObject,
        params: &WriteParams,
    ) -> Result<DynamicObject> {
        let key = object_key(current)?;
        let body = serde_json::to_value(body)?;
        let mut state = self.lock();
        state.check_failure("patch", &key)?;
        state.writes += 1;
        state.field_owners.push(params.field_owner.clone());
        state.bodies.push(body.clone());
        state.merge_into(key, &body)
    }

    async fn apply(&self, obj: &DynamicObject, params: &WriteParams) -> Result<DynamicObject> {
        let key = object_key(obj)?;
        let body = serde_json::to_value(obj)?;
        let mut state = self.lock();
        state.check_failure("apply", &key)?;
        state.writes += 1;
        state.field_owners.push(params.field_owner.clone());
        state.bodies.push(body.clone());
        if state.objects.contains_key(&key) {
            state.merge_into(key, &body)
        } else {
            state.insert_new(key, body)
        }
    }

    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = object_key(obj)?;
        let mut value = serde_json::to_value(obj)?;
        let mut state = self.lock();
        state.check_failure("replace", &key)?;
        state.writes += 1;
        let old = state.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;
        if let Some(status) = old.get("status") {
            resources::set_nested_field(&mut value, &["status"], status.clone())?;
        }
        state.store_updated(key, &old, value)
    }

    async fn delete(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<()> {
        let key = key_of(gvk, namespace, name);
        let mut state = self.lock();
        state.check_failure("delete", &key)?;
        state.deletes += 1;
        state
            .objects
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| not_found(&key))
    }

    async fn patch_status(
        &self,
        gvk: &Gvk,
        namespace: Option<&str>,
        name: &str,
        status: &Value,
    ) -> Result<DynamicObject> {
        let key = key_of(gvk, namespace, name);
        let mut state = self.lock();
        state.check_failure("patch_status", &key)?;
        state.status_patches += 1;
        state.merge_into(key, &json!({ "status": status }))
    }
}
