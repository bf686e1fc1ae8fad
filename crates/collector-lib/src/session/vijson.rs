//! vSphere JSON API session
//!
//! Speaks the JSON binding of the vim25 API over HTTPS:
//! - every method is `POST {base}/{MoType}/{moId}/{Method}` with a JSON body
//! - every property read is `GET {base}/{MoType}/{moId}/{property}`
//! - the session id returned by `Login` is echoed in `vmware-api-session-id`

use super::{
    Connector, CounterSeries, ObjectRef, ProviderCounterInfo, QueryWindow, RawSample,
    RemoteSession, SubscriptionCursor, UpdateSet,
};
use crate::error::{CollectorError, Result};
use crate::models::PerfCounterMetadata;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const SESSION_HEADER: &str = "vmware-api-session-id";

/// Extra time granted to a long-poll request beyond the server-side wait
const WAIT_GRACE: Duration = Duration::from_secs(30);

/// Connection settings for the management endpoint
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    /// API release path segment, e.g. "8.0.1.0"
    pub api_release: String,
    /// Accept self-signed server certificates
    pub insecure: bool,
    /// Plain HTTP is only meant for local simulators
    pub use_tls: bool,
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: String::new(),
            password: String::new(),
            api_release: "8.0.1.0".to_string(),
            insecure: true,
            use_tls: true,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl SessionConfig {
    fn base_url(&self) -> Result<Url> {
        let scheme = if self.use_tls { "https" } else { "http" };
        let raw = format!("{}://{}/sdk/vim25/{}/", scheme, self.host, self.api_release);
        Url::parse(&raw).map_err(|e| CollectorError::Config {
            reason: format!("invalid endpoint {}: {}", raw, e),
        })
    }
}

/// Managed object references from the service content
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceContent {
    root_folder: ObjectRef,
    property_collector: ObjectRef,
    view_manager: ObjectRef,
    session_manager: ObjectRef,
    event_manager: ObjectRef,
    perf_manager: ObjectRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResult {
    #[serde(default)]
    objects: Vec<ObjectContent>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectContent {
    obj: ObjectRef,
    #[serde(default)]
    prop_set: Vec<DynamicProperty>,
}

#[derive(Debug, Deserialize)]
struct DynamicProperty {
    name: String,
    #[serde(default)]
    val: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerfEntityMetric {
    entity: ObjectRef,
    #[serde(default)]
    sample_info: Vec<PerfSampleInfo>,
    #[serde(default)]
    value: Vec<PerfMetricSeries>,
}

#[derive(Debug, Deserialize)]
struct PerfSampleInfo {
    timestamp: DateTime<Utc>,
    interval: i32,
}

#[derive(Debug, Deserialize)]
struct PerfMetricSeries {
    id: PerfMetricId,
    #[serde(default)]
    value: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerfMetricId {
    counter_id: i32,
    #[serde(default)]
    instance: String,
}

/// Authenticated session against one management endpoint
pub struct ViJsonSession {
    client: Client,
    base_url: Url,
    host: String,
    session_id: String,
    content: ServiceContent,
}

impl ViJsonSession {
    /// Fetch the service content and log in
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        let base_url = config.base_url()?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.insecure)
            .build()?;

        info!(host = %config.host, "Connecting to management endpoint");

        let content_url = join(&base_url, "ServiceInstance/ServiceInstance/content")?;
        let response = client
            .get(content_url)
            .send()
            .await
            .map_err(|e| CollectorError::connection(&config.host, e.to_string()))?;
        if !response.status().is_success() {
            return Err(CollectorError::connection(
                &config.host,
                format!("service content request returned {}", response.status()),
            ));
        }
        let content: ServiceContent = response.json().await?;

        info!(user = %config.user, host = %config.host, "Logging in");

        let login_url = join(
            &base_url,
            &method_path(&content.session_manager, "Login"),
        )?;
        let response = client
            .post(login_url)
            .json(&json!({ "userName": config.user, "password": config.password }))
            .send()
            .await
            .map_err(|e| CollectorError::connection(&config.host, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::Auth {
                user: config.user.clone(),
                reason: format!("{}: {}", status, body),
            });
        }

        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CollectorError::protocol("login response carried no session id"))?;

        info!(host = %config.host, "Connected");

        Ok(Self {
            client,
            base_url,
            host: config.host.clone(),
            session_id,
            content,
        })
    }

    async fn invoke(
        &self,
        object: &ObjectRef,
        method: &str,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>> {
        let url = join(&self.base_url, &method_path(object, method))?;
        let mut request = self
            .client
            .request(Method::POST, url)
            .header(SESSION_HEADER, &self.session_id)
            .json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        self.finish(request, method).await
    }

    async fn read_property(&self, object: &ObjectRef, property: &str) -> Result<Option<Value>> {
        let url = join(&self.base_url, &method_path(object, property))?;
        let request = self
            .client
            .get(url)
            .header(SESSION_HEADER, &self.session_id);

        self.finish(request, property).await
    }

    async fn finish(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Option<Value>> {
        let response = request
            .send()
            .await
            .map_err(|e| CollectorError::connection(&self.host, format!("{}: {}", what, e)))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::connection(
                &self.host,
                format!("{} returned {}: {}", what, status, body),
            ));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    async fn invoke_ref(&self, object: &ObjectRef, method: &str, body: Value) -> Result<ObjectRef> {
        let value = self
            .invoke(object, method, body, None)
            .await?
            .ok_or_else(|| CollectorError::protocol(format!("{} returned no reference", method)))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn retrieve_power_states(&self, view: &ObjectRef) -> Result<Vec<ObjectRef>> {
        let spec = json!({
            "specSet": [{
                "_typeName": "PropertyFilterSpec",
                "objectSet": [{
                    "_typeName": "ObjectSpec",
                    "obj": moref(view),
                    "skip": true,
                    "selectSet": [{
                        "_typeName": "TraversalSpec",
                        "name": "traverseView",
                        "type": "ContainerView",
                        "path": "view",
                        "skip": false
                    }]
                }],
                "propSet": [{
                    "_typeName": "PropertySpec",
                    "type": "VirtualMachine",
                    "all": false,
                    "pathSet": ["runtime.powerState"]
                }]
            }],
            "options": { "_typeName": "RetrieveOptions" }
        });

        let collector = &self.content.property_collector;
        let mut targets = Vec::new();
        let mut page = self.invoke(collector, "RetrievePropertiesEx", spec, None).await?;

        while let Some(value) = page {
            let result: RetrieveResult = serde_json::from_value(value)?;
            targets.extend(
                result
                    .objects
                    .into_iter()
                    .filter(is_powered_on)
                    .map(|content| content.obj),
            );

            page = match result.token {
                Some(token) => {
                    self.invoke(
                        collector,
                        "ContinueRetrievePropertiesEx",
                        json!({ "token": token }),
                        None,
                    )
                    .await?
                }
                None => None,
            };
        }

        Ok(targets)
    }
}

#[async_trait]
impl RemoteSession for ViJsonSession {
    async fn create_event_collector(&self, page_size: u32) -> Result<ObjectRef> {
        let collector = self
            .invoke_ref(
                &self.content.event_manager,
                "CreateCollectorForEvents",
                json!({ "filter": { "_typeName": "EventFilterSpec" } }),
            )
            .await?;

        self.invoke(
            &collector,
            "SetCollectorPageSize",
            json!({ "maxCount": page_size }),
            None,
        )
        .await?;

        debug!(collector = %collector, page_size, "Created event history collector");
        Ok(collector)
    }

    async fn create_filter(&self, collector: &ObjectRef) -> Result<ObjectRef> {
        let spec = json!({
            "spec": {
                "_typeName": "PropertyFilterSpec",
                "objectSet": [{ "_typeName": "ObjectSpec", "obj": moref(collector) }],
                "propSet": [{
                    "_typeName": "PropertySpec",
                    "type": collector.kind,
                    "all": false,
                    "pathSet": ["latestPage"]
                }]
            },
            "partialUpdates": true
        });

        let filter = self
            .invoke_ref(&self.content.property_collector, "CreateFilter", spec)
            .await?;
        debug!(filter = %filter, "Created property filter");
        Ok(filter)
    }

    async fn wait_for_updates(
        &self,
        cursor: &SubscriptionCursor,
        max_wait: Duration,
    ) -> Result<Option<UpdateSet>> {
        let mut body = json!({
            "options": { "_typeName": "WaitOptions", "maxWaitSeconds": max_wait.as_secs() }
        });
        if let Some(version) = cursor.version() {
            body["version"] = json!(version);
        }

        let response = self
            .invoke(
                &self.content.property_collector,
                "WaitForUpdatesEx",
                body,
                Some(max_wait + WAIT_GRACE),
            )
            .await?;

        response
            .map(serde_json::from_value::<UpdateSet>)
            .transpose()
            .map_err(CollectorError::from)
    }

    async fn destroy_filter(&self, filter: &ObjectRef) -> Result<()> {
        self.invoke(filter, "DestroyPropertyFilter", json!({}), None)
            .await?;
        Ok(())
    }

    async fn list_powered_on_targets(&self) -> Result<Vec<ObjectRef>> {
        let view = self
            .invoke_ref(
                &self.content.view_manager,
                "CreateContainerView",
                json!({
                    "container": moref(&self.content.root_folder),
                    "type": ["VirtualMachine"],
                    "recursive": true
                }),
            )
            .await?;

        let targets = self.retrieve_power_states(&view).await;

        if let Err(e) = self.invoke(&view, "DestroyView", json!({}), None).await {
            warn!(view = %view, error = %e, "Failed to destroy container view");
        }

        targets
    }

    async fn query_perf_counters(
        &self,
        counters: &[PerfCounterMetadata],
        targets: &[ObjectRef],
        window: &QueryWindow,
    ) -> Result<Vec<RawSample>> {
        if targets.is_empty() || counters.is_empty() {
            return Ok(Vec::new());
        }

        let metric_ids: Vec<Value> = counters
            .iter()
            .map(|c| {
                json!({
                    "_typeName": "PerfMetricId",
                    "counterId": c.counter_id,
                    "instance": "*"
                })
            })
            .collect();

        let query_specs: Vec<Value> = targets
            .iter()
            .map(|target| {
                let mut spec = json!({
                    "_typeName": "PerfQuerySpec",
                    "entity": moref(target),
                    "metricId": metric_ids,
                    "intervalId": window.interval_id,
                    "startTime": window.start_time.to_rfc3339_opts(SecondsFormat::Secs, true),
                    "format": "normal"
                });
                if let Some(end) = window.end_time {
                    spec["endTime"] = json!(end.to_rfc3339_opts(SecondsFormat::Secs, true));
                }
                spec
            })
            .collect();

        let response = self
            .invoke(
                &self.content.perf_manager,
                "QueryPerf",
                json!({ "querySpec": query_specs }),
                None,
            )
            .await?;

        let metrics: Vec<PerfEntityMetric> = match response {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };

        Ok(metrics
            .into_iter()
            .map(|metric| flatten_entity_metric(metric, window.interval_id))
            .collect())
    }

    async fn list_counter_catalog(&self) -> Result<Vec<ProviderCounterInfo>> {
        match self
            .read_property(&self.content.perf_manager, "perfCounter")
            .await?
        {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn close(&self) -> Result<()> {
        info!(host = %self.host, "Logging out");
        self.invoke(&self.content.session_manager, "Logout", json!({}), None)
            .await?;
        Ok(())
    }
}

/// Opens `ViJsonSession`s from a fixed configuration
pub struct ViJsonConnector {
    config: SessionConfig,
}

impl ViJsonConnector {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for ViJsonConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteSession>> {
        let session = ViJsonSession::connect(&self.config).await?;
        Ok(Arc::new(session))
    }

    fn host(&self) -> &str {
        &self.config.host
    }
}

fn method_path(object: &ObjectRef, method: &str) -> String {
    format!("{}/{}/{}", object.kind, object.value, method)
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path).map_err(|e| CollectorError::Config {
        reason: format!("invalid request path {}: {}", path, e),
    })
}

fn moref(object: &ObjectRef) -> Value {
    json!({ "_typeName": "ManagedObjectReference", "type": object.kind, "value": object.value })
}

fn is_powered_on(content: &ObjectContent) -> bool {
    content
        .prop_set
        .iter()
        .filter(|prop| prop.name == "runtime.powerState")
        .any(|prop| {
            let state = prop.val.get("_value").unwrap_or(&prop.val);
            state.as_str() == Some("poweredOn")
        })
}

/// Interleave sample timestamps with each series' values
fn flatten_entity_metric(metric: PerfEntityMetric, default_interval: i32) -> RawSample {
    let interval_id = metric
        .sample_info
        .first()
        .map(|info| info.interval)
        .unwrap_or(default_interval);

    let series = metric
        .value
        .into_iter()
        .map(|series| {
            let results = metric
                .sample_info
                .iter()
                .zip(series.value.iter())
                .flat_map(|(info, value)| [info.timestamp.timestamp() as f64, *value])
                .collect();

            CounterSeries {
                counter_id: series.id.counter_id,
                instance: series.id.instance,
                interval_id,
                results,
            }
        })
        .collect();

    RawSample {
        entity: metric.entity,
        series,
    }
}
