//! in-memory backend and signer for unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::json;

use crate::backend::{BackendError, SensorBackend, SensorPage};
use crate::domain::{ExportRequest, ResolvedImage, SensorRecord};
use crate::images::{SignError, UrlSigner};

pub fn item(device_id: &str, timestamp: &str) -> serde_json::Value {
    json!({
        "deviceId": device_id,
        "timestamp": timestamp,
        "payload": {
            "data": {
                "temperature": 21.5,
                "humidity": 55.0,
                "u_v_light": 800.0,
                "i_v_light": 120.0,
                "stem": 10.5,
                "fruit_diagram": 42.0,
                "humidity_hq": 54.0,
                "temperature_hq": 21.0
            }
        }
    })
}

pub fn item_with_images(device_id: &str, timestamp: &str, keys: &[&str]) -> serde_json::Value {
    let mut value = item(device_id, timestamp);
    value["imageKeys"] = json!(keys);
    value
}

pub fn record(device_id: &str, timestamp: i64) -> SensorRecord {
    SensorRecord {
        device_id: device_id.to_string(),
        timestamp,
        temperature: Some(21.5),
        humidity: Some(55.0),
        uv_light: Some(800.0),
        iv_light: Some(120.0),
        stem: Some(10.5),
        fruit_diagram: Some(42.0),
        humidity_hq: Some(54.0),
        temperature_hq: Some(21.0),
        image_keys: Vec::new(),
    }
}

type ListResult = Result<SensorPage, Vec<String>>;

#[derive(Default)]
pub struct MockBackend {
    scripted: Mutex<VecDeque<ListResult>>,
    device_items: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    failing: AtomicBool,
    list_delay: Mutex<Option<Duration>>,
    list_calls: Mutex<Vec<(String, Option<String>)>>,
    export_result: Mutex<Option<Result<String, Vec<String>>>>,
    export_delay: Mutex<Option<Duration>>,
    export_calls: Mutex<Vec<ExportRequest>>,
}

impl MockBackend {
    pub fn push_page(&self, items: Vec<Option<serde_json::Value>>, next_token: Option<&str>) {
        self.scripted.lock().unwrap().push_back(Ok(SensorPage {
            items,
            next_token: next_token.map(str::to_string),
        }));
    }

    pub fn fail_next_list(&self, messages: Vec<&str>) {
        self.scripted
            .lock()
            .unwrap()
            .push_back(Err(messages.into_iter().map(str::to_string).collect()));
    }

    /// answer every unscripted list call for `device_id` with these items
    pub fn set_device_items(&self, device_id: &str, items: Vec<serde_json::Value>) {
        self.device_items
            .lock()
            .unwrap()
            .insert(device_id.to_string(), items);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    pub fn list_calls_for(&self, device_id: &str) -> usize {
        self.list_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == device_id)
            .count()
    }

    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.list_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub fn set_export_url(&self, url: &str) {
        *self.export_result.lock().unwrap() = Some(Ok(url.to_string()));
    }

    pub fn fail_export(&self, message: &str) {
        *self.export_result.lock().unwrap() = Some(Err(vec![message.to_string()]));
    }

    pub fn set_export_delay(&self, delay: Duration) {
        *self.export_delay.lock().unwrap() = Some(delay);
    }

    pub fn export_calls(&self) -> Vec<ExportRequest> {
        self.export_calls.lock().unwrap().clone()
    }
}

impl SensorBackend for MockBackend {
    async fn list_sensor_data(
        &self,
        device_id: &str,
        next_token: Option<&str>,
    ) -> Result<SensorPage, BackendError> {
        self.list_calls
            .lock()
            .unwrap()
            .push((device_id.to_string(), next_token.map(str::to_string)));

        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::GraphQl(vec!["Network error".to_string()]));
        }

        let scripted = self.scripted.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(page)) => Ok(page),
            Some(Err(messages)) => Err(BackendError::GraphQl(messages)),
            None => {
                let items = self
                    .device_items
                    .lock()
                    .unwrap()
                    .get(device_id)
                    .cloned()
                    .unwrap_or_default();
                Ok(SensorPage {
                    items: items.into_iter().map(Some).collect(),
                    next_token: None,
                })
            }
        }
    }

    async fn create_csv_export(&self, request: &ExportRequest) -> Result<String, BackendError> {
        self.export_calls.lock().unwrap().push(request.clone());

        let delay = *self.export_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self.export_result.lock().unwrap().clone();
        match result {
            Some(Ok(url)) => Ok(url),
            Some(Err(messages)) => Err(BackendError::GraphQl(messages)),
            None => Ok(String::new()),
        }
    }
}

#[derive(Default)]
pub struct MockSigner {
    failing_keys: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl MockSigner {
    pub fn failing_on(keys: &[&str]) -> Self {
        Self {
            failing_keys: Mutex::new(keys.iter().map(|k| k.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl UrlSigner for MockSigner {
    async fn presign(&self, key: &str) -> Result<ResolvedImage, SignError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // let sibling signings interleave
        tokio::task::yield_now().await;

        if self.failing_keys.lock().unwrap().contains(key) {
            return Err(SignError::Presign(format!("access denied for {key}")));
        }
        Ok(ResolvedImage {
            key: key.to_string(),
            url: format!("https://signed.example/{key}?X-Amz-Expires=3600"),
            expires_at_ms: 0,
        })
    }
}
