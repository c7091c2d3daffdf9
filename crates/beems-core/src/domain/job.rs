//! Jobs as seen by the dispatch layer.
//!
//! - [`JobOptions`]: what a call site asks for (all optional).
//! - [`NewJob`]: a job being built before it is saved; options are applied
//!   through its setters.
//! - [`Job`]: a snapshot of a saved job, owned by the queue engine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::backoff::{Backoff, BackoffStrategy};
use super::errors::ValidationError;
use super::ids::JobId;
use super::names::ServiceName;
use super::payload::Payload;

/// Job state as tracked by the queue engine.
///
/// State transitions:
/// - Waiting -> Active -> Succeeded
/// - Delayed -> Waiting (when `delay_until` passes)
/// - Active -> Waiting | Delayed (retry, depending on backoff)
/// - Active -> Failed (no retries left)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Delayed,
    Active,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Waiting,
        JobStatus::Active,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Delayed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Delayed => "delayed",
            JobStatus::Active => "active",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }
}

/// Execution options of a saved job.
///
/// `retries` counts the retries still available: the engine decrements it each
/// time the job is retried, so a handler can tell a first attempt from a retry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    pub retries: u32,
    pub backoff: Backoff,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
    #[serde(default, with = "super::millis::option", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// A job under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub data: Payload,
    pub id: Option<JobId>,
    pub options: ExecutionOptions,
}

impl NewJob {
    pub fn new(data: Payload) -> Self {
        Self {
            data,
            id: None,
            options: ExecutionOptions::default(),
        }
    }

    pub fn set_id(mut self, id: JobId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.options.retries = retries;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.options.backoff = backoff;
        self
    }

    pub fn delay_until(mut self, at: DateTime<Utc>) -> Self {
        self.options.delay_until = Some(at);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }
}

/// Snapshot of a saved job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: ServiceName,
    pub data: Payload,
    pub options: ExecutionOptions,
    pub status: JobStatus,
    /// Last reported progress, 0..=100.
    pub progress: u8,
    /// Number of times a worker picked the job up.
    pub attempts: u32,
}

/// Job options requested by a call site.
///
/// Every field is optional; only the ones that are set are applied to the job,
/// in the order `setId`, `retries`, `backoff`, `delayUntil`, `timeout`.
///
/// # Dynamic form
/// [`JobOptions::from_value`] reads the option object used in configuration
/// files:
/// ```ignore
/// { "retries": 2, "backoff": ["fixed", 1000], "timeout": 5000, "color": "red" }
/// ```
/// Unknown keys (`color`) are ignored. A value that is an array is spread as
/// the setter's argument list; any other value is its single argument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOptions {
    pub set_id: Option<JobId>,
    pub retries: Option<u32>,
    pub backoff: Option<Backoff>,
    pub delay_until: Option<DateTime<Utc>>,
    pub timeout: Option<Duration>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.set_id = Some(id);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_delay_until(mut self, at: DateTime<Utc>) -> Self {
        self.delay_until = Some(at);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check values the builder methods let through.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(ValidationError::job_option("timeout", "must be positive"));
        }
        Ok(())
    }

    /// Apply the options that are set by calling the matching setters.
    pub fn apply(&self, mut job: NewJob) -> NewJob {
        if let Some(id) = &self.set_id {
            job = job.set_id(id.clone());
        }
        if let Some(retries) = self.retries {
            job = job.retries(retries);
        }
        if let Some(backoff) = self.backoff {
            job = job.backoff(backoff);
        }
        if let Some(at) = self.delay_until {
            job = job.delay_until(at);
        }
        if let Some(timeout) = self.timeout {
            job = job.timeout(timeout);
        }
        job
    }

    /// Parse the dynamic option object. `null` yields empty options.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let object = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(object) => object,
            _ => {
                return Err(ValidationError::job_option(
                    "jobOptions",
                    "expected an object",
                ));
            }
        };

        let mut options = Self::default();
        for (key, value) in object {
            let args = spread(value);
            match key.as_str() {
                "setId" => {
                    let [id] = arity::<1>(key, args)?;
                    let raw = id
                        .as_str()
                        .map(str::to_owned)
                        .or_else(|| id.as_u64().map(|n| n.to_string()))
                        .ok_or_else(|| ValidationError::job_option(key, "expected a string"))?;
                    options.set_id = Some(
                        JobId::parse(raw).map_err(|e| ValidationError::job_option(key, e.to_string()))?,
                    );
                }
                "retries" => {
                    let [n] = arity::<1>(key, args)?;
                    options.retries = Some(as_u32(key, n)?);
                }
                "backoff" => options.backoff = Some(parse_backoff(args)?),
                "delayUntil" => {
                    let [at] = arity::<1>(key, args)?;
                    options.delay_until = Some(parse_timestamp(key, at)?);
                }
                "timeout" => {
                    let [ms] = arity::<1>(key, args)?;
                    let ms = as_u64(key, ms)?;
                    if ms == 0 {
                        return Err(ValidationError::job_option(key, "must be positive"));
                    }
                    options.timeout = Some(Duration::from_millis(ms));
                }
                other => tracing::trace!(option = other, "ignoring unknown job option"),
            }
        }
        Ok(options)
    }

    /// Render back into the dynamic form.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        if let Some(id) = &self.set_id {
            object.insert("setId".into(), Value::String(id.to_string()));
        }
        if let Some(retries) = self.retries {
            object.insert("retries".into(), retries.into());
        }
        if let Some(backoff) = self.backoff {
            let mut args = vec![Value::String(backoff.strategy.as_str().into())];
            if backoff.strategy != BackoffStrategy::Immediate {
                args.push(duration_ms(backoff.delay).into());
            }
            object.insert("backoff".into(), Value::Array(args));
        }
        if let Some(at) = self.delay_until {
            object.insert("delayUntil".into(), at.timestamp_millis().into());
        }
        if let Some(timeout) = self.timeout {
            object.insert("timeout".into(), duration_ms(timeout).into());
        }
        Value::Object(object)
    }
}

impl TryFrom<Value> for JobOptions {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value)
    }
}

impl Serialize for JobOptions {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for JobOptions {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}

fn spread(value: &Value) -> &[Value] {
    match value {
        Value::Array(items) => items.as_slice(),
        other => std::slice::from_ref(other),
    }
}

fn arity<'a, const N: usize>(key: &str, args: &'a [Value]) -> Result<&'a [Value; N], ValidationError> {
    args.try_into().map_err(|_| {
        ValidationError::job_option(
            key,
            format!("expected {N} argument(s), got {}", args.len()),
        )
    })
}

fn as_u64(key: &str, value: &Value) -> Result<u64, ValidationError> {
    value
        .as_u64()
        .ok_or_else(|| ValidationError::job_option(key, "expected a non-negative integer"))
}

fn as_u32(key: &str, value: &Value) -> Result<u32, ValidationError> {
    u32::try_from(as_u64(key, value)?)
        .map_err(|_| ValidationError::job_option(key, "value out of range"))
}

fn parse_backoff(args: &[Value]) -> Result<Backoff, ValidationError> {
    let strategy = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::job_option("backoff", "expected a strategy name"))?;
    let strategy = BackoffStrategy::parse(strategy)?;
    match (strategy, args) {
        (BackoffStrategy::Immediate, [_]) => Ok(Backoff::immediate()),
        (BackoffStrategy::Immediate, _) => Err(ValidationError::job_option(
            "backoff",
            "immediate backoff takes no delay",
        )),
        (_, [_, delay]) => {
            let delay = Duration::from_millis(as_u64("backoff", delay)?);
            Ok(Backoff { strategy, delay })
        }
        _ => Err(ValidationError::job_option(
            "backoff",
            format!("{} backoff needs a delay in milliseconds", strategy.as_str()),
        )),
    }
}

fn parse_timestamp(key: &str, value: &Value) -> Result<DateTime<Utc>, ValidationError> {
    if let Some(ms) = value.as_i64() {
        return DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| ValidationError::job_option(key, "timestamp out of range"));
    }
    if let Some(text) = value.as_str() {
        return DateTime::parse_from_rfc3339(text)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| ValidationError::job_option(key, e.to_string()));
    }
    Err(ValidationError::job_option(
        key,
        "expected epoch milliseconds or an RFC 3339 timestamp",
    ))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
