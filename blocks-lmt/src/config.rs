//! Pipeline settings.
//!
//! [`LmtConfigBuilder::default`] starts from the built-in defaults and applies
//! any of the environment variables below. Values set through the builder take
//! precedence over the environment. Unparsable environment values are ignored
//! with a warning.
//!
//! | variable | default |
//! |---|---|
//! | `BLOCKS_LMT_X_BLOCKS_KEY` | empty (tenant `miscellaneous`) |
//! | `BLOCKS_LMT_SERVICE_ID` | required |
//! | `BLOCKS_LMT_CONNECTION_STRING` | required |
//! | `BLOCKS_LMT_LOGS_BATCH_SIZE` | 100 |
//! | `BLOCKS_LMT_TRACES_BATCH_SIZE` | 1000 |
//! | `BLOCKS_LMT_FLUSH_INTERVAL_SECONDS` | 5.0 |
//! | `BLOCKS_LMT_MAX_RETRIES` | 3 |
//! | `BLOCKS_LMT_MAX_FAILED_BATCHES` | 100 |
//! | `BLOCKS_LMT_MAX_QUEUE_SIZE` | 10000 |
use crate::error::{LmtError, LmtResult};
use crate::export::{BatchConfig, ConnectionString, RetryPolicy};
use crate::lmt_warn;
use crate::trace::DEFAULT_TENANT;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Tenant key of the service.
pub(crate) const BLOCKS_LMT_X_BLOCKS_KEY: &str = "BLOCKS_LMT_X_BLOCKS_KEY";
/// Service identifier, also used to name the topic.
pub(crate) const BLOCKS_LMT_SERVICE_ID: &str = "BLOCKS_LMT_SERVICE_ID";
/// Sink connection string.
pub(crate) const BLOCKS_LMT_CONNECTION_STRING: &str = "BLOCKS_LMT_CONNECTION_STRING";
/// Records per log batch.
pub(crate) const BLOCKS_LMT_LOGS_BATCH_SIZE: &str = "BLOCKS_LMT_LOGS_BATCH_SIZE";
pub(crate) const BLOCKS_LMT_LOGS_BATCH_SIZE_DEFAULT: usize = 100;
/// Spans per trace batch.
pub(crate) const BLOCKS_LMT_TRACES_BATCH_SIZE: &str = "BLOCKS_LMT_TRACES_BATCH_SIZE";
pub(crate) const BLOCKS_LMT_TRACES_BATCH_SIZE_DEFAULT: usize = 1000;
/// Seconds between timer flushes, fractional values allowed.
pub(crate) const BLOCKS_LMT_FLUSH_INTERVAL_SECONDS: &str = "BLOCKS_LMT_FLUSH_INTERVAL_SECONDS";
pub(crate) const BLOCKS_LMT_FLUSH_INTERVAL_DEFAULT: Duration = Duration::from_secs(5);
/// Delivery attempts per batch, the first one included.
pub(crate) const BLOCKS_LMT_MAX_RETRIES: &str = "BLOCKS_LMT_MAX_RETRIES";
pub(crate) const BLOCKS_LMT_MAX_RETRIES_DEFAULT: usize = 3;
/// Capacity of each recovery queue.
pub(crate) const BLOCKS_LMT_MAX_FAILED_BATCHES: &str = "BLOCKS_LMT_MAX_FAILED_BATCHES";
pub(crate) const BLOCKS_LMT_MAX_FAILED_BATCHES_DEFAULT: usize = 100;
/// Buffered records per stream before new ones are dropped.
pub(crate) const BLOCKS_LMT_MAX_QUEUE_SIZE: &str = "BLOCKS_LMT_MAX_QUEUE_SIZE";
pub(crate) const BLOCKS_LMT_MAX_QUEUE_SIZE_DEFAULT: usize = 10_000;

pub(crate) const RECOVERY_INTERVAL_DEFAULT: Duration = Duration::from_secs(30);
pub(crate) const RETRY_BASE_DELAY_DEFAULT: Duration = Duration::from_secs(1);
pub(crate) const RETRY_MAX_DELAY_DEFAULT: Duration = Duration::from_secs(60);
pub(crate) const SHUTDOWN_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);

/// Validated pipeline settings. Build one with [`LmtConfig::builder`].
#[derive(Clone, Debug)]
pub struct LmtConfig {
    pub(crate) tenant_key: String,
    pub(crate) service_id: String,
    pub(crate) connection_string: ConnectionString,
    pub(crate) logs_batch_size: usize,
    pub(crate) traces_batch_size: usize,
    pub(crate) flush_interval: Duration,
    pub(crate) max_retries: usize,
    pub(crate) max_failed_batches: usize,
    pub(crate) max_queue_size: usize,
    pub(crate) recovery_interval: Duration,
    pub(crate) retry_base_delay: Duration,
    pub(crate) retry_max_delay: Duration,
    pub(crate) shutdown_timeout: Duration,
}

impl LmtConfig {
    /// A builder seeded from defaults and the environment.
    pub fn builder() -> LmtConfigBuilder {
        LmtConfigBuilder::default()
    }

    /// Tenant used when a record carries none: the tenant key, or
    /// `miscellaneous` when that is empty.
    pub fn default_tenant(&self) -> &str {
        if self.tenant_key.is_empty() {
            DEFAULT_TENANT
        } else {
            &self.tenant_key
        }
    }

    /// Service identifier.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Parsed connection string.
    pub fn connection_string(&self) -> &ConnectionString {
        &self.connection_string
    }

    /// Topic the sink is connected to.
    pub fn topic(&self) -> String {
        format!("lmt-{}", self.service_id)
    }

    /// Batching of the log stream.
    pub fn logs_batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.logs_batch_size,
            flush_interval: self.flush_interval,
            max_queue_size: self.max_queue_size,
        }
    }

    /// Batching of the trace stream.
    pub fn traces_batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.traces_batch_size,
            flush_interval: self.flush_interval,
            max_queue_size: self.max_queue_size,
        }
    }

    /// Backoff used for immediate retries.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            initial_delay_ms: self.retry_base_delay.as_millis() as u64,
            max_delay_ms: self.retry_max_delay.as_millis() as u64,
            jitter_ms: 0,
        }
    }

    /// Time between timer flushes.
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Capacity of each recovery queue.
    pub fn max_failed_batches(&self) -> usize {
        self.max_failed_batches
    }

    /// Time between recovery cycles.
    pub fn recovery_interval(&self) -> Duration {
        self.recovery_interval
    }

    /// Bound on flush and shutdown waits.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

/// Builder of [`LmtConfig`].
#[derive(Debug)]
pub struct LmtConfigBuilder {
    tenant_key: String,
    service_id: String,
    connection_string: String,
    logs_batch_size: usize,
    traces_batch_size: usize,
    flush_interval: Duration,
    max_retries: usize,
    max_failed_batches: usize,
    max_queue_size: usize,
    recovery_interval: Duration,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
    shutdown_timeout: Duration,
}

impl Default for LmtConfigBuilder {
    /// Defaults overridden by the `BLOCKS_LMT_*` environment variables that
    /// are set and valid.
    fn default() -> Self {
        LmtConfigBuilder {
            tenant_key: String::new(),
            service_id: String::new(),
            connection_string: String::new(),
            logs_batch_size: BLOCKS_LMT_LOGS_BATCH_SIZE_DEFAULT,
            traces_batch_size: BLOCKS_LMT_TRACES_BATCH_SIZE_DEFAULT,
            flush_interval: BLOCKS_LMT_FLUSH_INTERVAL_DEFAULT,
            max_retries: BLOCKS_LMT_MAX_RETRIES_DEFAULT,
            max_failed_batches: BLOCKS_LMT_MAX_FAILED_BATCHES_DEFAULT,
            max_queue_size: BLOCKS_LMT_MAX_QUEUE_SIZE_DEFAULT,
            recovery_interval: RECOVERY_INTERVAL_DEFAULT,
            retry_base_delay: RETRY_BASE_DELAY_DEFAULT,
            retry_max_delay: RETRY_MAX_DELAY_DEFAULT,
            shutdown_timeout: SHUTDOWN_TIMEOUT_DEFAULT,
        }
        .init_from_env_vars()
    }
}

impl LmtConfigBuilder {
    /// Tenant key; records without a tenant are attributed to it.
    pub fn with_tenant_key(mut self, tenant_key: impl Into<String>) -> Self {
        self.tenant_key = tenant_key.into();
        self
    }

    /// Service identifier. Required.
    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    /// Sink connection string. Required.
    pub fn with_connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = connection_string.into();
        self
    }

    /// Records per log batch.
    pub fn with_logs_batch_size(mut self, batch_size: usize) -> Self {
        self.logs_batch_size = batch_size;
        self
    }

    /// Spans per trace batch.
    pub fn with_traces_batch_size(mut self, batch_size: usize) -> Self {
        self.traces_batch_size = batch_size;
        self
    }

    /// Time between timer flushes.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Delivery attempts per batch, the first one included.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Capacity of each recovery queue.
    pub fn with_max_failed_batches(mut self, max_failed_batches: usize) -> Self {
        self.max_failed_batches = max_failed_batches;
        self
    }

    /// Buffered records per stream before new ones are dropped.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Time between recovery cycles.
    pub fn with_recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }

    /// Wait before the first retry; later waits double up to `max_delay`.
    pub fn with_retry_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.retry_base_delay = base_delay;
        self.retry_max_delay = max_delay;
        self
    }

    /// Bound on flush and shutdown waits.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate and build.
    pub fn build(self) -> LmtResult<LmtConfig> {
        let invalid = |reason: &str| Err(LmtError::Configuration(reason.to_string()));
        if self.service_id.trim().is_empty() {
            return invalid("service id must not be empty");
        }
        if self.logs_batch_size == 0 || self.traces_batch_size == 0 {
            return invalid("batch sizes must be greater than zero");
        }
        if self.flush_interval.is_zero() {
            return invalid("flush interval must be greater than zero");
        }
        if self.max_retries == 0 {
            return invalid("max retries must be at least 1");
        }
        if self.max_failed_batches == 0 {
            return invalid("max failed batches must be at least 1");
        }
        if self.recovery_interval.is_zero() {
            return invalid("recovery interval must be greater than zero");
        }
        let connection_string = ConnectionString::parse(&self.connection_string)?;

        Ok(LmtConfig {
            tenant_key: self.tenant_key,
            service_id: self.service_id,
            connection_string,
            logs_batch_size: self.logs_batch_size,
            traces_batch_size: self.traces_batch_size,
            flush_interval: self.flush_interval,
            max_retries: self.max_retries,
            max_failed_batches: self.max_failed_batches,
            max_queue_size: self.max_queue_size.max(self.logs_batch_size),
            recovery_interval: self.recovery_interval,
            retry_base_delay: self.retry_base_delay,
            retry_max_delay: self.retry_max_delay.max(self.retry_base_delay),
            shutdown_timeout: self.shutdown_timeout,
        })
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Ok(tenant_key) = env::var(BLOCKS_LMT_X_BLOCKS_KEY) {
            self.tenant_key = tenant_key;
        }
        if let Ok(service_id) = env::var(BLOCKS_LMT_SERVICE_ID) {
            self.service_id = service_id;
        }
        if let Ok(connection_string) = env::var(BLOCKS_LMT_CONNECTION_STRING) {
            self.connection_string = connection_string;
        }
        if let Some(size) = parse_env(BLOCKS_LMT_LOGS_BATCH_SIZE) {
            self.logs_batch_size = size;
        }
        if let Some(size) = parse_env(BLOCKS_LMT_TRACES_BATCH_SIZE) {
            self.traces_batch_size = size;
        }
        if let Some(seconds) = parse_env::<f64>(BLOCKS_LMT_FLUSH_INTERVAL_SECONDS) {
            match Duration::try_from_secs_f64(seconds) {
                Ok(interval) if !interval.is_zero() => self.flush_interval = interval,
                _ => {
                    lmt_warn!(
                        name: "Config.InvalidEnvValue",
                        variable = BLOCKS_LMT_FLUSH_INTERVAL_SECONDS,
                        value = seconds
                    );
                }
            }
        }
        if let Some(max_retries) = parse_env(BLOCKS_LMT_MAX_RETRIES) {
            self.max_retries = max_retries;
        }
        if let Some(max_failed) = parse_env(BLOCKS_LMT_MAX_FAILED_BATCHES) {
            self.max_failed_batches = max_failed;
        }
        if let Some(max_queue_size) = parse_env(BLOCKS_LMT_MAX_QUEUE_SIZE) {
            self.max_queue_size = max_queue_size;
        }
        self
    }
}

fn parse_env<T: FromStr>(name: &'static str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match T::from_str(raw.trim()) {
        Ok(value) => Some(value),
        Err(_) => {
            lmt_warn!(name: "Config.InvalidEnvValue", variable = name, value = raw);
            None
        }
    }
}
