//! User-supplied reporter options.
//!
//! Options are held as an untyped JSON object, the same shape whether they
//! were built in code, deserialized from a request, or loaded from a TOML
//! file. Typing happens once, in [`Configuration::new`], which validates every
//! recognized key and ignores the rest.
//!
//! [`Configuration::new`]: crate::Configuration::new

use std::path::Path;

use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{ConfigError, Result},
    mode::{LogLevel, ReportMode},
};

/// Option key for the project id.
pub const PROJECT_ID: &str = "projectId";
/// Option key for the API key.
pub const KEY: &str = "key";
/// Option key for the credentials file path.
pub const KEY_FILENAME: &str = "keyFilename";
/// Option key for an inline credentials object.
pub const CREDENTIALS: &str = "credentials";
/// Option key for the service context object.
pub const SERVICE_CONTEXT: &str = "serviceContext";
/// Option key for the report mode.
pub const REPORT_MODE: &str = "reportMode";
/// Deprecated boolean predecessor of [`REPORT_MODE`].
pub const IGNORE_ENVIRONMENT_CHECK: &str = "ignoreEnvironmentCheck";
/// Option key for panic reporting.
pub const REPORT_UNHANDLED_REJECTIONS: &str = "reportUnhandledRejections";
/// Option key for a custom API endpoint.
pub const API_ENDPOINT: &str = "apiEndpoint";
/// Option key for the client's log level.
pub const LOG_LEVEL: &str = "logLevel";

/// Untyped reporter options with typed builder setters.
///
/// # Example
///
/// ```
/// use errata_core::{ReportMode, ReporterOptions};
///
/// let options = ReporterOptions::new()
///     .project_id("my-project")
///     .service("checkout")
///     .version("1.4.2")
///     .report_mode(ReportMode::Always);
///
/// assert!(options.contains("serviceContext"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReporterOptions {
    values: Map<String, Value>,
}

impl ReporterOptions {
    /// Creates empty options; every setting falls back to the environment or
    /// its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an arbitrary JSON value, which must be an object.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotAnObject`] for any other JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(values) => Ok(Self { values }),
            Value::Null => Ok(Self::new()),
            _ => Err(ConfigError::NotAnObject),
        }
    }

    /// Loads options from a TOML file using the same camelCase keys.
    ///
    /// ```toml
    /// projectId = "my-project"
    /// reportMode = "always"
    ///
    /// [serviceContext]
    /// service = "checkout"
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if the file is missing or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::Load {
                path: path.to_path_buf(),
                message: "file not found".to_string(),
            });
        }

        let values: Map<String, Value> = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| ConfigError::Load { path: path.to_path_buf(), message: e.to_string() })?;

        Ok(Self { values })
    }

    /// Sets a raw option value, bypassing typed setters.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Returns the raw value of an option.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns true if the option was supplied, even with a null value.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Merges `other` on top of these options, key by key.
    ///
    /// `serviceContext` objects are merged field by field so that a service
    /// name from one source and a version from another both survive.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        for (key, value) in other.values {
            if key == SERVICE_CONTEXT {
                if let (Some(Value::Object(existing)), Value::Object(incoming)) =
                    (self.values.get_mut(&key), &value)
                {
                    existing.extend(incoming.clone());
                    continue;
                }
            }
            self.values.insert(key, value);
        }
        self
    }

    /// Sets the project id.
    #[must_use]
    pub fn project_id(self, project_id: impl Into<String>) -> Self {
        self.set(PROJECT_ID, Value::String(project_id.into()))
    }

    /// Sets a numeric project id; it is resolved to its decimal string form.
    #[must_use]
    pub fn project_number(self, project_number: u64) -> Self {
        self.set(PROJECT_ID, project_number)
    }

    /// Sets an API key, which takes precedence over OAuth2 credentials.
    #[must_use]
    pub fn key(self, key: impl Into<String>) -> Self {
        self.set(KEY, Value::String(key.into()))
    }

    /// Sets the path of a credentials JSON file.
    #[must_use]
    pub fn key_filename(self, path: impl AsRef<Path>) -> Self {
        self.set(KEY_FILENAME, path.as_ref().to_string_lossy().into_owned())
    }

    /// Sets inline credentials, in the same format as a credentials file.
    #[must_use]
    pub fn credentials(self, credentials: Value) -> Self {
        self.set(CREDENTIALS, credentials)
    }

    /// Sets the service name of the service context.
    #[must_use]
    pub fn service(self, service: impl Into<String>) -> Self {
        self.service_context_field("service", service.into())
    }

    /// Sets the version of the service context.
    #[must_use]
    pub fn version(self, version: impl Into<String>) -> Self {
        self.service_context_field("version", version.into())
    }

    /// Sets the report mode.
    #[must_use]
    pub fn report_mode(self, mode: ReportMode) -> Self {
        self.set(REPORT_MODE, mode.as_str())
    }

    /// Sets the deprecated environment-check toggle.
    #[must_use]
    pub fn ignore_environment_check(self, ignore: bool) -> Self {
        self.set(IGNORE_ENVIRONMENT_CHECK, ignore)
    }

    /// Enables or disables panic reporting.
    #[must_use]
    pub fn report_unhandled_rejections(self, enabled: bool) -> Self {
        self.set(REPORT_UNHANDLED_REJECTIONS, enabled)
    }

    /// Sets a custom API endpoint, as a host or a base URL.
    #[must_use]
    pub fn api_endpoint(self, endpoint: impl Into<String>) -> Self {
        self.set(API_ENDPOINT, Value::String(endpoint.into()))
    }

    /// Sets the client's log level.
    #[must_use]
    pub fn log_level(self, level: LogLevel) -> Self {
        self.set(LOG_LEVEL, level as u8)
    }

    fn service_context_field(mut self, field: &str, value: String) -> Self {
        let entry =
            self.values.entry(SERVICE_CONTEXT).or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(context) = entry {
            context.insert(field.to_string(), Value::String(value));
        }
        self
    }
}
