//! Configuration resolution for the error reporting client.
//!
//! A [`Configuration`] is resolved once from three sources, per field, in
//! priority order:
//! 1. User options ([`ReporterOptions`]), when present and correctly typed
//! 2. Values detected from the environment and runtime platform
//! 3. Built-in defaults
//!
//! Every recognized option is validated up front and all failures are
//! returned together. After construction the configuration is read-only;
//! the only mutable state is the write-once project-id cache.

use std::{path::PathBuf, sync::Arc};

use serde_json::{Map, Value};
use tracing::warn;

use crate::{
    env::{
        Environment, ProcessEnvironment, APP_ENV, GCLOUD_ERRORS_LOGLEVEL, GCLOUD_PROJECT,
        GOOGLE_CLOUD_PROJECT,
    },
    error::{ConfigError, ProjectLookupError, Result, ValidationError},
    mode::{LogLevel, ReportMode},
    options::{
        ReporterOptions, API_ENDPOINT, CREDENTIALS, IGNORE_ENVIRONMENT_CHECK, KEY, KEY_FILENAME,
        LOG_LEVEL, PROJECT_ID, REPORT_MODE, REPORT_UNHANDLED_REJECTIONS, SERVICE_CONTEXT,
    },
    project::{ProjectIdCache, ProjectIdLookup},
    service::ServiceContext,
};

/// Base URL of the public Cloud Error Reporting API.
pub const DEFAULT_API_ENDPOINT: &str = "https://clouderrorreporting.googleapis.com";

/// Value of [`APP_ENV`] that permits reporting in [`ReportMode::Production`].
pub const PRODUCTION: &str = "production";

/// Warning emitted when the deprecated toggle is used.
pub const DEPRECATED_TOGGLE_WARNING: &str = "The \"ignoreEnvironmentCheck\" config option is \
                                             deprecated.  Use the \"reportMode\" config option \
                                             instead.";

/// Warning emitted when both the deprecated toggle and `reportMode` are set.
pub const CONFLICTING_MODE_WARNING: &str = "Both the \"ignoreEnvironmentCheck\" and \
                                            \"reportMode\" configuration options have been \
                                            specified.  The \"reportMode\" option will take \
                                            precedence.";

/// Warning emitted when production mode is configured outside production.
pub const NOT_PRODUCTION_WARNING: &str = "The error reporting client is configured to report \
                                          errors if and only if the APP_ENV environment variable \
                                          is set to \"production\".  Errors will not be \
                                          reported.  To have errors always reported, regardless \
                                          of the value of APP_ENV, set the reportMode \
                                          configuration option to \"always\".";

/// Resolved, validated client configuration.
///
/// # Example
///
/// ```
/// use errata_core::{Configuration, ReportMode, ReporterOptions, StaticEnvironment};
///
/// let env = StaticEnvironment::new().with("K_SERVICE", "checkout").with("K_REVISION", "r1");
/// let options = ReporterOptions::new().report_mode(ReportMode::Always);
///
/// let config = Configuration::new(&options, env.shared()).unwrap();
///
/// assert_eq!(config.service_context().service, "checkout");
/// assert!(config.should_report_errors_to_api());
/// ```
#[derive(Debug)]
pub struct Configuration {
    report_mode: ReportMode,
    service_context: ServiceContext,
    project_id: ProjectIdCache,
    key: Option<String>,
    key_filename: Option<PathBuf>,
    credentials: Option<Map<String, Value>>,
    report_unhandled_rejections: bool,
    api_endpoint: String,
    log_level: LogLevel,
    warnings: Vec<String>,
    env: Arc<dyn Environment>,
}

impl Configuration {
    /// Resolves a configuration from options and an environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] listing every option that failed
    /// validation.
    pub fn new(options: &ReporterOptions, env: Arc<dyn Environment>) -> Result<Self> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let key = collect(&mut errors, optional_string(options, KEY, ValidationError::Key));
        let key_filename = collect(
            &mut errors,
            optional_string(options, KEY_FILENAME, ValidationError::KeyFilename),
        );
        let credentials = collect(&mut errors, optional_credentials(options));
        let report_unhandled_rejections = collect(
            &mut errors,
            optional_bool(
                options,
                REPORT_UNHANDLED_REJECTIONS,
                ValidationError::ReportUnhandledRejections,
            ),
        );
        let ignore_environment_check = collect(
            &mut errors,
            optional_bool(options, IGNORE_ENVIRONMENT_CHECK, ValidationError::IgnoreEnvironmentCheck),
        );
        let report_mode = collect(&mut errors, optional_report_mode(options));
        let (service, version) = service_overrides(options, &mut errors);
        let project_id = collect(&mut errors, optional_project_id(options));
        let api_endpoint = collect(&mut errors, optional_api_endpoint(options));
        let log_level = collect(&mut errors, optional_log_level(options));

        if !errors.is_empty() {
            return Err(ConfigError::Invalid { errors });
        }

        let report_mode =
            resolve_report_mode(report_mode.flatten(), ignore_environment_check.flatten(), &mut warnings);
        let service_context = ServiceContext::resolve(env.as_ref(), service, version);
        let project_id = project_id
            .flatten()
            .or_else(|| env.non_empty(GCLOUD_PROJECT))
            .or_else(|| env.non_empty(GOOGLE_CLOUD_PROJECT));
        let log_level = resolve_log_level(env.as_ref(), log_level.flatten(), &mut warnings);

        let mut config = Self {
            report_mode,
            service_context,
            project_id: ProjectIdCache::new(project_id),
            key: key.flatten(),
            key_filename: key_filename.flatten().map(PathBuf::from),
            credentials: credentials.flatten(),
            report_unhandled_rejections: report_unhandled_rejections.flatten().unwrap_or(false),
            api_endpoint: api_endpoint.flatten().unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
            log_level,
            warnings,
            env,
        };

        if config.is_reporting_enabled() && !config.should_report_errors_to_api() {
            emit_warning(&mut config.warnings, NOT_PRODUCTION_WARNING);
        }

        Ok(config)
    }

    /// Resolves a configuration against the process environment.
    ///
    /// # Errors
    ///
    /// See [`Configuration::new`].
    pub fn from_env(options: &ReporterOptions) -> Result<Self> {
        Self::new(options, ProcessEnvironment::shared())
    }

    /// Returns the configured report mode.
    pub fn report_mode(&self) -> ReportMode {
        self.report_mode
    }

    /// Returns false only when the report mode is `never`.
    pub fn is_reporting_enabled(&self) -> bool {
        self.report_mode != ReportMode::Never
    }

    /// Decides, at the moment of the call, whether events may be sent.
    ///
    /// `production` mode consults the deployment environment flag on every
    /// call, since it may change after the configuration is built.
    pub fn should_report_errors_to_api(&self) -> bool {
        match self.report_mode {
            ReportMode::Always => true,
            ReportMode::Never => false,
            ReportMode::Production => self.env.var(APP_ENV).as_deref() == Some(PRODUCTION),
        }
    }

    /// Returns the resolved service context.
    pub fn service_context(&self) -> &ServiceContext {
        &self.service_context
    }

    /// Returns the project id if it is already known, without a lookup.
    pub fn project_id(&self) -> Option<&str> {
        self.project_id.get()
    }

    /// Returns the project id, looking it up remotely on first use when it
    /// was not configured locally.
    ///
    /// # Errors
    ///
    /// Returns the lookup error when no id is cached and the lookup fails.
    pub async fn resolve_project_id(
        &self,
        lookup: &dyn ProjectIdLookup,
    ) -> std::result::Result<&str, ProjectLookupError> {
        self.project_id.resolve(lookup).await
    }

    /// Returns the API key, if configured.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Returns the credentials file path, if configured.
    pub fn key_filename(&self) -> Option<&PathBuf> {
        self.key_filename.as_ref()
    }

    /// Returns the inline credentials object, if configured.
    pub fn credentials(&self) -> Option<&Map<String, Value>> {
        self.credentials.as_ref()
    }

    /// Returns whether panics should be reported automatically.
    pub fn report_unhandled_rejections(&self) -> bool {
        self.report_unhandled_rejections
    }

    /// Returns the API base URL, without a trailing slash.
    pub fn api_endpoint(&self) -> &str {
        &self.api_endpoint
    }

    /// Returns the client's log level.
    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Returns the warnings emitted while resolving this configuration.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Returns the environment this configuration was resolved against.
    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.env
    }
}

fn collect<T>(
    errors: &mut Vec<ValidationError>,
    result: std::result::Result<T, ValidationError>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            errors.push(error);
            None
        },
    }
}

fn emit_warning(warnings: &mut Vec<String>, message: &str) {
    warn!("{message}");
    warnings.push(message.to_string());
}

fn optional_string(
    options: &ReporterOptions,
    key: &str,
    error: ValidationError,
) -> std::result::Result<Option<String>, ValidationError> {
    match options.get(key) {
        None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(error),
    }
}

fn optional_bool(
    options: &ReporterOptions,
    key: &str,
    error: ValidationError,
) -> std::result::Result<Option<bool>, ValidationError> {
    match options.get(key) {
        None => Ok(None),
        Some(Value::Bool(value)) => Ok(Some(*value)),
        Some(_) => Err(error),
    }
}

fn optional_credentials(
    options: &ReporterOptions,
) -> std::result::Result<Option<Map<String, Value>>, ValidationError> {
    match options.get(CREDENTIALS) {
        None => Ok(None),
        Some(Value::Object(credentials)) => Ok(Some(credentials.clone())),
        Some(_) => Err(ValidationError::Credentials),
    }
}

fn optional_project_id(
    options: &ReporterOptions,
) -> std::result::Result<Option<String>, ValidationError> {
    match options.get(PROJECT_ID) {
        None => Ok(None),
        Some(Value::String(id)) if id.is_empty() => Ok(None),
        Some(Value::String(id)) => Ok(Some(id.clone())),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(_) => Err(ValidationError::ProjectId),
    }
}

fn optional_api_endpoint(
    options: &ReporterOptions,
) -> std::result::Result<Option<String>, ValidationError> {
    match options.get(API_ENDPOINT) {
        None => Ok(None),
        Some(Value::String(endpoint)) if !endpoint.trim().is_empty() => {
            let endpoint = endpoint.trim().trim_end_matches('/');
            if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                Ok(Some(endpoint.to_string()))
            } else {
                Ok(Some(format!("https://{endpoint}")))
            }
        },
        Some(_) => Err(ValidationError::ApiEndpoint),
    }
}

fn optional_log_level(
    options: &ReporterOptions,
) -> std::result::Result<Option<LogLevel>, ValidationError> {
    match options.get(LOG_LEVEL) {
        None => Ok(None),
        Some(value) => {
            value.as_u64().and_then(LogLevel::from_number).map(Some).ok_or(ValidationError::LogLevel)
        },
    }
}

/// Returns `(service, version)` overrides from the `serviceContext` option.
/// Reads the `serviceContext` overrides, reporting every mistyped field.
fn service_overrides(
    options: &ReporterOptions,
    errors: &mut Vec<ValidationError>,
) -> (Option<String>, Option<String>) {
    let context = match options.get(SERVICE_CONTEXT) {
        None | Some(Value::Null) => return (None, None),
        Some(Value::Object(context)) => context,
        Some(_) => {
            errors.push(ValidationError::ServiceContext);
            return (None, None);
        },
    };

    let field = |name: &str, invalid: ValidationError| match context.get(name) {
        None => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(invalid),
    };
    let service = collect(errors, field("service", ValidationError::Service)).flatten();
    let version = collect(errors, field("version", ValidationError::Version)).flatten();

    (service, version)
}

fn optional_report_mode(
    options: &ReporterOptions,
) -> std::result::Result<Option<ReportMode>, ValidationError> {
    match options.get(REPORT_MODE) {
        None => Ok(None),
        Some(Value::String(mode)) => mode
            .parse::<ReportMode>()
            .map(Some)
            .map_err(|_| ValidationError::ReportMode { value: format!("{mode:?}") }),
        Some(other) => Err(ValidationError::ReportMode { value: other.to_string() }),
    }
}

/// Combines `reportMode` with the deprecated `ignoreEnvironmentCheck`
/// toggle; `reportMode` wins when both are set.
fn resolve_report_mode(
    report_mode: Option<ReportMode>,
    ignore_environment_check: Option<bool>,
    warnings: &mut Vec<String>,
) -> ReportMode {
    let Some(ignore) = ignore_environment_check else {
        return report_mode.unwrap_or_default();
    };

    emit_warning(warnings, DEPRECATED_TOGGLE_WARNING);

    match report_mode {
        Some(mode) => {
            emit_warning(warnings, CONFLICTING_MODE_WARNING);
            mode
        },
        None if ignore => ReportMode::Always,
        None => ReportMode::Production,
    }
}

/// Resolves the log level; a valid `GCLOUD_ERRORS_LOGLEVEL` overrides the
/// configured level.
fn resolve_log_level(
    env: &dyn Environment,
    configured: Option<LogLevel>,
    warnings: &mut Vec<String>,
) -> LogLevel {
    let configured = configured.unwrap_or_default();
    let Some(raw) = env.non_empty(GCLOUD_ERRORS_LOGLEVEL) else {
        return configured;
    };

    match raw.trim().parse::<u64>().ok().and_then(LogLevel::from_number) {
        Some(level) => level,
        None => {
            emit_warning(
                warnings,
                &format!(
                    "Ignoring {GCLOUD_ERRORS_LOGLEVEL}={raw:?}; expected an integer between 0 and 5"
                ),
            );
            configured
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::env::{StaticEnvironment, K_REVISION, K_SERVICE};

    fn resolve(options: ReporterOptions) -> Result<Configuration> {
        Configuration::new(&options, StaticEnvironment::new().shared())
    }

    fn resolve_with(options: ReporterOptions, env: StaticEnvironment) -> Result<Configuration> {
        Configuration::new(&options, env.shared())
    }

    #[test]
    fn defaults_without_options() {
        let config = resolve(ReporterOptions::new()).unwrap();

        assert_eq!(config.report_mode(), ReportMode::Production);
        assert_eq!(config.service_context(), &ServiceContext::new("rust", None));
        assert_eq!(config.project_id(), None);
        assert_eq!(config.key(), None);
        assert!(!config.report_unhandled_rejections());
        assert_eq!(config.api_endpoint(), DEFAULT_API_ENDPOINT);
        assert_eq!(config.log_level(), LogLevel::Warn);
    }

    #[test]
    fn each_invalid_field_is_reported() {
        let options = ReporterOptions::new()
            .set(KEY, 12)
            .set(KEY_FILENAME, false)
            .set(CREDENTIALS, "not-an-object")
            .set(REPORT_UNHANDLED_REJECTIONS, "yes")
            .set(REPORT_MODE, "sometimes")
            .set(SERVICE_CONTEXT, json!({"service": 1, "version": 2}));

        let error = resolve(options).unwrap_err();

        assert_eq!(
            error.validation_errors(),
            &[
                ValidationError::Key,
                ValidationError::KeyFilename,
                ValidationError::Credentials,
                ValidationError::ReportUnhandledRejections,
                ValidationError::ReportMode { value: "\"sometimes\"".to_string() },
                ValidationError::Service,
                ValidationError::Version,
            ]
        );
    }

    #[test]
    fn version_must_be_a_string() {
        let options = ReporterOptions::new().set(SERVICE_CONTEXT, json!({"version": 3}));
        let error = resolve(options).unwrap_err();
        assert!(error.contains(&ValidationError::Version));
    }

    #[test]
    fn report_mode_must_be_a_string() {
        let error = resolve(ReporterOptions::new().set(REPORT_MODE, true)).unwrap_err();
        assert!(matches!(error.validation_errors(), [ValidationError::ReportMode { .. }]));
    }

    #[test]
    fn report_mode_is_case_insensitive() {
        let config = resolve(ReporterOptions::new().set(REPORT_MODE, "ALWAYS")).unwrap();
        assert_eq!(config.report_mode(), ReportMode::Always);
    }

    #[test]
    fn report_modes_gate_submission() {
        let always = resolve(ReporterOptions::new().report_mode(ReportMode::Always)).unwrap();
        assert!(always.is_reporting_enabled());
        assert!(always.should_report_errors_to_api());

        let never = resolve(ReporterOptions::new().report_mode(ReportMode::Never)).unwrap();
        assert!(!never.is_reporting_enabled());
        assert!(!never.should_report_errors_to_api());

        let production =
            resolve(ReporterOptions::new().report_mode(ReportMode::Production)).unwrap();
        assert!(production.is_reporting_enabled());
        assert!(!production.should_report_errors_to_api());
        assert!(production.warnings().contains(&NOT_PRODUCTION_WARNING.to_string()));

        let in_production = resolve_with(
            ReporterOptions::new().report_mode(ReportMode::Production),
            StaticEnvironment::new().with(APP_ENV, PRODUCTION),
        )
        .unwrap();
        assert!(in_production.should_report_errors_to_api());
        assert!(in_production.warnings().is_empty());
    }

    #[test]
    fn deprecated_toggle_maps_to_modes() {
        let always = resolve(ReporterOptions::new().ignore_environment_check(true)).unwrap();
        assert_eq!(always.report_mode(), ReportMode::Always);
        assert_eq!(always.warnings(), &[DEPRECATED_TOGGLE_WARNING.to_string()]);

        let production = resolve(ReporterOptions::new().ignore_environment_check(false)).unwrap();
        assert_eq!(production.report_mode(), ReportMode::Production);
        assert_eq!(production.warnings()[0], DEPRECATED_TOGGLE_WARNING);
    }

    #[test]
    fn deprecated_toggle_must_be_boolean() {
        let error =
            resolve(ReporterOptions::new().set(IGNORE_ENVIRONMENT_CHECK, "true")).unwrap_err();
        assert_eq!(error.validation_errors(), &[ValidationError::IgnoreEnvironmentCheck]);
    }

    #[test]
    fn deprecated_toggle_is_type_checked_alongside_report_mode() {
        let options = ReporterOptions::new()
            .set(IGNORE_ENVIRONMENT_CHECK, "yes")
            .report_mode(ReportMode::Always);

        let error = resolve(options).unwrap_err();

        assert_eq!(error.validation_errors(), &[ValidationError::IgnoreEnvironmentCheck]);
    }

    #[test]
    fn invalid_toggle_and_report_mode_are_both_reported() {
        let options =
            ReporterOptions::new().set(IGNORE_ENVIRONMENT_CHECK, 1).set(REPORT_MODE, "sometimes");

        let error = resolve(options).unwrap_err();

        assert_eq!(
            error.validation_errors(),
            &[
                ValidationError::IgnoreEnvironmentCheck,
                ValidationError::ReportMode { value: "\"sometimes\"".to_string() },
            ]
        );
    }

    #[test]
    fn report_mode_wins_over_deprecated_toggle() {
        let options =
            ReporterOptions::new().ignore_environment_check(true).report_mode(ReportMode::Never);

        let config = resolve(options).unwrap();

        assert_eq!(config.report_mode(), ReportMode::Never);
        assert_eq!(
            config.warnings(),
            &[DEPRECATED_TOGGLE_WARNING.to_string(), CONFLICTING_MODE_WARNING.to_string()]
        );
    }

    #[test]
    fn numeric_project_id_is_coerced() {
        let config = resolve(ReporterOptions::new().project_number(123_456_789)).unwrap();
        assert_eq!(config.project_id(), Some("123456789"));
    }

    #[test]
    fn project_id_rejects_other_types() {
        let error = resolve(ReporterOptions::new().set(PROJECT_ID, json!({"id": 1}))).unwrap_err();
        assert!(error.contains(&ValidationError::ProjectId));
    }

    #[test]
    fn project_id_from_environment_when_not_configured() {
        let env = StaticEnvironment::new()
            .with(GCLOUD_PROJECT, "gcloud-project")
            .with(GOOGLE_CLOUD_PROJECT, "google-project");
        let config = resolve_with(ReporterOptions::new(), env.clone()).unwrap();
        assert_eq!(config.project_id(), Some("gcloud-project"));

        let config = resolve_with(ReporterOptions::new().project_id("explicit"), env).unwrap();
        assert_eq!(config.project_id(), Some("explicit"));
    }

    #[test]
    fn explicit_service_context_overrides_platform() {
        let env = StaticEnvironment::new().with(K_SERVICE, "run-svc").with(K_REVISION, "rev-3");

        let config = resolve_with(ReporterOptions::new().service("named"), env).unwrap();

        assert_eq!(config.service_context(), &ServiceContext::new("named", Some("rev-3".into())));
    }

    #[test]
    fn unknown_options_are_ignored() {
        let config = resolve(ReporterOptions::new().set("colour", "blue")).unwrap();
        assert_eq!(config.report_mode(), ReportMode::Production);
    }

    #[test]
    fn credentials_and_key_file_are_exposed() {
        let options = ReporterOptions::new()
            .key("api-key")
            .key_filename("/etc/keys/sa.json")
            .credentials(json!({"type": "authorized_user"}));

        let config = resolve(options).unwrap();

        assert_eq!(config.key(), Some("api-key"));
        assert_eq!(config.key_filename(), Some(&PathBuf::from("/etc/keys/sa.json")));
        assert_eq!(config.credentials().and_then(|c| c.get("type")), Some(&json!("authorized_user")));
    }

    #[test]
    fn api_endpoint_is_normalized() {
        let config =
            resolve(ReporterOptions::new().api_endpoint("errors.example.com/")).unwrap();
        assert_eq!(config.api_endpoint(), "https://errors.example.com");

        let config =
            resolve(ReporterOptions::new().api_endpoint("http://127.0.0.1:8080")).unwrap();
        assert_eq!(config.api_endpoint(), "http://127.0.0.1:8080");

        let error = resolve(ReporterOptions::new().api_endpoint("  ")).unwrap_err();
        assert!(error.contains(&ValidationError::ApiEndpoint));
    }

    #[test]
    fn log_level_env_override_wins() {
        let env = StaticEnvironment::new().with(GCLOUD_ERRORS_LOGLEVEL, "5");
        let config = resolve_with(ReporterOptions::new().log_level(LogLevel::Error), env).unwrap();
        assert_eq!(config.log_level(), LogLevel::Trace);

        let env = StaticEnvironment::new().with(GCLOUD_ERRORS_LOGLEVEL, "loud");
        let config = resolve_with(ReporterOptions::new().log_level(LogLevel::Error), env).unwrap();
        assert_eq!(config.log_level(), LogLevel::Error);
        assert_eq!(config.warnings().len(), 2);

        let error = resolve(ReporterOptions::new().set(LOG_LEVEL, 9)).unwrap_err();
        assert!(error.contains(&ValidationError::LogLevel));
    }

    #[test]
    fn production_flag_is_read_at_call_time() {
        #[derive(Debug, Default)]
        struct FlippingEnvironment {
            production: std::sync::atomic::AtomicBool,
        }

        impl Environment for FlippingEnvironment {
            fn var(&self, key: &str) -> Option<String> {
                let production = self.production.load(std::sync::atomic::Ordering::SeqCst);
                (key == APP_ENV && production).then(|| PRODUCTION.to_string())
            }
        }

        let env = Arc::new(FlippingEnvironment::default());
        let config = Configuration::new(&ReporterOptions::new(), env.clone()).unwrap();
        assert!(!config.should_report_errors_to_api());

        env.production.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(config.should_report_errors_to_api());
    }
}
