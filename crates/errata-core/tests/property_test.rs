//! Property-based tests for configuration resolution invariants.
//!
//! Service context precedence and report mode resolution must hold for every
//! combination of platform signals and explicit options.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use errata_core::{
    env::{
        APP_ENV, FUNCTION_NAME, GAE_MODULE_NAME, GAE_MODULE_VERSION, GAE_SERVICE, GAE_VERSION,
        K_REVISION, K_SERVICE,
    },
    Configuration, ReportMode, ReporterOptions, StaticEnvironment,
};
use proptest::{prelude::*, test_runner::Config as ProptestConfig};

fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 200,
        fork: false,
        failure_persistence: None,
        source_file: None,
        ..ProptestConfig::default()
    }
}

/// Platform signals, each either absent, empty, or a short name.
#[derive(Debug, Clone)]
struct Signals {
    k_service: Option<String>,
    k_revision: Option<String>,
    function_name: Option<String>,
    gae_service: Option<String>,
    gae_version: Option<String>,
    gae_module_name: Option<String>,
    gae_module_version: Option<String>,
}

impl Signals {
    fn environment(&self) -> StaticEnvironment {
        [
            (K_SERVICE, &self.k_service),
            (K_REVISION, &self.k_revision),
            (FUNCTION_NAME, &self.function_name),
            (GAE_SERVICE, &self.gae_service),
            (GAE_VERSION, &self.gae_version),
            (GAE_MODULE_NAME, &self.gae_module_name),
            (GAE_MODULE_VERSION, &self.gae_module_version),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.clone().map(|value| (key, value)))
        .collect()
    }

    /// Expected `(service, version)` from signals alone.
    fn expected(&self) -> (String, Option<String>) {
        fn set(value: &Option<String>) -> Option<String> {
            value.clone().filter(|v| !v.is_empty())
        }

        if let Some(service) = set(&self.k_service) {
            return (service, set(&self.k_revision));
        }
        if let Some(service) = set(&self.function_name) {
            return (service, None);
        }
        if let Some(service) = set(&self.gae_service) {
            return (service, set(&self.gae_version));
        }
        if let Some(service) = set(&self.gae_module_name) {
            return (service, set(&self.gae_module_version));
        }
        ("rust".to_string(), None)
    }
}

fn signal() -> impl Strategy<Value = Option<String>> {
    prop_oneof![Just(None), Just(Some(String::new())), "[a-z][a-z0-9-]{0,11}".prop_map(Some),]
}

fn signals_strategy() -> impl Strategy<Value = Signals> {
    (signal(), signal(), signal(), signal(), signal(), signal(), signal()).prop_map(
        |(
            k_service,
            k_revision,
            function_name,
            gae_service,
            gae_version,
            gae_module_name,
            gae_module_version,
        )| Signals {
            k_service,
            k_revision,
            function_name,
            gae_service,
            gae_version,
            gae_module_name,
            gae_module_version,
        },
    )
}

fn override_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[A-Z][a-z]{0,7}")
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn explicit_fields_override_detected_fields_independently(
        signals in signals_strategy(),
        service in override_strategy(),
        version in override_strategy(),
    ) {
        let mut options = ReporterOptions::new();
        if let Some(service) = &service {
            options = options.service(service.clone());
        }
        if let Some(version) = &version {
            options = options.version(version.clone());
        }

        let config = Configuration::new(&options, signals.environment().shared()).unwrap();
        let (detected_service, detected_version) = signals.expected();

        prop_assert_eq!(&config.service_context().service, &service.unwrap_or(detected_service));
        prop_assert_eq!(&config.service_context().version, &version.or(detected_version));
    }

    #[test]
    fn report_mode_strings_parse_in_any_case(
        mode in prop::sample::select(vec!["production", "always", "never"]),
        upper in prop::collection::vec(any::<bool>(), 10),
        app_env in prop::option::of(prop::sample::select(vec!["production", "staging", ""])),
    ) {
        let mixed: String = mode
            .chars()
            .zip(upper.iter().cycle())
            .map(|(c, upper)| if *upper { c.to_ascii_uppercase() } else { c })
            .collect();
        let mut env = StaticEnvironment::new();
        if let Some(app_env) = app_env {
            env = env.with(APP_ENV, app_env);
        }

        let config =
            Configuration::new(&ReporterOptions::new().set("reportMode", mixed), env.shared())
                .unwrap();

        let expected: ReportMode = mode.parse().unwrap();
        prop_assert_eq!(config.report_mode(), expected);
        prop_assert_eq!(config.is_reporting_enabled(), expected != ReportMode::Never);
        let should_report = match expected {
            ReportMode::Always => true,
            ReportMode::Never => false,
            ReportMode::Production => app_env == Some("production"),
        };
        prop_assert_eq!(config.should_report_errors_to_api(), should_report);
    }

    #[test]
    fn unknown_report_modes_always_fail(mode in "[a-z]{1,12}") {
        prop_assume!(!["production", "always", "never"].contains(&mode.as_str()));

        let result = Configuration::new(
            &ReporterOptions::new().set("reportMode", mode),
            StaticEnvironment::new().shared(),
        );

        prop_assert!(result.is_err());
    }
}
