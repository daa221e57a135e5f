//! Events and options with sensible defaults.

use chrono::{TimeZone, Utc};
use errata_core::{ErrorEvent, ErrorMessage, ReportMode, ReporterOptions, ServiceContext};

/// Project id used by fixtures.
pub const TEST_PROJECT_ID: &str = "test-project";

/// Options that always report to `api_endpoint` for [`TEST_PROJECT_ID`].
pub fn reporting_options(api_endpoint: &str) -> ReporterOptions {
    ReporterOptions::new()
        .project_id(TEST_PROJECT_ID)
        .report_mode(ReportMode::Always)
        .api_endpoint(api_endpoint)
}

/// A minimal event with a fixed timestamp.
pub fn sample_event() -> ErrorEvent {
    sample_message().build()
}

/// Builder for [`sample_event`], for tests that add context.
pub fn sample_message() -> ErrorMessage {
    let event_time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().unwrap_or_else(Utc::now);
    ErrorMessage::at(ServiceContext::new("checkout", Some("1.4.2".into())), event_time)
        .message("TypeError: cannot read property 'id' of undefined")
}
