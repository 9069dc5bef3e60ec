//! HTTP status code table
//!
//! Fixed mapping of response status to category, severity and retryability.
//! Statuses not listed fall through to `system/medium`, not retryable.

use crate::core::{ErrorCategory, Severity};

/// Classification of a single status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusClass {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    /// Canonical message when the body carries none
    pub description: &'static str,
    pub actions: &'static [&'static str],
}

const RETRY_LATER: &[&str] = &["Try again in a few moments"];
const CHECK_NETWORK: &[&str] = &["Check your network connection", "Try again in a few moments"];

const fn entry(
    category: ErrorCategory,
    severity: Severity,
    retryable: bool,
    description: &'static str,
    actions: &'static [&'static str],
) -> StatusClass {
    StatusClass {
        category,
        severity,
        retryable,
        description,
        actions,
    }
}

/// Look up the fixed table entry for `status`
pub fn classify_status(status: u16) -> StatusClass {
    use ErrorCategory::*;
    use Severity::*;

    match status {
        400 => entry(
            InputValidation,
            Low,
            false,
            "The request was invalid",
            &["Check the submitted values"],
        ),
        401 => entry(System, Medium, false, "Your session has expired", &["Sign in again"]),
        403 => entry(
            System,
            Medium,
            false,
            "You do not have permission to perform this action",
            &["Request access from an administrator"],
        ),
        404 => entry(
            InputValidation,
            Low,
            false,
            "The requested resource was not found",
            &["Verify the resource still exists"],
        ),
        408 => entry(Network, Medium, true, "The request timed out", CHECK_NETWORK),
        429 => entry(Network, Medium, true, "Too many requests", &["Wait before retrying"]),
        500 => entry(
            System,
            High,
            true,
            "The service encountered an internal error",
            RETRY_LATER,
        ),
        502 => entry(Network, High, true, "Bad gateway", RETRY_LATER),
        503 => entry(Network, High, true, "The service is unavailable", RETRY_LATER),
        504 => entry(Network, High, true, "The gateway timed out", RETRY_LATER),
        _ => entry(System, Medium, false, "The request failed", &[]),
    }
}

/// Whether the status means the user must authenticate again
pub fn requires_reauth(status: u16) -> bool {
    status == 401
}
