use super::{SourceOptions, MAX_DURATION_MS};
use crate::error::ProviderError;

/// Validation errors for source options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionsValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for OptionsValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate source options, returning every violation found.
pub fn validate_options(options: &SourceOptions) -> Vec<OptionsValidationError> {
    let mut errors = Vec::new();
    let infisical = &options.infisical;

    let required = [
        ("infisical.siteUrl", &infisical.site_url),
        ("infisical.clientId", &infisical.client_id),
        ("infisical.clientSecret", &infisical.client_secret),
        ("infisical.environment", &infisical.environment),
        ("infisical.projectId", &infisical.project_id),
    ];

    for (path, value) in required {
        if value.trim().is_empty() {
            errors.push(OptionsValidationError {
                path: path.to_string(),
                message: "Value is required".to_string(),
            });
        }
    }

    if !infisical.site_url.trim().is_empty() {
        match url::Url::parse(&infisical.site_url) {
            Ok(url) if url.cannot_be_a_base() => errors.push(OptionsValidationError {
                path: "infisical.siteUrl".to_string(),
                message: format!("'{}' is not a base URL", infisical.site_url),
            }),
            Ok(_) => {}
            Err(e) => errors.push(OptionsValidationError {
                path: "infisical.siteUrl".to_string(),
                message: format!("Invalid URL: {e}"),
            }),
        }
    }

    if let Some(message) = check_duration("Timeout", options.timeout_ms) {
        errors.push(OptionsValidationError {
            path: "timeoutMs".to_string(),
            message,
        });
    }

    if let Some(message) = options
        .reload_after_ms
        .and_then(|ms| check_duration("Reload interval", ms))
    {
        errors.push(OptionsValidationError {
            path: "reloadAfterMs".to_string(),
            message,
        });
    }

    errors
}

fn check_duration(what: &str, ms: u64) -> Option<String> {
    if ms == 0 {
        Some(format!("{what} must be greater than 0"))
    } else if ms > MAX_DURATION_MS {
        Some(format!("{what} must not exceed {MAX_DURATION_MS} ms (365 days)"))
    } else {
        None
    }
}

/// Validate options and fold all violations into a configuration error.
pub fn validate_options_object(options: &SourceOptions) -> Result<(), ProviderError> {
    let errors = validate_options(options);
    if errors.is_empty() {
        Ok(())
    } else {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        Err(ProviderError::Configuration(messages.join("; ")))
    }
}
