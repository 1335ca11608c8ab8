use reqwest::Url;
use serde_json::Value;
use thiserror::Error;

use super::error::ApiError;
use crate::config::RemoteConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShareUrlError {
    #[error("url is required")]
    Missing,
    #[error("not a valid URL: {0}")]
    Malformed(String),
    #[error("scheme '{0}' is not allowed")]
    Scheme(String),
    #[error("URL is not under an allowed share prefix")]
    NotAllowed,
}

/// Check a share reference against the remote settings.
///
/// `https` is always accepted, `http` only with `allow_insecure`. A non-empty
/// prefix list further restricts which references can be loaded.
pub fn validate_share_url(url: Option<&str>, remote: &RemoteConfig) -> Result<Url, ShareUrlError> {
    let raw = url.map(str::trim).filter(|raw| !raw.is_empty()).ok_or(ShareUrlError::Missing)?;
    let parsed = Url::parse(raw).map_err(|e| ShareUrlError::Malformed(e.to_string()))?;

    match parsed.scheme() {
        "https" => {}
        "http" if remote.allow_insecure => {}
        other => return Err(ShareUrlError::Scheme(other.to_string())),
    }
    if !parsed.has_host() {
        return Err(ShareUrlError::Malformed("missing host".into()));
    }

    if !remote.allowed_prefixes.is_empty()
        && !remote.allowed_prefixes.iter().any(|prefix| raw.starts_with(prefix.as_str()))
    {
        return Err(ShareUrlError::NotAllowed);
    }
    Ok(parsed)
}

pub fn require_string(value: Option<Value>, name: &str) -> Result<String, ApiError> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        _ => Err(ApiError::InvalidPayload(format!("{name} required"))),
    }
}

pub fn require_string_array(value: Option<Value>, name: &str) -> Result<Vec<String>, ApiError> {
    let Some(Value::Array(items)) = value else {
        return Err(ApiError::InvalidPayload(format!("{name} must be an array")));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            _ => Err(ApiError::InvalidPayload(format!("{name} must contain strings"))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_https_share_accepted() {
        let remote = RemoteConfig::default();
        let url = validate_share_url(Some("https://shares.example.com/s/abc"), &remote).unwrap();
        assert_eq!(url.host_str(), Some("shares.example.com"));
    }

    #[test]
    fn test_missing_and_malformed() {
        let remote = RemoteConfig::default();
        assert_eq!(validate_share_url(None, &remote), Err(ShareUrlError::Missing));
        assert_eq!(validate_share_url(Some("  "), &remote), Err(ShareUrlError::Missing));
        assert!(matches!(
            validate_share_url(Some("not a url"), &remote),
            Err(ShareUrlError::Malformed(_))
        ));
    }

    #[test]
    fn test_insecure_scheme() {
        let mut remote = RemoteConfig::default();
        assert_eq!(
            validate_share_url(Some("http://shares.example.com/s"), &remote),
            Err(ShareUrlError::Scheme("http".into()))
        );
        remote.allow_insecure = true;
        assert!(validate_share_url(Some("http://shares.example.com/s"), &remote).is_ok());
        assert!(validate_share_url(Some("file:///etc/passwd"), &remote).is_err());
    }

    #[test]
    fn test_allowed_prefixes() {
        let remote = RemoteConfig {
            allowed_prefixes: vec!["https://mega.nz/".into(), "https://mega.co.nz/".into()],
            ..RemoteConfig::default()
        };
        assert!(validate_share_url(Some("https://mega.nz/folder/x"), &remote).is_ok());
        assert_eq!(
            validate_share_url(Some("https://mega.nz.evil.example/x"), &remote),
            Err(ShareUrlError::NotAllowed)
        );
    }

    #[test]
    fn test_required_fields() {
        assert_eq!(require_string(Some(json!("s1-0")), "taskId").unwrap(), "s1-0");
        assert!(require_string(Some(json!("")), "taskId").is_err());
        assert!(require_string(Some(json!(5)), "taskId").is_err());
        assert!(require_string(None, "taskId").is_err());

        assert_eq!(
            require_string_array(Some(json!(["a", "b"])), "fileIds").unwrap(),
            vec!["a", "b"]
        );
        assert!(require_string_array(Some(json!("a")), "fileIds").is_err());
        assert!(require_string_array(Some(json!([1])), "fileIds").is_err());
    }
}
