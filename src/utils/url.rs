//! Endpoint construction for the Ollama server URL.

/// Strips trailing slashes and, when the user left it out, prefixes `http://`
/// (Ollama is normally reached over plain HTTP on localhost).
///
/// # Examples
///
/// ```
/// use toolchat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:11434/"), "http://localhost:11434");
/// assert_eq!(normalize_base_url("gpu-box:11434"), "http://gpu-box:11434");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

/// Joins `endpoint` onto the normalized base without doubling slashes.
///
/// ```
/// use toolchat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:11434/", "/api/chat"),
///     "http://localhost:11434/api/chat"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalize_base_url(base_url), endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slashes_are_removed() {
        assert_eq!(
            normalize_base_url("http://localhost:11434///"),
            "http://localhost:11434"
        );
        assert_eq!(
            normalize_base_url("https://ollama.example.com/"),
            "https://ollama.example.com"
        );
    }

    #[test]
    fn bare_host_gets_http_scheme() {
        assert_eq!(normalize_base_url("127.0.0.1:11434"), "http://127.0.0.1:11434");
        assert_eq!(normalize_base_url("  localhost:11434/ "), "http://localhost:11434");
    }

    #[test]
    fn endpoints_join_cleanly() {
        for base in ["http://localhost:11434", "http://localhost:11434/"] {
            for endpoint in ["api/tags", "/api/tags"] {
                assert_eq!(
                    construct_api_url(base, endpoint),
                    "http://localhost:11434/api/tags"
                );
            }
        }
    }

    #[test]
    fn path_prefix_is_kept() {
        assert_eq!(
            construct_api_url("https://proxy.example.com/ollama/", "api/chat"),
            "https://proxy.example.com/ollama/api/chat"
        );
    }
}
