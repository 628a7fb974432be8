//! URL joining for proxy endpoints
//!
//! The server URL comes from user-edited settings, so it arrives with or
//! without a trailing slash. Everything that builds a request goes through
//! here so the two spellings produce the same endpoint.

/// Strip trailing slashes from a configured server URL.
///
/// # Examples
///
/// ```
/// use homelink_client::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://192.168.1.109:6969"), "http://192.168.1.109:6969");
/// assert_eq!(normalize_base_url("http://192.168.1.109:6969/"), "http://192.168.1.109:6969");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a configured server URL with an endpoint path.
///
/// # Examples
///
/// ```
/// use homelink_client::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://192.168.1.109:6969/", "chat"),
///     "http://192.168.1.109:6969/chat"
/// );
/// // The liveness endpoint is the bare root.
/// assert_eq!(
///     construct_api_url("http://192.168.1.109:6969", "/"),
///     "http://192.168.1.109:6969/"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalized_base, endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_any_number_of_trailing_slashes() {
        assert_eq!(normalize_base_url("http://host:6969"), "http://host:6969");
        assert_eq!(normalize_base_url("http://host:6969/"), "http://host:6969");
        assert_eq!(normalize_base_url("http://host:6969///"), "http://host:6969");
        assert_eq!(normalize_base_url(""), "");
    }

    #[test]
    fn construct_handles_slashes_on_either_side() {
        assert_eq!(
            construct_api_url("http://host:6969", "chat"),
            "http://host:6969/chat"
        );
        assert_eq!(
            construct_api_url("http://host:6969/", "/chat"),
            "http://host:6969/chat"
        );
        assert_eq!(
            construct_api_url("http://host:6969//", "models"),
            "http://host:6969/models"
        );
    }

    #[test]
    fn construct_with_root_path_yields_trailing_slash() {
        assert_eq!(construct_api_url("http://host:6969", "/"), "http://host:6969/");
        assert_eq!(construct_api_url("http://host:6969/", ""), "http://host:6969/");
    }
}
