use reqwest::Url;

/// Parse "true"/"false"/"1"/"0" from an owned String.
pub fn parse_bool_flag(s: String) -> Option<bool> {
    parse_bool_str(&s)
}

/// Parse "true"/"false"/"1"/"0" from a &str.
pub fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Returns true for localhost, loopback IPv4/IPv6, and 0.0.0.0 URLs.
pub fn is_local_endpoint_url(url: &str) -> bool {
    let parsed = match Url::parse(url.trim()) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };

    match parsed.host_str() {
        Some(host) => {
            let normalized = host.trim().to_ascii_lowercase();
            normalized == "localhost"
                || normalized == "::1"
                || normalized == "0.0.0.0"
                || normalized.starts_with("127.")
        }
        None => false,
    }
}

pub fn env_override_usize(key: &str, default: usize, min: usize, max: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_helpers() {
        assert_eq!(parse_bool_str("true"), Some(true));
        assert_eq!(parse_bool_str("0"), Some(false));
        assert_eq!(parse_bool_flag("YES".to_string()), Some(true));
        assert_eq!(parse_bool_flag("off".to_string()), Some(false));
        assert_eq!(parse_bool_str("maybe"), None);
    }

    #[test]
    fn test_is_local_endpoint_url_normalizes_case_and_space() {
        assert!(is_local_endpoint_url(
            " HTTP://LOCALHOST:8000/v1/completions "
        ));
        assert!(is_local_endpoint_url("https://127.0.0.1/v1/completions"));
        assert!(is_local_endpoint_url("https://0.0.0.0/v1/completions"));
        assert!(!is_local_endpoint_url(
            "https://evil-localhost.com/v1/completions"
        ));
        assert!(!is_local_endpoint_url(
            "https://api.openai.com/v1/chat/completions"
        ));
    }

    #[test]
    fn test_env_override_usize_clamps_and_defaults() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        std::env::remove_var("CHATCELL_TEST_OVERRIDE");
        assert_eq!(
            env_override_usize("CHATCELL_TEST_OVERRIDE", 50, 10, 1000),
            50
        );
        std::env::set_var("CHATCELL_TEST_OVERRIDE", "5");
        assert_eq!(
            env_override_usize("CHATCELL_TEST_OVERRIDE", 50, 10, 1000),
            10
        );
        std::env::set_var("CHATCELL_TEST_OVERRIDE", "200");
        assert_eq!(
            env_override_usize("CHATCELL_TEST_OVERRIDE", 50, 10, 1000),
            200
        );
        std::env::remove_var("CHATCELL_TEST_OVERRIDE");
    }
}
