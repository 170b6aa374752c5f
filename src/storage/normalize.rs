use url::Url;

/// Query parameters that only carry tracking or session noise
const TRACKING_PARAMS: &[&str] = &[
    "ref", "ref_", "tag", "gclid", "fbclid", "otracker", "otracker1", "fm", "iid", "ssid", "ppt",
    "ppn", "spm", "qid", "sr", "crid", "sprefix", "dib", "dib_tag", "_encoding", "content-id",
];

const TRACKING_PREFIXES: &[&str] = &["utm_", "pf_rd_", "pd_rd_"];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&key.as_str()) || TRACKING_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Normalize a URL into the key used by the cache and the visited log.
///
/// Scheme and host are lowercased, default ports, fragments and tracking
/// parameters are dropped, the remaining query pairs are sorted and a
/// trailing slash on a non-root path is removed. Input that does not parse
/// is returned trimmed. Normalizing twice gives the same result as once.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();

    let mut normalized = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(_) => return trimmed.to_string(),
    };

    // Remove default ports
    if let Some(port) = normalized.port() {
        if (normalized.scheme() == "http" && port == 80) || (normalized.scheme() == "https" && port == 443) {
            let _ = normalized.set_port(None);
        }
    }

    // Remove trailing slashes, keeping the root path
    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
    }

    // Drop tracking parameters and sort the rest
    let mut params: Vec<(String, String)> = normalized
        .query_pairs()
        .filter(|(k, _)| !k.is_empty() && !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        normalized.set_query(None);
    } else {
        normalized.query_pairs_mut().clear().extend_pairs(params.iter());
    }

    // Remove fragments (anchors)
    normalized.set_fragment(None);

    normalized.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        // Test case insensitivity in host
        assert_eq!(normalize_url("https://EXAMPLE.com/path"), "https://example.com/path");

        // Test removal of default ports
        assert_eq!(normalize_url("https://example.com:443/path"), "https://example.com/path");

        // Test removal of trailing slash
        assert_eq!(normalize_url("https://example.com/dp/B0C1/"), "https://example.com/dp/B0C1");
        assert_eq!(normalize_url("https://example.com"), "https://example.com/");

        // Test query parameter sorting
        assert_eq!(
            normalize_url("https://example.com/search?b=2&a=1"),
            "https://example.com/search?a=1&b=2"
        );

        // Test fragment removal
        assert_eq!(normalize_url("https://example.com/page#section"), "https://example.com/page");
    }

    #[test]
    fn test_tracking_params_dropped() {
        assert_eq!(
            normalize_url("https://www.shop.example/dp/B0C1?utm_source=x&psc=1&ref_=nav&pd_rd_w=abc"),
            "https://www.shop.example/dp/B0C1?psc=1"
        );
        assert_eq!(
            normalize_url("https://www.shop.example/p/itm1?otracker=search&pid=MOB1"),
            "https://www.shop.example/p/itm1?pid=MOB1"
        );
    }

    #[test]
    fn test_unparsable_input_is_trimmed() {
        assert_eq!(normalize_url("  not a url  "), "not a url");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "https://EXAMPLE.com:443/a/b/?z=1&y=2#frag",
            "http://example.com:80",
            "https://example.com/search?q=red+shoes&page=2&utm_medium=email",
            "https://example.com/p?name=a%20b&x=%2F",
            "https://example.com/p?flag&x=",
            "HTTPS://Example.COM///",
            "ftp://files.example.com/pub/",
            "mailto:someone@example.com",
            "garbage input",
            "",
        ];

        for sample in samples {
            let once = normalize_url(sample);
            assert_eq!(normalize_url(&once), once, "not idempotent for {}", sample);
        }
    }
}
