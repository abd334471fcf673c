//! Provider header quirks.
//!
//! Known providers need non-standard auth or attribution headers. The
//! table is enumerable configuration, keyed by a fragment of the base
//! URL; anything unlisted gets the standard `Authorization: Bearer`.

struct ProviderQuirk {
    host_fragment: &'static str,
    auth_header: &'static str,
    auth_prefix: &'static str,
    extra: &'static [(&'static str, &'static str)],
}

const QUIRKS: &[ProviderQuirk] = &[
    ProviderQuirk {
        host_fragment: "azure",
        auth_header: "api-key",
        auth_prefix: "",
        extra: &[],
    },
    ProviderQuirk {
        host_fragment: "openrouter.ai",
        auth_header: "Authorization",
        auth_prefix: "Bearer ",
        extra: &[
            ("HTTP-Referer", "https://github.com/codeact"),
            ("X-Title", "codeact"),
        ],
    },
];

/// Headers to attach for a given base URL. An empty API key yields only
/// the non-auth extras (local servers need no key).
pub fn auth_headers(base_url: &str, api_key: &str) -> Vec<(String, String)> {
    let quirk = QUIRKS
        .iter()
        .find(|q| base_url.contains(q.host_fragment));

    let mut headers = Vec::new();
    let (auth_header, auth_prefix, extra) = match quirk {
        Some(q) => (q.auth_header, q.auth_prefix, q.extra),
        None => ("Authorization", "Bearer ", &[] as &[(&str, &str)]),
    };

    if !api_key.is_empty() {
        headers.push((auth_header.to_owned(), format!("{auth_prefix}{api_key}")));
    }
    for (name, value) in extra {
        headers.push(((*name).to_owned(), (*value).to_owned()));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_bearer() {
        let headers = auth_headers("http://localhost:11434/v1", "sk-x");
        assert_eq!(headers, vec![("Authorization".into(), "Bearer sk-x".into())]);
    }

    #[test]
    fn azure_uses_api_key_header() {
        let headers = auth_headers("https://myorg.openai.azure.com/openai", "k1");
        assert_eq!(headers, vec![("api-key".into(), "k1".into())]);
    }

    #[test]
    fn openrouter_adds_attribution() {
        let headers = auth_headers("https://openrouter.ai/api/v1", "k2");
        assert_eq!(headers.len(), 3);
        assert!(headers.iter().any(|(n, _)| n == "HTTP-Referer"));
        assert!(headers.iter().any(|(n, _)| n == "X-Title"));
    }

    #[test]
    fn empty_key_skips_auth() {
        let headers = auth_headers("http://localhost:1234/v1", "");
        assert!(headers.is_empty());
    }
}
