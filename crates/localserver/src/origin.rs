//! Origin allowlist policy (spec.md §4.8).

const SAFARI_EXTENSION_PREFIX: &str = "safari-web-extension://";

/// `originIsAllowlisted` (spec.md §4.8): empty origin is allowed, any origin
/// in the configured closed set is allowed, the `safari-web-extension://`
/// scheme prefix is always allowed regardless of configuration, and any
/// origin whose host matches one of the configured brand suffixes is
/// allowed (`domainMatchesBrandAllowedSuffixes`).
pub fn is_allowlisted(origin: &str, allowlist: &[String], brand_suffixes: &[String]) -> bool {
    origin.is_empty()
        || allowlist.iter().any(|allowed| allowed == origin)
        || origin.starts_with(SAFARI_EXTENSION_PREFIX)
        || domain_matches_brand_allowed_suffixes(origin, brand_suffixes)
}

/// `domainMatchesBrandAllowedSuffixes` (spec.md §4.8): the origin's host
/// equals a configured suffix or ends with `.<suffix>`. Suffixes are stored
/// without a leading dot (e.g. `"kolide.com"`).
fn domain_matches_brand_allowed_suffixes(origin: &str, suffixes: &[String]) -> bool {
    let Ok(parsed) = url::Url::parse(origin) else { return false };
    let Some(host) = parsed.host_str() else { return false };
    suffixes.iter().any(|suffix| host == suffix.as_str() || host.ends_with(&format!(".{suffix}")))
}

/// Strip CR/LF before logging an origin (spec.md §4.8), preventing log
/// injection via a crafted `Origin` header.
pub fn sanitize_for_log(origin: &str) -> String {
    origin.chars().filter(|c| *c != '\n' && *c != '\r').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist() -> Vec<String> {
        vec!["chrome-extension://aleggnlehbiclcgojilbanaedaeihpmn".to_string()]
    }

    fn brand_suffixes() -> Vec<String> {
        vec!["kolide.com".to_string()]
    }

    /// Property 6: origin policy.
    #[test]
    fn empty_origin_is_allowed() {
        assert!(is_allowlisted("", &allowlist(), &brand_suffixes()));
    }

    #[test]
    fn safari_extension_prefix_is_always_allowed() {
        assert!(is_allowlisted("safari-web-extension://anything", &[], &[]));
    }

    #[test]
    fn arbitrary_origin_is_denied() {
        assert!(!is_allowlisted("https://example.com", &allowlist(), &brand_suffixes()));
    }

    #[test]
    fn configured_origin_is_allowed() {
        assert!(is_allowlisted(
            "chrome-extension://aleggnlehbiclcgojilbanaedaeihpmn",
            &allowlist(),
            &brand_suffixes()
        ));
    }

    #[test]
    fn brand_suffix_subdomain_is_allowed() {
        assert!(is_allowlisted("https://app.kolide.com", &[], &brand_suffixes()));
    }

    #[test]
    fn brand_suffix_bare_domain_is_allowed() {
        assert!(is_allowlisted("https://kolide.com", &[], &brand_suffixes()));
    }

    #[test]
    fn brand_suffix_does_not_match_unrelated_superstring_domain() {
        assert!(!is_allowlisted("https://notkolide.com", &[], &brand_suffixes()));
    }

    #[test]
    fn log_sanitization_strips_newlines() {
        assert_eq!(sanitize_for_log("https://evil\r\ninjected: true"), "https://evilinjected: true");
    }
}
