//! SSRF guard for user-influenced outbound URLs.
//!
//! This is the single implementation used by the engine's HTTP action and
//! the integration verification worker. Checks run before DNS resolution;
//! the HTTP client resolves and connects in one step, so there is no
//! separate post-resolution hop to re-check.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::error::CoreError;

/// Parse and vet a caller-supplied URL for outbound use.
///
/// Rejects non-http(s) schemes and hosts that are loopback, link-local or
/// RFC1918 — `localhost`, `127.0.0.0/8`, `10.0.0.0/8`, `192.168.0.0/16`,
/// `172.16.0.0/12`, `169.254.0.0/16` and `::1`.
pub fn validate_outbound_url(raw: &str) -> Result<Url, CoreError> {
    let url = Url::parse(raw)
        .map_err(|_| CoreError::Validation(format!("invalid URL: {}", raw)))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CoreError::Validation(format!(
                "unsupported URL scheme: {}",
                other
            )))
        }
    }

    match url.host() {
        None => Err(CoreError::Validation("URL has no host".to_string())),
        Some(Host::Domain(domain)) => {
            let lower = domain.to_ascii_lowercase();
            if lower == "localhost" || lower.ends_with(".localhost") {
                Err(blocked(domain))
            } else {
                Ok(url.clone())
            }
        }
        Some(Host::Ipv4(addr)) => {
            if is_blocked_v4(addr) {
                Err(blocked(&addr.to_string()))
            } else {
                Ok(url.clone())
            }
        }
        Some(Host::Ipv6(addr)) => {
            if is_blocked_v6(addr) {
                Err(blocked(&addr.to_string()))
            } else {
                Ok(url.clone())
            }
        }
    }
}

fn blocked(host: &str) -> CoreError {
    CoreError::Forbidden(format!("request to reserved address blocked: {}", host))
}

fn is_blocked_v4(addr: Ipv4Addr) -> bool {
    let [a, b, _, _] = addr.octets();
    addr.is_loopback()                       // 127.0.0.0/8
        || a == 10                           // 10.0.0.0/8
        || (a == 192 && b == 168)            // 192.168.0.0/16
        || (a == 172 && (16..=31).contains(&b)) // 172.16.0.0/12
        || (a == 169 && b == 254) // 169.254.0.0/16
}

fn is_blocked_v6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() {
        return true;
    }
    // IPv6-mapped IPv4 is checked against the v4 ranges
    match addr.to_ipv4_mapped() {
        Some(v4) => is_blocked_v4(v4),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_blocked(raw: &str) -> bool {
        matches!(validate_outbound_url(raw), Err(CoreError::Forbidden(_)))
    }

    #[test]
    fn test_allows_public_hosts() {
        assert!(validate_outbound_url("https://api.stripe.com/v1/charges").is_ok());
        assert!(validate_outbound_url("http://example.test/webhook").is_ok());
        assert!(validate_outbound_url("https://8.8.8.8/status").is_ok());
    }

    #[test]
    fn test_blocks_loopback_and_private_ranges() {
        for target in [
            "http://localhost/",
            "http://LOCALHOST:8080/x",
            "http://sub.localhost/",
            "http://127.0.0.1/",
            "http://127.8.9.10/",
            "http://10.0.0.5/",
            "http://192.168.1.1/",
            "http://172.16.0.1/",
            "http://172.31.255.255/",
            "http://169.254.169.254/latest/meta-data",
            "http://[::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://[::ffff:10.1.2.3]/",
        ] {
            assert!(is_blocked(target), "{} should be blocked", target);
        }
    }

    #[test]
    fn test_allows_boundary_addresses() {
        // 172.15 and 172.32 fall outside 172.16.0.0/12
        assert!(validate_outbound_url("http://172.15.0.1/").is_ok());
        assert!(validate_outbound_url("http://172.32.0.1/").is_ok());
    }

    #[test]
    fn test_rejects_bad_schemes() {
        for target in ["ftp://example.test/", "file:///etc/passwd", "gopher://x/"] {
            assert!(matches!(
                validate_outbound_url(target),
                Err(CoreError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_rejects_unparseable() {
        assert!(matches!(
            validate_outbound_url("not a url"),
            Err(CoreError::Validation(_))
        ));
    }
}
