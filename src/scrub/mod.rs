//! Output scrubber: deterministic redaction of IPv4 addresses,
//! subscription UUIDs, and cluster FQDNs across a serialized envelope.
//! Walks a `serde_json::Value` tree rather than the typed envelope so it
//! works uniformly across every tool's payload shape.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const IPV4_TOKEN: &str = "<redacted-ipv4>";
const SUBSCRIPTION_TOKEN: &str = "<redacted-subscription-id>";
const FQDN_TOKEN: &str = "<redacted-cluster-fqdn>";

/// Octet-validated (0-255) IPv4 matcher. A naive `\d{1,3}(\.\d{1,3}){3}`
/// would also match four-part version strings more loosely than need be;
/// this still matches some (e.g. `1.30.5.0`) — a documented cosmetic
/// limitation rather than a correctness bug, since over-redaction never
/// leaks anything.
static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    let octet = r"(25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9]?[0-9])";
    Regex::new(&format!(r"\b{octet}\.{octet}\.{octet}\.{octet}\b")).unwrap()
});

/// Matches any RFC-4122 UUID; callers narrow to configured subscription IDs.
static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b").unwrap()
});

/// Scrubs sensitive values out of a JSON tree in place before serialization.
///
/// `subscription_ids` and `cluster_fqdns` come from the loaded
/// `ClusterRegistry`, so only values that actually identify a configured
/// cluster are redacted — node names are deliberately left untouched.
pub struct Scrubber {
    fqdn_re: Option<Regex>,
    subscription_ids: Vec<String>,
}

impl Scrubber {
    pub fn new(subscription_ids: Vec<String>, cluster_fqdns: Vec<String>) -> Self {
        let fqdn_re = if cluster_fqdns.is_empty() {
            None
        } else {
            let alternation = cluster_fqdns
                .iter()
                .map(|f| regex::escape(f))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"(?i)({alternation})")).ok()
        };
        Self {
            fqdn_re,
            subscription_ids,
        }
    }

    /// Scrub a single string value. Idempotent: running this twice on an
    /// already-scrubbed string is a no-op, because the redaction tokens
    /// themselves never match any of the three patterns.
    pub fn scrub_str(&self, input: &str) -> String {
        let mut out = input.to_string();
        if let Some(re) = &self.fqdn_re {
            out = re.replace_all(&out, FQDN_TOKEN).into_owned();
        }
        out = replace_matching_uuids(&UUID_RE, &out, &self.subscription_ids);
        out = IPV4_RE.replace_all(&out, IPV4_TOKEN).into_owned();
        out
    }

    /// Walk and scrub every string leaf of a JSON value, in place.
    pub fn scrub_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.scrub_str(s),
            Value::Array(items) => items.iter_mut().for_each(|v| self.scrub_value(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.scrub_value(v)),
            _ => {}
        }
    }

    /// Scrub a serializable envelope by round-tripping through `Value`.
    pub fn scrub_json<T: serde::Serialize>(&self, payload: &T) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(payload)?;
        self.scrub_value(&mut value);
        Ok(value)
    }
}

fn replace_matching_uuids(re: &Regex, input: &str, subscription_ids: &[String]) -> String {
    if subscription_ids.is_empty() {
        return input.to_string();
    }
    re.replace_all(input, |caps: &regex::Captures| {
        let matched = &caps[0];
        if subscription_ids.iter().any(|id| id.eq_ignore_ascii_case(matched)) {
            SUBSCRIPTION_TOKEN.to_string()
        } else {
            matched.to_string()
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scrubber() -> Scrubber {
        Scrubber::new(
            vec!["11111111-1111-1111-1111-111111111111".to_string()],
            vec!["aks-dev-eastus.hcp.eastus.azmk8s.io".to_string()],
        )
    }

    #[test]
    fn redacts_configured_subscription_uuid() {
        let s = scrubber();
        let out = s.scrub_str("subscription 11111111-1111-1111-1111-111111111111 is over quota");
        assert!(out.contains(SUBSCRIPTION_TOKEN));
        assert!(!out.contains("11111111"));
    }

    #[test]
    fn leaves_unrelated_uuid_alone() {
        let s = scrubber();
        let out = s.scrub_str("request id 22222222-2222-2222-2222-222222222222 failed");
        assert!(out.contains("22222222-2222-2222-2222-222222222222"));
    }

    #[test]
    fn redacts_ipv4_with_octet_validation() {
        let s = scrubber();
        assert!(s.scrub_str("connect to 10.0.0.5 failed").contains(IPV4_TOKEN));
        // 999 is not a valid octet, so this is left alone.
        assert_eq!(s.scrub_str("version 999.0.0.1"), "version 999.0.0.1");
    }

    #[test]
    fn redacts_cluster_fqdn() {
        let s = scrubber();
        let out = s.scrub_str("dial tcp aks-dev-eastus.hcp.eastus.azmk8s.io:443: timeout");
        assert!(out.contains(FQDN_TOKEN));
    }

    #[test]
    fn preserves_node_names() {
        let s = scrubber();
        assert_eq!(s.scrub_str("aks-nodepool1-12345678-vmss000000"), "aks-nodepool1-12345678-vmss000000");
    }

    #[test]
    fn scrubbing_is_idempotent() {
        let s = scrubber();
        let input = "10.0.0.5 11111111-1111-1111-1111-111111111111 aks-dev-eastus.hcp.eastus.azmk8s.io";
        let once = s.scrub_str(input);
        let twice = s.scrub_str(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn scrub_value_walks_nested_structures() {
        let s = scrubber();
        let mut v = json!({
            "cluster": "dev-eastus",
            "nodes": ["10.0.0.5", {"ip": "10.0.0.6"}],
        });
        s.scrub_value(&mut v);
        assert_eq!(v["nodes"][0], IPV4_TOKEN);
        assert_eq!(v["nodes"][1]["ip"], IPV4_TOKEN);
    }
}
