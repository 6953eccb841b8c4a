//! Source model and the category source registry.

use serde::{Deserialize, Serialize};
use url::Url;

/// Trust tier of a host. Tier 1 evidence drives green traffic lights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Tier {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "unknown")]
    #[default]
    Unknown,
}

impl Tier {
    /// Ordering rank, higher is better.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::One => 3,
            Self::Two => 2,
            Self::Three => 1,
            Self::Unknown => 0,
        }
    }

    /// Human label used in evidence rows.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::One => "manufacturer-grade",
            Self::Two => "independent",
            Self::Three => "commerce",
            Self::Unknown => "unknown",
        }
    }
}

/// Role a host plays for this category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manufacturer,
    Lab,
    Review,
    Retailer,
    #[default]
    Other,
}

impl Role {
    /// Ordering rank, higher is better. Identity-bearing roles precede
    /// commerce.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Manufacturer => 5,
            Self::Lab => 4,
            Self::Review => 3,
            Self::Retailer => 2,
            Self::Other => 1,
        }
    }
}

/// One plannable source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub host: String,
    pub root_domain: String,
    pub tier: Tier,
    pub role: Role,
    pub approved_domain: bool,
}

impl Source {
    /// Derive a source from a URL plus registry knowledge.
    pub fn from_url(url: &str, registry: &SourceRegistry) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        let root_domain = root_domain(&host);
        let (tier, role, approved) = registry.classify(&host, &root_domain);
        Some(Self {
            url: url.to_string(),
            host,
            root_domain,
            tier,
            role,
            approved_domain: approved,
        })
    }
}

/// `sources.json`: approved hosts by role plus a denylist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub approved: ApprovedHosts,
    #[serde(default)]
    pub denylist: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovedHosts {
    #[serde(default)]
    pub manufacturer: Vec<String>,
    #[serde(default)]
    pub lab: Vec<String>,
    #[serde(default)]
    pub database: Vec<String>,
    #[serde(default)]
    pub retailer: Vec<String>,
}

impl SourceRegistry {
    /// Whether a host (or its root domain) is denied.
    #[must_use]
    pub fn is_denied(&self, host: &str) -> bool {
        let root = root_domain(host);
        self.denylist
            .iter()
            .any(|d| d.eq_ignore_ascii_case(host) || d.eq_ignore_ascii_case(&root))
    }

    /// Tier/role/approved for a host. Registry roles map onto planner roles:
    /// `database` entries plan as `review` at tier 2, retailers at tier 3,
    /// manufacturer and lab hosts at tier 1.
    #[must_use]
    pub fn classify(&self, host: &str, root: &str) -> (Tier, Role, bool) {
        let matches = |list: &[String]| {
            list.iter()
                .any(|h| h.eq_ignore_ascii_case(host) || h.eq_ignore_ascii_case(root))
        };
        if matches(&self.approved.manufacturer) {
            (Tier::One, Role::Manufacturer, true)
        } else if matches(&self.approved.lab) {
            (Tier::One, Role::Lab, true)
        } else if matches(&self.approved.database) {
            (Tier::Two, Role::Review, true)
        } else if matches(&self.approved.retailer) {
            (Tier::Three, Role::Retailer, true)
        } else {
            (Tier::Unknown, Role::Other, false)
        }
    }
}

/// eTLD+1 by heuristic: last two labels, or last three when the ending pair
/// is a well-known second-level suffix (`co.uk`, `com.au`, ...).
#[must_use]
pub fn root_domain(host: &str) -> String {
    const TWO_PART_SUFFIXES: &[&str] = &[
        "co.uk", "org.uk", "ac.uk", "gov.uk", "com.au", "net.au", "org.au", "co.jp", "ne.jp",
        "or.jp", "co.kr", "com.br", "com.cn", "com.tw", "co.in", "co.nz",
    ];

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host.to_string();
    }
    let tail2 = labels[labels.len() - 2..].join(".");
    if TWO_PART_SUFFIXES.contains(&tail2.as_str()) && labels.len() >= 3 {
        labels[labels.len() - 3..].join(".")
    } else {
        tail2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SourceRegistry {
        serde_json::from_str(
            r#"{
                "approved": {
                    "manufacturer": ["logitechg.com"],
                    "lab": ["rtings.com"],
                    "database": ["mouse-specs.example"],
                    "retailer": ["amazon.com"]
                },
                "denylist": ["spam.example"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn root_domain_heuristics() {
        assert_eq!(root_domain("www.logitechg.com"), "logitechg.com");
        assert_eq!(root_domain("shop.example.co.uk"), "example.co.uk");
        assert_eq!(root_domain("example.com"), "example.com");
        assert_eq!(root_domain("localhost"), "localhost");
    }

    #[test]
    fn registry_classifies_by_root_domain() {
        let source =
            Source::from_url("https://www.logitechg.com/en-us/mice/pro-x", &registry()).unwrap();
        assert_eq!(source.tier, Tier::One);
        assert_eq!(source.role, Role::Manufacturer);
        assert!(source.approved_domain);
        assert_eq!(source.root_domain, "logitechg.com");
    }

    #[test]
    fn unknown_hosts_are_unapproved() {
        let source = Source::from_url("https://random.blog/post", &registry()).unwrap();
        assert_eq!(source.tier, Tier::Unknown);
        assert_eq!(source.role, Role::Other);
        assert!(!source.approved_domain);
    }

    #[test]
    fn denylist_matches_host_and_root() {
        let reg = registry();
        assert!(reg.is_denied("spam.example"));
        assert!(reg.is_denied("cdn.spam.example"));
        assert!(!reg.is_denied("rtings.com"));
    }

    #[test]
    fn tier_serializes_as_string_digit() {
        assert_eq!(serde_json::to_value(Tier::One).unwrap(), "1");
        assert_eq!(serde_json::to_value(Tier::Unknown).unwrap(), "unknown");
    }
}
