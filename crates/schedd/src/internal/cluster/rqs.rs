use serde::{Deserialize, Serialize};

use crate::define_id_type;
use crate::resources::ResourceAmount;

define_id_type!(RqsIdx, u32);

/// Filter of one rule dimension.
///
/// Empty `values` (or `*`) match anything, `!name` excludes a value.
/// With `expand` set, the limit applies separately to every distinct value (`{*}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RqsFilter {
    pub values: Vec<String>,
    pub expand: bool,
}

impl RqsFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of(values: &[&str]) -> Self {
        RqsFilter {
            values: values.iter().map(|v| v.to_string()).collect(),
            expand: false,
        }
    }

    pub fn expanded(values: &[&str]) -> Self {
        RqsFilter {
            expand: true,
            ..Self::of(values)
        }
    }

    fn accepts_any(&self) -> bool {
        self.values.is_empty() || self.values.iter().any(|v| v == "*")
    }

    /// `candidates` are the names the scoped object is known under.
    pub fn matches(&self, candidates: &[&str]) -> bool {
        let excluded = self.values.iter().any(|v| {
            v.strip_prefix('!')
                .is_some_and(|name| candidates.contains(&name))
        });
        if excluded {
            return false;
        }
        if self.accepts_any() {
            return true;
        }
        if candidates.is_empty() {
            return false;
        }
        let positive: Vec<&String> = self.values.iter().filter(|v| !v.starts_with('!')).collect();
        positive.is_empty() || positive.iter().any(|v| candidates.contains(&v.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RqsLimit {
    pub resource: String,
    pub amount: ResourceAmount,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RqsRule {
    pub name: Option<String>,
    pub users: RqsFilter,
    pub projects: RqsFilter,
    pub pes: RqsFilter,
    pub queues: RqsFilter,
    pub hosts: RqsFilter,
    pub limits: Vec<RqsLimit>,
}

/// Who asks for resources where; the input of rule matching.
#[derive(Debug, Clone, Copy)]
pub struct RqsScope<'a> {
    pub user: &'a str,
    pub project: Option<&'a str>,
    pub pe: Option<&'a str>,
    pub queue: &'a str,
    pub host: &'a str,
}

impl RqsRule {
    pub fn matches(&self, scope: &RqsScope) -> bool {
        let full_name = format!("{}@{}", scope.queue, scope.host);
        self.users.matches(&[scope.user])
            && self.projects.matches(scope.project.as_slice())
            && self.pes.matches(scope.pe.as_slice())
            && self.queues.matches(&[scope.queue, &full_name])
            && self.hosts.matches(&[scope.host])
    }

    /// Values of expanded filters; identifies the counter the limit is accounted on.
    pub fn entity(&self, scope: &RqsScope) -> Vec<String> {
        let mut entity = Vec::new();
        if self.users.expand {
            entity.push(scope.user.to_string());
        }
        if self.projects.expand {
            entity.push(scope.project.unwrap_or_default().to_string());
        }
        if self.pes.expand {
            entity.push(scope.pe.unwrap_or_default().to_string());
        }
        if self.queues.expand {
            entity.push(scope.queue.to_string());
        }
        if self.hosts.expand {
            entity.push(scope.host.to_string());
        }
        entity
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQuotaSet {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub rules: Vec<RqsRule>,
}

fn default_enabled() -> bool {
    true
}

impl ResourceQuotaSet {
    /// The first matching rule of an enabled set.
    pub fn matching_rule(&self, scope: &RqsScope) -> Option<(u32, &RqsRule)> {
        if !self.enabled {
            return None;
        }
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(scope))
            .map(|(idx, rule)| (idx as u32, rule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope<'a>(user: &'a str, queue: &'a str, host: &'a str) -> RqsScope<'a> {
        RqsScope {
            user,
            project: None,
            pe: None,
            queue,
            host,
        }
    }

    #[test]
    fn filter_matching() {
        assert!(RqsFilter::any().matches(&["x"]));
        assert!(RqsFilter::any().matches(&[]));
        assert!(RqsFilter::of(&["a", "b"]).matches(&["b"]));
        assert!(!RqsFilter::of(&["a", "b"]).matches(&["c"]));
        assert!(!RqsFilter::of(&["a"]).matches(&[]));
        assert!(!RqsFilter::of(&["!a"]).matches(&["a"]));
        assert!(RqsFilter::of(&["!a"]).matches(&["c"]));
        assert!(!RqsFilter::of(&["*", "!a"]).matches(&["a"]));
    }

    #[test]
    fn first_matching_rule_wins() {
        let set = ResourceQuotaSet {
            name: "max_slots".to_string(),
            enabled: true,
            rules: vec![
                RqsRule {
                    users: RqsFilter::of(&["bob"]),
                    limits: vec![RqsLimit {
                        resource: "slots".to_string(),
                        amount: ResourceAmount::new_units(1),
                    }],
                    ..Default::default()
                },
                RqsRule {
                    users: RqsFilter::expanded(&["*"]),
                    hosts: RqsFilter::of(&["n1"]),
                    limits: vec![RqsLimit {
                        resource: "slots".to_string(),
                        amount: ResourceAmount::new_units(4),
                    }],
                    ..Default::default()
                },
            ],
        };
        let (idx, _) = set.matching_rule(&scope("bob", "all.q", "n1")).unwrap();
        assert_eq!(idx, 0);
        let (idx, rule) = set.matching_rule(&scope("alice", "all.q", "n1")).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(rule.entity(&scope("alice", "all.q", "n1")), vec!["alice"]);
        assert!(set.matching_rule(&scope("alice", "all.q", "n2")).is_none());
    }
}
