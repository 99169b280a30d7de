//! ACL rule parsing.
//!
//! Rules are written as `action network[, network...]` clauses separated by
//! `;`, for example `allow private, guest; deny public`. Network names are
//! resolved against a fixed [`Networks`] table. Evaluating the resulting list
//! against a query source is left to the consumer; only the order of the
//! rules is guaranteed here.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::AclError;

/// Named networks that ACL rules may reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Networks(HashMap<String, IpNet>);

impl Networks {
    /// Look up a network by exact name.
    pub fn get(&self, name: &str) -> Option<&IpNet> {
        self.0.get(name)
    }

    /// Number of named networks.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no networks are defined.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, IpNet)> for Networks {
    fn from_iter<I: IntoIterator<Item = (String, IpNet)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<HashMap<String, IpNet>> for Networks {
    fn from(networks: HashMap<String, IpNet>) -> Self {
        Self(networks)
    }
}

/// A single allow/deny rule for one network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclRule {
    /// `allow` or `deny`. Not validated.
    pub action: String,
    /// Network the action applies to.
    pub network: IpNet,
}

/// Parse rule strings into an ordered rule list, failing on the first bad
/// clause.
///
/// Each element may itself hold several `;`-separated clauses.
pub fn parse_rules<S: AsRef<str>>(
    rules: &[S],
    networks: &Networks,
) -> Result<Vec<AclRule>, AclError> {
    let mut parsed = Vec::new();
    for clause in rules.iter().flat_map(|rule| clauses(rule.as_ref())) {
        parsed.extend(parse_clause(clause, networks)?);
    }
    Ok(parsed)
}

/// Parse a single `;`-separated rule string.
pub fn parse_rule_string(rules: &str, networks: &Networks) -> Result<Vec<AclRule>, AclError> {
    parse_rules(&[rules], networks)
}

/// Parse rule strings clause by clause.
///
/// A clause that fails contributes no rules; its error is returned next to
/// the rules of every clause that parsed.
pub fn parse_rules_lenient<S: AsRef<str>>(
    rules: &[S],
    networks: &Networks,
) -> (Vec<AclRule>, Vec<AclError>) {
    let mut parsed = Vec::new();
    let mut errors = Vec::new();
    for clause in rules.iter().flat_map(|rule| clauses(rule.as_ref())) {
        match parse_clause(clause, networks) {
            Ok(rules) => parsed.extend(rules),
            Err(e) => errors.push(e),
        }
    }
    (parsed, errors)
}

fn clauses(rule: &str) -> impl Iterator<Item = &str> {
    split_separated(rule, ';')
}

/// Split on `sep` followed by optional whitespace. Whitespace before the
/// first piece is kept.
fn split_separated(input: &str, sep: char) -> impl Iterator<Item = &str> {
    input
        .split(sep)
        .enumerate()
        .map(|(i, piece)| if i == 0 { piece } else { piece.trim_start() })
}

fn parse_clause(clause: &str, networks: &Networks) -> Result<Vec<AclRule>, AclError> {
    let (action, targets) = clause
        .split_once(' ')
        .ok_or_else(|| AclError::MalformedRule(clause.to_string()))?;

    split_separated(targets, ',')
        .map(|name| {
            networks
                .get(name)
                .map(|network| AclRule {
                    action: action.to_string(),
                    network: *network,
                })
                .ok_or_else(|| AclError::UnknownNetwork(name.to_string()))
        })
        .collect()
}
