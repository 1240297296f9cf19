//! Resolution of the user's POD selector into a concrete POD list.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

const EXAMPLE_PREFIX: &str = "example";
const ALL_TOKEN: &str = "all";

/// Where the POD selector came from.
///
/// A case's own `pod_list` only takes precedence when the selector was not
/// given explicitly on the command line.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectorOrigin {
    /// Nobody asked for anything; the selector falls back to `all`.
    Unset,
    /// Taken from the settings file.
    Default,
    /// Given on the command line.
    Explicit,
}

/// The user's POD selector: POD names, realm names, or `all`/`example(s)`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PodSelector {
    pub tokens: BTreeSet<String>,
    pub origin: SelectorOrigin,
}

impl PodSelector {
    pub fn new<I, S>(tokens: I, origin: SelectorOrigin) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: BTreeSet<String> = tokens
            .into_iter()
            .map(Into::into)
            .map(|token: String| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .collect();
        Self { tokens, origin }
    }

    /// Selector used when neither the CLI nor the settings file names PODs.
    pub fn unset() -> Self {
        Self::new([ALL_TOKEN], SelectorOrigin::Unset)
    }

    pub fn is_explicit(&self) -> bool {
        self.origin == SelectorOrigin::Explicit
    }
}

/// Key of the realm index.
///
/// PODs that need several realms at once are filed under the composite key of
/// all of them rather than under each realm separately.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(untagged)]
pub enum RealmKey {
    Single(String),
    Composite(Vec<String>),
}

impl RealmKey {
    /// `None` for a POD that declares no realm. Composite members are
    /// sorted and deduplicated, so declaration order does not matter.
    pub fn from_realms(realms: &[String]) -> Option<Self> {
        let members: BTreeSet<&String> = realms.iter().collect();
        let mut members: Vec<String> = members.into_iter().cloned().collect();
        match members.len() {
            0 => None,
            1 => members.pop().map(RealmKey::Single),
            _ => Some(RealmKey::Composite(members)),
        }
    }

    pub fn realms(&self) -> &[String] {
        match self {
            RealmKey::Single(realm) => std::slice::from_ref(realm),
            RealmKey::Composite(realms) => realms,
        }
    }

    pub fn is_subset_of(&self, realms: &BTreeSet<String>) -> bool {
        self.realms().iter().all(|realm| realms.contains(realm))
    }
}

impl fmt::Display for RealmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.realms().join(" and "))
    }
}

/// Result of resolving a selector against the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Selected POD names, without duplicates, in registry order per branch.
    pub pods: Vec<String>,
    /// Tokens that matched neither a realm nor a POD name.
    pub unrecognized: Vec<String>,
}

/// Resolve `tokens` against the registered `pods` and their realm index.
pub fn select_pods(
    tokens: &BTreeSet<String>,
    pods: &[String],
    realm_index: &BTreeMap<RealmKey, Vec<String>>,
) -> Selection {
    let mut selection = Selection::default();

    if tokens.contains("example") || tokens.contains("examples") {
        selection.pods = pods.iter().filter(|pod| is_example(pod)).cloned().collect();
        return selection;
    }
    if tokens.contains(ALL_TOKEN) {
        selection.pods = pods.iter().filter(|pod| !is_example(pod)).cloned().collect();
        return selection;
    }

    let known_realms: BTreeSet<&str> = realm_index
        .keys()
        .flat_map(|key| key.realms().iter().map(String::as_str))
        .collect();
    let (realm_tokens, remainder): (BTreeSet<String>, BTreeSet<String>) = tokens
        .iter()
        .cloned()
        .partition(|token| known_realms.contains(token.as_str()));

    let mut selected: Vec<String> = Vec::new();
    for (key, members) in realm_index {
        if key.is_subset_of(&realm_tokens) {
            selected.extend(members.iter().cloned());
        }
    }
    selected.extend(pods.iter().filter(|pod| remainder.contains(*pod)).cloned());

    let registered: BTreeSet<&str> = pods.iter().map(String::as_str).collect();
    selection.unrecognized = remainder
        .into_iter()
        .filter(|token| !registered.contains(token.as_str()))
        .collect();

    let mut seen = BTreeSet::new();
    selection.pods = selected
        .into_iter()
        .filter(|pod| !is_example(pod))
        .filter(|pod| seen.insert(pod.clone()))
        .collect();
    selection
}

/// Pick the POD list for one case.
///
/// The global selection wins unless the selector was left implicit and the
/// case names its own PODs.
pub fn case_pod_list(
    case_pods: Option<&[String]>,
    global: &[String],
    origin: SelectorOrigin,
) -> Vec<String> {
    match case_pods {
        Some(pods) if !pods.is_empty() && origin != SelectorOrigin::Explicit => pods.to_vec(),
        _ => global.to_vec(),
    }
}

fn is_example(pod: &str) -> bool {
    pod.starts_with(EXAMPLE_PREFIX)
}
