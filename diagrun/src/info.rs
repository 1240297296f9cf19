//! `diagrun info`: listings of installed PODs and realms.

use anyhow::{Result, bail};

use crate::io::pod_registry::{PodDescriptor, PodRegistry};

const TOPICS: &str = "topics";
const PODS: [&str; 2] = ["pods", "diagnostics"];
const REALMS: &str = "realms";

/// Every recognized topic, in display order.
pub fn topics(registry: &PodRegistry) -> Vec<String> {
    let mut topics = vec![TOPICS.to_string()];
    topics.extend(PODS.iter().map(|topic| topic.to_string()));
    topics.push(REALMS.to_string());
    topics.extend(registry.realm_list().iter().cloned());
    topics.extend(registry.names().iter().cloned());
    topics
}

/// Render the text for `topic`. Unrecognized topics are an error.
pub fn render(topic: &str, registry: &PodRegistry) -> Result<String> {
    let mut lines = Vec::new();
    if topic == TOPICS {
        lines.extend(topic_lines(registry));
    } else if PODS.contains(&topic) {
        lines.push("List of installed diagnostics:".to_string());
        for pod in registry.iter() {
            lines.extend(pod_lines(pod, Detail::Brief));
        }
        if !registry.invalid().is_empty() {
            lines.push("Diagnostics that failed to load:".to_string());
            for pod in registry.invalid() {
                lines.push(format!("  {}: {}", pod.name, pod.reason));
            }
        }
    } else if topic == REALMS {
        lines.push("List of installed diagnostics by realm:".to_string());
        for (key, pods) in registry.realm_index() {
            lines.push(format!("{key}:"));
            for pod in pods.iter().filter_map(|name| registry.get(name)) {
                lines.extend(pod_lines(pod, Detail::Brief));
            }
        }
    } else if registry.realm_list().iter().any(|realm| realm == topic) {
        lines.push(format!("List of installed diagnostics for {topic}:"));
        for pod in registry
            .iter()
            .filter(|pod| pod.realms.iter().any(|realm| realm == topic))
        {
            lines.extend(pod_lines(pod, Detail::Summary));
        }
    } else if let Some(pod) = registry.get(topic) {
        lines.extend(pod_lines(pod, Detail::Full));
    } else {
        bail!(
            "'{topic}' not a recognized topic.\n{}",
            topic_lines(registry).join("\n")
        );
    }
    let mut out = lines.join("\n");
    out.push('\n');
    Ok(out)
}

fn topic_lines(registry: &PodRegistry) -> [String; 2] {
    [
        "Recognized topics for `diagrun info`:".to_string(),
        topics(registry).join(", "),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detail {
    Brief,
    Summary,
    Full,
}

fn pod_lines(pod: &PodDescriptor, detail: Detail) -> Vec<String> {
    match detail {
        Detail::Brief => vec![format!("  {}: {}.", pod.name, pod.long_name)],
        Detail::Summary => {
            let vars: Vec<&str> = pod.varlist.iter().map(|var| var.short_name()).collect();
            vec![
                format!("  {}: {}.", pod.name, pod.long_name),
                format!("    {}", pod.description),
                format!("    Model data used: {}", vars.join(", ")),
            ]
        }
        Detail::Full => {
            let mut lines = vec![
                format!("{}: {}.", pod.name, pod.long_name),
                format!("  Realm: {}.", pod.realms.join(" and ")),
                format!("  {}", pod.description),
                "  Model data used:".to_string(),
            ];
            for var in &pod.varlist {
                let mut line = format!(
                    "    {} ({}) @ {} frequency",
                    var.short_name(),
                    var.requirement,
                    var.freq
                );
                if !var.alternates.is_empty() {
                    let alternates: Vec<&str> = var
                        .alternates
                        .iter()
                        .map(|alt| alt.strip_suffix("_var").unwrap_or(alt))
                        .collect();
                    line.push_str("; alternates: ");
                    line.push_str(&alternates.join(", "));
                }
                lines.push(line);
            }
            lines
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::pod_registry::VarRequest;

    fn pod(name: &str, realms: &[&str]) -> PodDescriptor {
        PodDescriptor {
            name: name.to_string(),
            long_name: format!("{name} diagnostic"),
            description: format!("About {name}"),
            realms: realms.iter().map(|r| r.to_string()).collect(),
            driver: format!("{name}.py"),
            program: None,
            varlist: vec![
                VarRequest {
                    var_name: "pr_var".to_string(),
                    freq: "day".to_string(),
                    requirement: "required".to_string(),
                    alternates: Vec::new(),
                },
                VarRequest {
                    var_name: "ts_var".to_string(),
                    freq: "mon".to_string(),
                    requirement: "optional".to_string(),
                    alternates: vec!["tos_var".to_string()],
                },
            ],
            settings: serde_json::Map::new(),
        }
    }

    fn registry() -> PodRegistry {
        PodRegistry::from_descriptors(vec![
            pod("convective_transition", &["atmos"]),
            pod("ENSO_MSE", &["atmos", "ocean"]),
        ])
    }

    #[test]
    fn topics_list_realms_and_pods() {
        assert_eq!(
            topics(&registry()),
            vec![
                "topics",
                "pods",
                "diagnostics",
                "realms",
                "atmos",
                "ocean",
                "convective_transition",
                "ENSO_MSE"
            ]
        );
    }

    #[test]
    fn realms_listing_joins_composite_keys() {
        let text = render("realms", &registry()).expect("render");
        assert!(text.contains("atmos:\n  convective_transition: convective_transition diagnostic.\n"));
        assert!(text.contains("atmos and ocean:\n  ENSO_MSE: ENSO_MSE diagnostic.\n"));
    }

    #[test]
    fn realm_topic_lists_every_pod_in_realm() {
        let text = render("ocean", &registry()).expect("render");
        assert!(text.starts_with("List of installed diagnostics for ocean:\n"));
        assert!(text.contains("  ENSO_MSE: ENSO_MSE diagnostic.\n    About ENSO_MSE\n"));
        assert!(text.contains("Model data used: pr, ts"));
        assert!(!text.contains("convective_transition"));
    }

    #[test]
    fn pod_topic_prints_variables() {
        let text = render("ENSO_MSE", &registry()).expect("render");
        assert!(text.contains("  Realm: atmos and ocean.\n"));
        assert!(text.contains("    pr (required) @ day frequency\n"));
        assert!(text.contains("    ts (optional) @ mon frequency; alternates: tos\n"));
    }

    #[test]
    fn unknown_topic_is_an_error_listing_topics() {
        let err = render("bogus", &registry()).expect_err("unknown");
        let message = err.to_string();
        assert!(message.contains("'bogus' not a recognized topic"));
        assert!(message.contains("realms"));
    }
}
