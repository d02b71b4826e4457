//! Build → export → reimport round-trip properties.

use std::collections::BTreeSet;

use serde_json::json;

use iamscope_core::types::EdgeKind;
use iamscope_graph::{CollectedData, GraphBuilder, GraphExport, IamGraph};

fn snapshot() -> CollectedData {
    serde_json::from_value(json!({
        "metadata": {"collectors_run": ["hierarchy", "identity", "iam"], "errors": []},
        "data": {
            "hierarchy": {
                "data": {
                    "organizations": {"42": {"name": "organizations/42"}},
                    "projects": {
                        "p": {"name": "projects/p"},
                        "q": {"name": "projects/q"}
                    },
                    "hierarchy": {"organizations": {"42": {"projects": ["p", "q"]}}}
                }
            },
            "identity": {
                "data": {
                    "service_accounts": {
                        "app@p.iam.gserviceaccount.com": {"email": "app@p.iam.gserviceaccount.com"},
                        "ci@q.iam.gserviceaccount.com": {"email": "ci@q.iam.gserviceaccount.com"}
                    },
                    "groups": {"devs@ex.com": {}},
                    "group_memberships": {
                        "devs@ex.com": [{"id": "alice@ex.com"}]
                    }
                }
            },
            "iam": {
                "data": {
                    "roles": {
                        "predefined": {
                            "roles/owner": {"includedPermissions": ["resourcemanager.projects.setIamPolicy"]}
                        }
                    },
                    "policies": {
                        "projects": {
                            "p": {
                                "resource": "projects/p",
                                "bindings": [
                                    {"role": "roles/iam.serviceAccountTokenCreator", "members": ["user:bob@ex.com"]},
                                    {"role": "roles/owner", "members": ["group:devs@ex.com"]},
                                    {"role": "roles/viewer", "members": ["allUsers"]}
                                ]
                            }
                        }
                    }
                }
            }
        }
    }))
    .unwrap()
}

fn node_triples(graph: &IamGraph) -> BTreeSet<(String, String)> {
    graph
        .nodes()
        .iter()
        .map(|n| (n.id.clone(), n.kind.as_str().to_string()))
        .collect()
}

fn edge_triples(graph: &IamGraph) -> BTreeSet<(String, String, String)> {
    graph
        .edges()
        .map(|(src, _, e)| {
            (
                graph.node(src).id.clone(),
                graph.node(e.target).id.clone(),
                e.kind.as_str().to_string(),
            )
        })
        .collect()
}

#[test]
fn build_export_reimport_is_idempotent() {
    let doc = snapshot();
    let built = GraphBuilder::build_from_collected_data(&doc);

    let json = GraphExport::from_graph(&built).to_json().unwrap();
    let reimported = GraphExport::from_json(&json).unwrap().into_graph();

    assert_eq!(node_triples(&built), node_triples(&reimported));
    assert_eq!(edge_triples(&built), edge_triples(&reimported));
    assert_eq!(
        built.metadata().snapshot_fingerprint,
        reimported.metadata().snapshot_fingerprint
    );
}

#[test]
fn built_graph_satisfies_invariants() {
    let graph = GraphBuilder::build_from_collected_data(&snapshot());

    // Every edge references existing nodes (indices are dense by
    // construction; materialize and re-resolve the ids to prove it).
    for (src, _, edge) in graph.edges() {
        let materialized = graph.materialize_edge(src, edge);
        assert!(graph.contains(&materialized.source_id));
        assert!(graph.contains(&materialized.target_id));
        // Derived synthesis never emits self-edges.
        if materialized.kind.is_derived() {
            assert_ne!(materialized.source_id, materialized.target_id);
        }
    }

    // At most one edge per (source, target, kind).
    let mut seen = BTreeSet::new();
    for triple in edge_triples(&graph) {
        assert!(seen.insert(triple));
    }

    // parent_of edges form a forest: every node has at most one parent and
    // walking up terminates.
    for idx in 0..graph.node_count() {
        let parents: Vec<usize> = graph
            .in_edges(idx)
            .iter()
            .filter(|(_, kind)| *kind == EdgeKind::ParentOf)
            .map(|(src, _)| *src)
            .collect();
        assert!(parents.len() <= 1, "hierarchy must be a forest");
    }
}

#[test]
fn expected_derived_edges_present() {
    let graph = GraphBuilder::build_from_collected_data(&snapshot());
    let edges = edge_triples(&graph);

    // Token creator on projects/p fans out to p's service account only.
    assert!(edges.contains(&(
        "user:bob@ex.com".into(),
        "sa:app@p.iam.gserviceaccount.com".into(),
        "can_impersonate_sa".into()
    )));
    assert!(!edges.contains(&(
        "user:bob@ex.com".into(),
        "sa:ci@q.iam.gserviceaccount.com".into(),
        "can_impersonate_sa".into()
    )));

    // Owner on projects/p reaches the project node itself.
    assert!(edges.contains(&(
        "group:devs@ex.com".into(),
        "project:p".into(),
        "can_assign_custom_role".into()
    )));

    // allUsers binding materialized as a special node.
    assert!(edges.contains(&(
        "special:allUsers".into(),
        "role:roles/viewer".into(),
        "has_role".into()
    )));
}

#[test]
fn rebuilding_from_reimport_matches_original_build() {
    // build(doc) == build(export(build(doc)).reimport()) as triple sets.
    let doc = snapshot();
    let first = GraphBuilder::build_from_collected_data(&doc);
    let reimported = GraphExport::from_json(&GraphExport::from_graph(&first).to_json().unwrap())
        .unwrap()
        .into_graph();

    assert_eq!(node_triples(&first), node_triples(&reimported));
    assert_eq!(edge_triples(&first), edge_triples(&reimported));
}
