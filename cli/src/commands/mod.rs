// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the fleet CLI

pub mod check;
pub mod config;
pub mod plan;

pub use self::config::ConfigCommand;

use aegis_fleet_core::domain::component::{ComponentId, ComponentSpec};
use aegis_fleet_core::domain::config::FleetManifest;
use aegis_fleet_core::domain::graph::{DependencyGraph, GraphBuilder};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Load and validate a manifest, then apply `AEGIS_FLEET_*` overrides.
pub fn load_manifest(path: &Path) -> Result<FleetManifest> {
    let mut manifest = FleetManifest::from_yaml_file(path)
        .with_context(|| format!("Failed to load manifest {}", path.display()))?;
    manifest.spec.config.apply_env_overrides();
    manifest
        .validate()
        .with_context(|| format!("Manifest {} is invalid", path.display()))?;
    Ok(manifest)
}

/// Graph over the whole manifest, or over the dependency closure of `seed`.
pub fn build_graph(manifest: &FleetManifest, seed: Option<&ComponentId>) -> Result<DependencyGraph> {
    let config = &manifest.spec.config;
    match seed {
        None => Ok(DependencyGraph::from_specs(
            manifest.spec.components.iter().cloned(),
            config.activation.clone(),
            config.dependency.circular_detection,
        )),
        Some(id) => {
            let catalog: BTreeMap<ComponentId, ComponentSpec> = manifest
                .spec
                .components
                .iter()
                .map(|spec| (spec.id.clone(), spec.clone()))
                .collect();
            let Some(root) = catalog.get(id).cloned() else {
                bail!("Component {} is not declared in the manifest", id);
            };
            Ok(GraphBuilder::new(config.dependency.max_dependency_depth)
                .with_activation(config.activation.clone())
                .with_circular_detection(config.dependency.circular_detection)
                .build([root], &catalog))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MANIFEST: &str = r#"
apiVersion: 100monkeys.ai/v1
kind: Fleet
metadata:
  name: test
spec:
  components:
    - id: web
      version: 1.0.0
      depends_on: [api]
    - id: api
      version: 1.0.0
      depends_on: [db]
    - id: db
      version: 1.0.0
    - id: batch
      version: 1.0.0
"#;

    fn manifest_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_closure_graph_leaves_out_unrelated_components() {
        let file = manifest_file(MANIFEST);
        let manifest = load_manifest(file.path()).unwrap();

        let full = build_graph(&manifest, None).unwrap();
        let api = build_graph(&manifest, Some(&"api".into())).unwrap();

        assert_eq!(full.len(), 4);
        assert_eq!(api.len(), 2);
        assert!(api.contains(&"db".into()));
        assert!(!api.contains(&"web".into()));
    }

    #[test]
    fn test_unknown_seed_is_rejected() {
        let file = manifest_file(MANIFEST);
        let manifest = load_manifest(file.path()).unwrap();
        assert!(build_graph(&manifest, Some(&"nope".into())).is_err());
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let file = manifest_file(&MANIFEST.replace("kind: Fleet", "kind: Pipeline"));
        let err = load_manifest(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid kind"));
    }
}
