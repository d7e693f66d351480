//! Dependency graph backed by a Yarn Plug'n'Play data file.
//!
//! Only the parts of `.pnp.data.json` needed to enumerate virtual packages
//! are read: `dependencyTreeRoots` and `packageRegistryData`. Package
//! locations in the file are relative to the directory holding it.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::IgnoredAny;
use serde::Deserialize;

use crate::environment::{DependencyGraph, Environment, PackageInformation, PackageLocator};
use crate::error::{Result, WatchError};
use crate::resolve::normalize_path;

pub const PNP_DATA_FILENAME: &str = ".pnp.data.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    dependency_tree_roots: Vec<RawLocator>,
    #[serde(default)]
    package_registry_data: Vec<(Option<String>, Vec<(Option<String>, RawPackage)>)>,
}

#[derive(Debug, Deserialize)]
struct RawLocator {
    name: Option<String>,
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPackage {
    package_location: String,
    #[serde(default)]
    package_dependencies: Vec<(String, Option<RawReference>)>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawReference {
    Reference(String),
    /// `[alias, reference]`
    Alias(IgnoredAny, IgnoredAny),
}

/// A virtualized environment described by a PnP data file.
#[derive(Debug, Clone)]
pub struct PnpEnvironment {
    roots: Vec<PackageLocator>,
    packages: HashMap<PackageLocator, PackageInformation>,
}

impl PnpEnvironment {
    /// Loads `dir/.pnp.data.json` if it exists.
    pub fn detect(dir: impl AsRef<Path>) -> Result<Option<Self>> {
        let manifest_path = dir.as_ref().join(PNP_DATA_FILENAME);
        if !manifest_path.is_file() {
            return Ok(None);
        }
        Self::load(manifest_path).map(Some)
    }

    pub fn load(manifest_path: impl AsRef<Path>) -> Result<Self> {
        let manifest_path = manifest_path.as_ref();
        let input = fs::read_to_string(manifest_path)?;
        let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("/"));
        let environment = Self::parse(&input, base_dir).map_err(|error| match error {
            WatchError::Manifest { message, .. } => WatchError::Manifest {
                path: manifest_path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        tracing::debug!(
            "loaded PnP manifest {} ({} packages)",
            manifest_path.display(),
            environment.packages.len()
        );
        Ok(environment)
    }

    /// Parses manifest JSON, resolving package locations against `base_dir`.
    pub fn parse(input: &str, base_dir: &Path) -> Result<Self> {
        let manifest: RawManifest =
            serde_json::from_str(input).map_err(|error| WatchError::Manifest {
                path: base_dir.to_path_buf(),
                message: error.to_string(),
            })?;
        let base = base_dir
            .to_str()
            .ok_or_else(|| WatchError::NonUtf8Path(PathBuf::from(base_dir)))?;

        let roots = manifest
            .dependency_tree_roots
            .into_iter()
            .map(|root| PackageLocator {
                name: root.name,
                reference: root.reference,
            })
            .collect();

        let mut packages = HashMap::new();
        for (name, instances) in manifest.package_registry_data {
            for (reference, package) in instances {
                let locator = PackageLocator {
                    name: name.clone(),
                    reference,
                };
                packages.insert(locator, package_information(base, package));
            }
        }

        Ok(Self { roots, packages })
    }
}

fn package_information(base: &str, package: RawPackage) -> PackageInformation {
    let package_location = if package.package_location.starts_with('/') {
        normalize_path(&package.package_location)
    } else {
        normalize_path(&format!("{base}/{}", package.package_location))
    };

    // Aliased dependencies point at a different package name; only plain
    // references are followed.
    let package_dependencies = package
        .package_dependencies
        .into_iter()
        .filter_map(|(name, reference)| match reference {
            Some(RawReference::Reference(reference)) => Some((name, Some(reference))),
            Some(RawReference::Alias(..)) => None,
            None => Some((name, None)),
        })
        .collect();

    PackageInformation {
        package_location,
        package_dependencies,
    }
}

impl DependencyGraph for PnpEnvironment {
    fn dependency_tree_roots(&self) -> Vec<PackageLocator> {
        self.roots.clone()
    }

    fn package_information(&self, locator: &PackageLocator) -> Option<PackageInformation> {
        self.packages.get(locator).cloned()
    }
}

impl Environment for PnpEnvironment {
    fn is_virtualized(&self) -> bool {
        true
    }

    fn dependency_graph(&self) -> &dyn DependencyGraph {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::find_virtual_paths;

    const MANIFEST: &str = r#"{
        "__info": ["generated"],
        "dependencyTreeRoots": [
            {"name": "app", "reference": "workspace:."}
        ],
        "packageRegistryData": [
            [null, [
                [null, {"packageLocation": "./", "packageDependencies": []}]
            ]],
            ["app", [
                ["workspace:.", {
                    "packageLocation": "./",
                    "packageDependencies": [
                        ["react-dom", "virtual:abc#npm:18.0.0"],
                        ["lodash", "npm:4.17.21"],
                        ["aliased", ["react-dom", "virtual:abc#npm:18.0.0"]],
                        ["missing-peer", null]
                    ],
                    "linkType": "SOFT"
                }]
            ]],
            ["react-dom", [
                ["virtual:abc#npm:18.0.0", {
                    "packageLocation": "./.yarn/$$virtual/react-dom-virtual-abc/0/cache/react-dom/",
                    "packageDependencies": [["react-dom", "virtual:abc#npm:18.0.0"]],
                    "linkType": "HARD"
                }]
            ]],
            ["lodash", [
                ["npm:4.17.21", {
                    "packageLocation": "./.yarn/cache/lodash/",
                    "packageDependencies": []
                }]
            ]]
        ]
    }"#;

    #[test]
    fn parses_roots_and_registry() {
        let env = PnpEnvironment::parse(MANIFEST, Path::new("/proj")).unwrap();
        assert_eq!(
            env.dependency_tree_roots(),
            vec![PackageLocator::new("app", "workspace:.")]
        );

        let app = env
            .package_information(&PackageLocator::new("app", "workspace:."))
            .unwrap();
        assert_eq!(app.package_location, "/proj/");
        assert_eq!(
            app.package_dependencies,
            vec![
                ("react-dom".to_string(), Some("virtual:abc#npm:18.0.0".to_string())),
                ("lodash".to_string(), Some("npm:4.17.21".to_string())),
                ("missing-peer".to_string(), None),
            ]
        );
        assert!(env
            .package_information(&PackageLocator::top_level())
            .is_some());
    }

    #[test]
    fn enumerates_virtual_packages_from_manifest() {
        let env = PnpEnvironment::parse(MANIFEST, Path::new("/proj")).unwrap();
        assert_eq!(
            find_virtual_paths(&env, "/proj"),
            vec!["/proj/.yarn/$$virtual/react-dom-virtual-abc/0/cache/react-dom/".to_string()]
        );
    }

    #[test]
    fn detect_loads_manifest_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PnpEnvironment::detect(dir.path()).unwrap().is_none());

        fs::write(dir.path().join(PNP_DATA_FILENAME), MANIFEST).unwrap();
        let env = PnpEnvironment::detect(dir.path()).unwrap().unwrap();
        let root = dir.path().to_str().unwrap();
        let paths = find_virtual_paths(&env, root);
        assert_eq!(paths.len(), 1);
        assert!(paths[0].starts_with(root));
        assert!(paths[0].ends_with("/.yarn/$$virtual/react-dom-virtual-abc/0/cache/react-dom/"));
    }

    #[test]
    fn malformed_manifest_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join(PNP_DATA_FILENAME);
        fs::write(&manifest_path, "{\"packageRegistryData\": 3}").unwrap();

        match PnpEnvironment::load(&manifest_path) {
            Err(WatchError::Manifest { path, .. }) => assert_eq!(path, manifest_path),
            other => panic!("expected manifest error, got {other:?}"),
        }
    }
}
