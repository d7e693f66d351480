//! Package-manager environment and virtual package enumeration.
//!
//! The multiplexer never reads ambient process state. Whether a virtual
//! package layout is active, and what the dependency graph looks like, both
//! come from an [`Environment`] handed to it at construction.

use crate::resolve::is_within;

/// Reference prefix marking a dependency that resolves to a virtual package.
pub const VIRTUAL_REFERENCE_PREFIX: &str = "virtual:";

/// Identifies one package instance in the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageLocator {
    pub name: Option<String>,
    pub reference: Option<String>,
}

impl PackageLocator {
    pub fn new(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            reference: Some(reference.into()),
        }
    }

    /// Locator of the top-level project.
    pub fn top_level() -> Self {
        Self {
            name: None,
            reference: None,
        }
    }
}

/// What the graph knows about a single package instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageInformation {
    /// Absolute physical install location.
    pub package_location: String,
    /// Direct dependencies as `(name, reference)`. `None` marks a missing
    /// peer dependency.
    pub package_dependencies: Vec<(String, Option<String>)>,
}

/// Read-only view of the package manager's dependency graph.
pub trait DependencyGraph: Send + Sync {
    fn dependency_tree_roots(&self) -> Vec<PackageLocator>;

    fn package_information(&self, locator: &PackageLocator) -> Option<PackageInformation>;
}

/// Virtualization check plus graph access for the current environment.
pub trait Environment: Send + Sync {
    /// Whether a virtual package layout is in effect.
    fn is_virtualized(&self) -> bool;

    fn dependency_graph(&self) -> &dyn DependencyGraph;
}

/// A plain environment with no package virtualization.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostEnvironment;

impl DependencyGraph for HostEnvironment {
    fn dependency_tree_roots(&self) -> Vec<PackageLocator> {
        Vec::new()
    }

    fn package_information(&self, _locator: &PackageLocator) -> Option<PackageInformation> {
        None
    }
}

impl Environment for HostEnvironment {
    fn is_virtualized(&self) -> bool {
        false
    }

    fn dependency_graph(&self) -> &dyn DependencyGraph {
        self
    }
}

/// Lists the physical locations of virtual packages installed under `root`.
///
/// Only direct dependencies of the dependency-tree roots are considered.
/// Returns nothing when `env` is not virtualized.
pub fn find_virtual_paths(env: &dyn Environment, root: &str) -> Vec<String> {
    if !env.is_virtualized() {
        return Vec::new();
    }

    let graph = env.dependency_graph();
    let mut paths = Vec::new();
    for locator in graph.dependency_tree_roots() {
        let Some(package) = graph.package_information(&locator) else {
            continue;
        };
        for (name, reference) in &package.package_dependencies {
            let Some(reference) = reference else {
                continue;
            };
            if !reference.starts_with(VIRTUAL_REFERENCE_PREFIX) {
                continue;
            }
            let virtual_locator = PackageLocator::new(name.as_str(), reference.as_str());
            let Some(virtual_package) = graph.package_information(&virtual_locator) else {
                continue;
            };
            if is_within(&virtual_package.package_location, root) {
                paths.push(virtual_package.package_location);
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct FakeEnvironment {
        virtualized: bool,
        roots: Vec<PackageLocator>,
        packages: HashMap<PackageLocator, PackageInformation>,
    }

    impl FakeEnvironment {
        fn with_package(
            mut self,
            locator: PackageLocator,
            location: &str,
            dependencies: &[(&str, Option<&str>)],
        ) -> Self {
            self.packages.insert(
                locator,
                PackageInformation {
                    package_location: location.to_string(),
                    package_dependencies: dependencies
                        .iter()
                        .map(|(name, reference)| {
                            (name.to_string(), reference.map(str::to_string))
                        })
                        .collect(),
                },
            );
            self
        }
    }

    impl DependencyGraph for FakeEnvironment {
        fn dependency_tree_roots(&self) -> Vec<PackageLocator> {
            self.roots.clone()
        }

        fn package_information(&self, locator: &PackageLocator) -> Option<PackageInformation> {
            self.packages.get(locator).cloned()
        }
    }

    impl Environment for FakeEnvironment {
        fn is_virtualized(&self) -> bool {
            self.virtualized
        }

        fn dependency_graph(&self) -> &dyn DependencyGraph {
            self
        }
    }

    fn project() -> FakeEnvironment {
        FakeEnvironment {
            virtualized: true,
            roots: vec![PackageLocator::top_level()],
            ..FakeEnvironment::default()
        }
        .with_package(
            PackageLocator::top_level(),
            "/proj/",
            &[
                ("react-dom", Some("virtual:abc#npm:18.0.0")),
                ("lodash", Some("npm:4.17.21")),
                ("peer", None),
                ("outside", Some("virtual:def#npm:1.0.0")),
                ("ghost", Some("virtual:zzz#npm:1.0.0")),
            ],
        )
        .with_package(
            PackageLocator::new("react-dom", "virtual:abc#npm:18.0.0"),
            "/proj/.yarn/$$virtual/react-dom-abc/0/cache/react-dom/",
            &[],
        )
        .with_package(
            PackageLocator::new("lodash", "npm:4.17.21"),
            "/proj/.yarn/cache/lodash/",
            &[],
        )
        .with_package(
            PackageLocator::new("outside", "virtual:def#npm:1.0.0"),
            "/elsewhere/$$virtual/outside-def/0/outside/",
            &[],
        )
    }

    #[test]
    fn host_environment_finds_nothing() {
        assert!(find_virtual_paths(&HostEnvironment, "/proj").is_empty());
    }

    #[test]
    fn non_virtualized_environment_skips_the_graph() {
        let env = FakeEnvironment {
            virtualized: false,
            ..project()
        };
        assert!(find_virtual_paths(&env, "/proj").is_empty());
    }

    #[test]
    fn collects_virtual_dependencies_under_root() {
        let paths = find_virtual_paths(&project(), "/proj");
        assert_eq!(
            paths,
            vec!["/proj/.yarn/$$virtual/react-dom-abc/0/cache/react-dom/".to_string()]
        );
    }

    #[test]
    fn root_scoping_uses_segment_boundaries() {
        assert!(find_virtual_paths(&project(), "/pro").is_empty());
        assert_eq!(find_virtual_paths(&project(), "/").len(), 2);
    }
}
