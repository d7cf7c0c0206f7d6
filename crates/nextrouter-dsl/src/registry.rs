//! Provider plan registry with atomic hot reload.
//!
//! A reload parses every `.conf` file in the directory into a fresh map
//! and swaps it in wholesale; any error aborts the swap and the previous
//! map keeps serving. Readers take a snapshot per request.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::ConfigError;
use crate::model::ProviderPlan;
use crate::parser;

type PlanMap = HashMap<String, Arc<ProviderPlan>>;

#[derive(Default, Debug)]
pub struct Registry {
    plans: ArcSwap<PlanMap>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_dir(dir: &Path) -> Result<Self, ConfigError> {
        let registry = Self::new();
        registry.reload_dir(dir)?;
        Ok(registry)
    }

    /// Parse the directory and atomically replace the plan map. On error
    /// the current map is left untouched.
    pub fn reload_dir(&self, dir: &Path) -> Result<(), ConfigError> {
        let next = build_plan_map(dir)?;
        self.plans.store(Arc::new(next));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProviderPlan>> {
        self.plans.load().get(name).cloned()
    }

    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plans.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.plans.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.load().is_empty()
    }

    /// Install a plan directly; used by tests and embedded setups.
    pub fn insert(&self, plan: ProviderPlan) {
        let mut next: PlanMap = self.plans.load().as_ref().clone();
        next.insert(plan.name.clone(), Arc::new(plan));
        self.plans.store(Arc::new(next));
    }
}

fn build_plan_map(dir: &Path) -> Result<PlanMap, ConfigError> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|source| ConfigError::Io {
            file: dir.display().to_string(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "conf"))
        .collect();
    entries.sort();

    let mut map: PlanMap = HashMap::new();
    let mut first_file: HashMap<String, String> = HashMap::new();
    for path in entries {
        let plans = parser::parse_file(&path)?;
        for plan in plans {
            let file = path.display().to_string();
            if let Some(first) = first_file.get(&plan.name) {
                return Err(ConfigError::DuplicateProvider {
                    name: plan.name,
                    first: first.clone(),
                    second: file,
                });
            }
            first_file.insert(plan.name.clone(), file);
            map.insert(plan.name.clone(), Arc::new(plan));
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_conf(dir: &Path, name: &str, body: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    const PROVIDER_A: &str = r#"
        syntax "next-router/0.1";
        provider "alpha" {
          defaults { upstream_config { base_url = "https://a.example"; } }
          match api chat.completions { upstream { set_path "/v1/chat/completions"; } }
        }
    "#;

    #[test]
    fn loads_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_conf(dir.path(), "a.conf", PROVIDER_A);
        let registry = Registry::load_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn failed_reload_keeps_previous_map() {
        let dir = tempfile::tempdir().unwrap();
        write_conf(dir.path(), "a.conf", PROVIDER_A);
        let registry = Registry::load_dir(dir.path()).unwrap();

        write_conf(dir.path(), "b.conf", "syntax \"next-router/0.1\";\nprovider \"bad\" { nope }");
        let err = registry.reload_dir(dir.path());
        assert!(err.is_err());
        assert!(registry.get("alpha").is_some(), "old map still serves");
        assert!(registry.get("bad").is_none());
    }

    #[test]
    fn duplicate_provider_across_files_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_conf(dir.path(), "a.conf", PROVIDER_A);
        write_conf(
            dir.path(),
            "b.conf",
            r#"
            syntax "next-router/0.1";
            provider "alpha" { defaults { upstream_config { base_url = "https://b"; } } }
            "#,
        );
        let err = Registry::load_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProvider { .. }));
    }

    #[test]
    fn include_expansion_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        write_conf(
            dir.path(),
            "shared.inc",
            r#"upstream_config { base_url = "https://shared.example"; }"#,
        );
        write_conf(
            dir.path(),
            "main.conf",
            r#"
            syntax "next-router/0.1";
            provider "inc" {
              defaults { include "shared.inc"; }
              match api chat.completions { upstream { set_path "/v1/chat/completions"; } }
            }
            "#,
        );
        let registry = Registry::load_dir(dir.path()).unwrap();
        let plan = registry.get("inc").unwrap();
        assert!(plan.routing.defaults.base_url.is_some());

        // Self-including file forms a cycle.
        write_conf(
            dir.path(),
            "loop.conf",
            r#"
            syntax "next-router/0.1";
            provider "cycle" { defaults { include "loop.conf"; } }
            "#,
        );
        let err = registry.reload_dir(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::IncludeCycle { .. }));
    }
}
