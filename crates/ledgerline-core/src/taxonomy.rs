//! Category tree validation and lookups
//!
//! The taxonomy is owned upstream; this module only checks that what we were
//! given is a forest (no cycles, no dangling parents) and resolves inherited
//! attributes.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{CategorizationRule, Category, CategoryId};
use crate::rules::RuleEngine;

/// Validated category tree
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    categories: BTreeMap<CategoryId, Category>,
}

impl Taxonomy {
    pub fn new(categories: Vec<Category>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for category in categories {
            if map.contains_key(&category.id) {
                return Err(Error::Taxonomy(format!(
                    "duplicate category id {}",
                    category.id
                )));
            }
            map.insert(category.id, category);
        }

        for category in map.values() {
            if let Some(parent) = category.parent_id {
                if !map.contains_key(&parent) {
                    return Err(Error::Taxonomy(format!(
                        "category {} ({}) references unknown parent {}",
                        category.id, category.name, parent
                    )));
                }
            }
        }

        let taxonomy = Self { categories: map };
        for id in taxonomy.categories.keys() {
            taxonomy.ancestors(*id)?;
        }
        Ok(taxonomy)
    }

    /// Ancestor chain from the category itself up to its root
    fn ancestors(&self, id: CategoryId) -> Result<Vec<&Category>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.categories.get(&id);
        while let Some(category) = current {
            if !seen.insert(category.id) {
                return Err(Error::Taxonomy(format!(
                    "cycle detected at category {} ({})",
                    category.id, category.name
                )));
            }
            chain.push(category);
            current = category.parent_id.and_then(|p| self.categories.get(&p));
        }
        Ok(chain)
    }

    pub fn get(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(&id)
    }

    pub fn contains(&self, id: CategoryId) -> bool {
        self.categories.contains_key(&id)
    }

    /// Effective business flag: nearest explicit value walking up the tree
    pub fn is_business(&self, id: CategoryId) -> Option<bool> {
        self.ancestors(id)
            .ok()?
            .into_iter()
            .find_map(|c| c.is_business)
    }

    /// Dotted path from the root, e.g. `Dining.Coffee`
    pub fn path(&self, id: CategoryId) -> Option<String> {
        let chain = self.ancestors(id).ok()?;
        if chain.is_empty() {
            return None;
        }
        Some(
            chain
                .iter()
                .rev()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join("."),
        )
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Taxonomy + rule set file accepted by `taxonomy import` (TOML or JSON)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomyFile {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub rules: Vec<CategorizationRule>,
}

impl TaxonomyFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::Taxonomy(format!("invalid taxonomy file: {}", e)))
        }
    }
}

/// Category tree and compiled rule set for one stored revision
#[derive(Debug)]
pub struct CompiledTaxonomy {
    pub revision: i64,
    pub taxonomy: Taxonomy,
    pub rules: RuleEngine,
}

/// Compiles the stored taxonomy once per revision
///
/// Every import bumps the stored revision, so imports made by another
/// process are picked up by the next load.
pub struct TaxonomyCache {
    db: Database,
    current: RwLock<Option<Arc<CompiledTaxonomy>>>,
}

impl TaxonomyCache {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            current: RwLock::new(None),
        }
    }

    pub fn load(&self) -> Result<Arc<CompiledTaxonomy>> {
        let revision = self.db.taxonomy_revision()?;
        let cached = match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(compiled) = cached.filter(|c| c.revision == revision) {
            return Ok(compiled);
        }

        let compiled = Arc::new(CompiledTaxonomy {
            revision,
            taxonomy: self.db.load_taxonomy()?,
            rules: RuleEngine::new(self.db.list_rules()?),
        });
        debug!(
            "Compiled taxonomy revision {} ({} rules)",
            revision,
            compiled.rules.len()
        );

        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(compiled.clone());
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: CategoryId, name: &str, parent_id: Option<CategoryId>) -> Category {
        Category {
            id,
            name: name.to_string(),
            parent_id,
            is_business: None,
            is_system: false,
        }
    }

    #[test]
    fn test_paths_and_inherited_business_flag() {
        let mut business = category(1, "Business", None);
        business.is_business = Some(true);
        let mut personal_meals = category(4, "Personal", Some(2));
        personal_meals.is_business = Some(false);

        let taxonomy = Taxonomy::new(vec![
            business,
            category(2, "Meals", Some(1)),
            category(3, "Clients", Some(2)),
            personal_meals,
            category(5, "Misc", None),
        ])
        .unwrap();

        assert_eq!(taxonomy.path(3).as_deref(), Some("Business.Meals.Clients"));
        assert_eq!(taxonomy.is_business(3), Some(true));
        assert_eq!(taxonomy.is_business(4), Some(false));
        assert_eq!(taxonomy.is_business(5), None);
        assert_eq!(taxonomy.path(99), None);
    }

    #[test]
    fn test_cycle_rejected() {
        let err = Taxonomy::new(vec![
            category(1, "A", Some(2)),
            category(2, "B", Some(1)),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Taxonomy(_)));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        assert!(Taxonomy::new(vec![category(1, "A", Some(42))]).is_err());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        assert!(Taxonomy::new(vec![category(1, "A", None), category(1, "B", None)]).is_err());
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxonomy.toml");
        std::fs::write(
            &path,
            r#"
[[categories]]
id = 1
name = "Dining"

[[rules]]
id = "coffee"
category_id = 1
field = "merchant"
operator = "contains"
value = "starbucks"
priority = 10
"#,
        )
        .unwrap();

        let file = TaxonomyFile::load(&path).unwrap();
        assert_eq!(file.categories.len(), 1);
        assert_eq!(file.rules[0].operator, crate::models::RuleOperator::Contains);
    }

    #[test]
    fn test_compiled_taxonomy_reused_until_import() {
        use crate::models::{RuleField, RuleOperator};

        let db = Database::in_memory().unwrap();
        let cache = TaxonomyCache::new(db.clone());
        let file = |value: &str| TaxonomyFile {
            categories: vec![category(1, "Dining", None)],
            rules: vec![CategorizationRule {
                id: "coffee".to_string(),
                category_id: 1,
                field: RuleField::Description,
                operator: RuleOperator::Regex,
                value: value.to_string(),
                priority: 1,
            }],
        };

        db.import_taxonomy(&file("^coffee")).unwrap();
        let first = cache.load().unwrap();
        let second = cache.load().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.rules.len(), 1);

        // A bad pattern after re-import: only a fresh compile can see it
        db.import_taxonomy(&file("(unclosed")).unwrap();
        let third = cache.load().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.revision, first.revision + 1);
        assert!(third.rules.is_empty());
        assert_eq!(third.rules.disabled().len(), 1);
    }
}
