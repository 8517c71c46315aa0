//! Category and rule storage

use rusqlite::{params, OptionalExtension};
use tracing::{info, warn};

use super::Database;
use crate::error::{Error, Result};
use crate::models::{CategorizationRule, Category, RuleField, RuleOperator};
use crate::taxonomy::{Taxonomy, TaxonomyFile};

/// Counts reported by a taxonomy import
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ImportSummary {
    pub categories: usize,
    pub rules: usize,
}

impl Database {
    /// Replace-or-insert the categories and rules from a taxonomy file
    ///
    /// The merged category set is validated as a whole before anything is
    /// written; a rule pointing at an unknown category rejects the import.
    pub fn import_taxonomy(&self, file: &TaxonomyFile) -> Result<ImportSummary> {
        let mut merged = self.list_categories()?;
        merged.retain(|c| !file.categories.iter().any(|n| n.id == c.id));
        merged.extend(file.categories.iter().cloned());
        let taxonomy = Taxonomy::new(merged)?;

        for rule in &file.rules {
            if !taxonomy.contains(rule.category_id) {
                return Err(Error::Taxonomy(format!(
                    "rule {} references unknown category {}",
                    rule.id, rule.category_id
                )));
            }
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        // Parents may be listed after their children
        tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;

        for category in &file.categories {
            tx.execute(
                r#"
                INSERT INTO categories (id, name, parent_id, is_business, is_system)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    parent_id = excluded.parent_id,
                    is_business = excluded.is_business,
                    is_system = excluded.is_system
                "#,
                params![
                    category.id,
                    category.name,
                    category.parent_id,
                    category.is_business,
                    category.is_system,
                ],
            )?;
        }

        for rule in &file.rules {
            tx.execute(
                r#"
                INSERT INTO categorization_rules (id, category_id, field, operator, value, priority)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    category_id = excluded.category_id,
                    field = excluded.field,
                    operator = excluded.operator,
                    value = excluded.value,
                    priority = excluded.priority
                "#,
                params![
                    rule.id,
                    rule.category_id,
                    rule.field.as_str(),
                    rule.operator.as_str(),
                    rule.value,
                    rule.priority,
                ],
            )?;
        }

        tx.execute("UPDATE taxonomy_revision SET revision = revision + 1 WHERE id = 1", [])?;
        tx.commit()?;

        let summary = ImportSummary {
            categories: file.categories.len(),
            rules: file.rules.len(),
        };
        info!(
            "Imported {} categories and {} rules",
            summary.categories, summary.rules
        );
        Ok(summary)
    }

    /// Incremented by every import
    pub fn taxonomy_revision(&self) -> Result<i64> {
        let conn = self.conn()?;
        let revision = conn.query_row(
            "SELECT revision FROM taxonomy_revision WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(revision)
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, parent_id, is_business, is_system FROM categories ORDER BY id",
        )?;
        let categories = stmt
            .query_map([], |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    parent_id: row.get(2)?,
                    is_business: row.get(3)?,
                    is_system: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// Load and validate the category tree
    pub fn load_taxonomy(&self) -> Result<Taxonomy> {
        Taxonomy::new(self.list_categories()?)
    }

    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, parent_id, is_business, is_system FROM categories WHERE id = ?",
            params![id],
            |row| {
                Ok(Category {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    parent_id: row.get(2)?,
                    is_business: row.get(3)?,
                    is_system: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// All stored rules; rows with an unknown field or operator are skipped
    pub fn list_rules(&self) -> Result<Vec<CategorizationRule>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, category_id, field, operator, value, priority
            FROM categorization_rules
            ORDER BY priority, id
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i32>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut rules = Vec::with_capacity(rows.len());
        for (id, category_id, field, operator, value, priority) in rows {
            let parsed = field
                .parse::<RuleField>()
                .and_then(|f| operator.parse::<RuleOperator>().map(|o| (f, o)));
            match parsed {
                Ok((field, operator)) => rules.push(CategorizationRule {
                    id,
                    category_id,
                    field,
                    operator,
                    value,
                    priority,
                }),
                Err(e) => warn!("Skipping stored rule {}: {}", id, e),
            }
        }
        Ok(rules)
    }
}
