//! Taxonomy and rule command implementations

use std::path::Path;

use anyhow::{Context, Result};
use ledgerline_core::{Engine, TaxonomyFile, TransactionRecord};

use super::{category_label, truncate};

pub fn cmd_taxonomy_import(engine: &Engine, file: &Path) -> Result<()> {
    let taxonomy = TaxonomyFile::load(file)
        .with_context(|| format!("Failed to read taxonomy from {}", file.display()))?;
    let summary = engine.import_taxonomy(&taxonomy)?;

    println!(
        "✅ Imported {} categories and {} rules from {}",
        summary.categories,
        summary.rules,
        file.display()
    );

    let disabled = engine.rules()?.disabled;
    if !disabled.is_empty() {
        println!();
        println!("⚠️  {} rules failed to compile and are disabled:", disabled.len());
        for rule in &disabled {
            println!("   {} - {}", rule.rule_id, rule.reason);
        }
    }
    Ok(())
}

pub fn cmd_taxonomy_list(engine: &Engine) -> Result<()> {
    let taxonomy = engine.db().load_taxonomy()?;

    if taxonomy.is_empty() {
        println!("No categories found. Run 'ledgerline taxonomy import <file>' first.");
        return Ok(());
    }

    println!();
    println!("🗂️  Categories");
    println!("   ─────────────────────────────────────────────────────────────");

    // Sorting by dotted path lists children under their parent
    let mut rows: Vec<_> = taxonomy
        .categories()
        .map(|c| (taxonomy.path(c.id).unwrap_or_else(|| c.name.clone()), c))
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    for (path, category) in rows {
        let depth = path.matches('.').count();
        let business = match taxonomy.is_business(category.id) {
            Some(true) => " [business]",
            _ => "",
        };
        println!(
            "   {}• {} (#{}){}",
            "  ".repeat(depth),
            category.name,
            category.id,
            business
        );
    }

    Ok(())
}

pub fn cmd_rules_list(engine: &Engine) -> Result<()> {
    let listing = engine.rules()?;
    let taxonomy = engine.db().load_taxonomy()?;

    if listing.rules.is_empty() && listing.disabled.is_empty() {
        println!("No rules found.");
        return Ok(());
    }

    println!();
    println!("📏 Rules (evaluation order)");
    println!(
        "   {:<20} {:>5}  {:<12} {:<10} {:<24} Category",
        "ID", "Prio", "Field", "Operator", "Value"
    );
    println!("   ─────────────────────────────────────────────────────────────────────────────");
    for rule in &listing.rules {
        println!(
            "   {:<20} {:>5}  {:<12} {:<10} {:<24} {}",
            truncate(&rule.id, 20),
            rule.priority,
            rule.field.as_str(),
            rule.operator.as_str(),
            truncate(&rule.value, 24),
            category_label(&taxonomy, Some(rule.category_id))
        );
    }

    if !listing.disabled.is_empty() {
        println!();
        println!("⚠️  Disabled:");
        for rule in &listing.disabled {
            println!("   {} - {}", rule.rule_id, rule.reason);
        }
    }

    Ok(())
}

pub fn cmd_rules_test(
    engine: &Engine,
    description: &str,
    merchant: Option<&str>,
    amount: f64,
) -> Result<()> {
    let record = TransactionRecord {
        id: "rules-test".to_string(),
        description: Some(description.to_string()),
        merchant_name: merchant.map(str::to_string),
        amount,
        date: None,
        account_id: None,
        is_business: None,
        metadata: None,
    };
    let result = engine.test_rules(&record)?;
    let taxonomy = engine.db().load_taxonomy()?;

    println!();
    println!("🔎 Features");
    println!("   Text:     {}", result.features.text);
    println!("   Merchant: {}", result.features.merchant);
    println!("   Amount:   {}", result.features.amount);
    println!();

    if result.matching.is_empty() {
        println!("No rules match.");
        return Ok(());
    }

    println!("Matching rules:");
    for rule in &result.matching {
        let marker = match &result.winner {
            Some(winner) if winner.rule_id == rule.id => "→",
            _ => " ",
        };
        println!(
            "   {} {} ({} {} {:?}) → {}",
            marker,
            rule.id,
            rule.field.as_str(),
            rule.operator.as_str(),
            rule.value,
            category_label(&taxonomy, Some(rule.category_id))
        );
    }

    Ok(())
}
