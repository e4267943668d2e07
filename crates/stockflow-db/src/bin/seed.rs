//! # Seed Data Generator
//!
//! Populates a database with demo categories and products across branches.
//!
//! ## Usage
//! ```bash
//! # Two branches, every catalogue product at each
//! cargo run -p stockflow-db --bin seed
//!
//! # Custom branches and database
//! cargo run -p stockflow-db --bin seed -- --branches main,north,south --db ./data/stockflow.db
//! ```
//!
//! ## Generated Data
//! - One category per catalogue group at every branch
//! - Every catalogue product at every branch, with an opening count
//! - Prices are deterministic so reruns on a fresh file give the same data

use anyhow::Context;
use rust_decimal::Decimal;
use std::env;
use stockflow_core::{NewProduct, Scope};
use stockflow_db::{Database, DbConfig};
use tracing_subscriber::EnvFilter;

/// Catalogue groups and their products.
const CATALOGUE: &[(&str, &[&str])] = &[
    (
        "Grocery",
        &[
            "Rice 5kg",
            "Flour 2kg",
            "Sugar 1kg",
            "Salt 1kg",
            "Sunflower Oil 1L",
            "Pasta Penne",
            "Buckwheat 1kg",
            "Black Tea 100g",
        ],
    ),
    (
        "Beverages",
        &[
            "Mineral Water 1.5L",
            "Apple Juice 1L",
            "Cola 0.5L",
            "Green Tea 0.5L",
        ],
    ),
    (
        "Household",
        &["Dish Soap", "Laundry Powder 3kg", "Paper Towels", "Trash Bags"],
    ),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./stockflow_dev.db");
    let mut company = String::from("demo-company");
    let mut branches = vec!["main".to_string(), "north".to_string()];
    let mut opening: i64 = 50;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" if i + 1 < args.len() => {
                db_path = args[i + 1].clone();
                i += 1;
            }
            "--company" | "-c" if i + 1 < args.len() => {
                company = args[i + 1].clone();
                i += 1;
            }
            "--branches" | "-b" if i + 1 < args.len() => {
                branches = args[i + 1]
                    .split(',')
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty())
                    .collect();
                i += 1;
            }
            "--opening" | "-o" if i + 1 < args.len() => {
                opening = args[i + 1]
                    .parse()
                    .with_context(|| format!("invalid --opening value '{}'", args[i + 1]))?;
                i += 1;
            }
            "--help" | "-h" => {
                println!("Stockflow Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>          Database file path (default: ./stockflow_dev.db)");
                println!("  -c, --company <ID>       Company id (default: demo-company)");
                println!("  -b, --branches <A,B,..>  Branch ids (default: main,north)");
                println!("  -o, --opening <N>        Opening count per product (default: 50)");
                println!("  -h, --help               Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Stockflow Seed Data Generator");
    println!("=============================");
    println!("Database: {db_path}");
    println!("Company:  {company}");
    println!("Branches: {}", branches.join(", "));
    println!();

    let db = Database::new(DbConfig::new(&db_path))
        .await
        .context("opening database")?;
    println!("✓ Connected to database, migrations applied");

    let start = std::time::Instant::now();
    let mut generated = 0usize;

    for branch in &branches {
        let scope = Scope::new(company.clone(), branch.clone());

        let existing = db.products().list(&scope).await?;
        if !existing.is_empty() {
            println!("⚠ Branch {branch} already has {} products, skipping", existing.len());
            continue;
        }

        for (group_idx, (group, products)) in CATALOGUE.iter().enumerate() {
            let category = db
                .products()
                .ensure_category(&scope, group, Some("seed"))
                .await?;

            for (product_idx, name) in products.iter().enumerate() {
                let seed = group_idx * 100 + product_idx;
                let incoming_price = Decimal::new(500 + ((seed * 37) % 4500) as i64, 2);
                let standard_price = incoming_price * Decimal::new(125, 2);

                let product = NewProduct {
                    scope: scope.clone(),
                    category_id: Some(category.id.clone()),
                    name: (*name).to_string(),
                    bill_format: Some("pcs".to_string()),
                    image_url: None,
                    incoming_price,
                    standard_price: standard_price.round_dp(2),
                    initial_count: opening,
                    created_by: Some("seed".to_string()),
                };

                if let Err(e) = db.products().insert(&product).await {
                    eprintln!("Failed to insert {name} at {branch}: {e}");
                    continue;
                }
                generated += 1;
            }
        }
    }

    println!();
    println!("✓ Generated {generated} products in {:?}", start.elapsed());

    for branch in &branches {
        let scope = Scope::new(company.clone(), branch.clone());
        let products = db.products().list(&scope).await?;
        let units: i64 = products.iter().map(|p| p.total_count).sum();
        println!("  {branch}: {} products, {units} units", products.len());
    }

    db.close().await;
    println!();
    println!("✓ Seed complete!");

    Ok(())
}
