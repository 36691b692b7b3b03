//! Stockledger CLI: migrations and receiving operations against Postgres.
//!
//! # Usage
//!
//! ```bash
//! # Apply schema migrations
//! stockledger migrate
//!
//! # Create an order: --line VARIANT:QTY:UNIT_COST (repeatable)
//! stockledger --actor <uuid> create --supplier <uuid> --line <variant>:10:15
//!
//! # Receive everything outstanding, or only some items
//! stockledger --actor <uuid> receive <order> --notes "dock 2"
//! stockledger --actor <uuid> receive <order> --item <item>=4
//!
//! # Progress, stock, reconciliation
//! stockledger summary <order> --check
//! stockledger stock <variant>
//! stockledger reconcile --repair
//!
//! # End-to-end walkthrough against an in-memory store (no database needed)
//! stockledger demo
//! ```
//!
//! Every command except `demo` needs `DATABASE_URL`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

use stockledger_core::UserId;
use stockledger_inventory::VariantId;
use stockledger_purchasing::{NewLineItem, ProductId, PurchaseOrderId, PurchaseOrderItemId, SupplierId};

mod commands;

#[derive(Parser)]
#[command(name = "stockledger")]
#[command(author, version, about = "Purchase receiving and stock ledger tools")]
struct Cli {
    /// Acting user recorded in the ledger and audit trail
    #[arg(long, global = true, env = "STOCKLEDGER_ACTOR")]
    actor: Option<UserId>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Create a purchase order
    Create {
        #[arg(long)]
        supplier: SupplierId,

        /// Order line as `VARIANT:QUANTITY:UNIT_COST` (unit cost in minor units)
        #[arg(long = "line", required = true, value_parser = parse_line)]
        lines: Vec<NewLineItem>,

        /// Keep the order in `draft` instead of submitting it
        #[arg(long)]
        draft: bool,
    },
    /// Submit a draft order to the supplier
    Submit { order: PurchaseOrderId },
    /// Cancel an order that has not received anything
    Cancel {
        order: PurchaseOrderId,

        #[arg(long)]
        reason: Option<String>,
    },
    /// Receive goods against an order (everything outstanding unless --item is given)
    Receive {
        order: PurchaseOrderId,

        /// Units to receive for one item, as `ITEM=QUANTITY` (repeatable)
        #[arg(long = "item", value_parser = parse_item_quantity)]
        items: Vec<(PurchaseOrderItemId, i64)>,

        #[arg(long)]
        notes: Option<String>,
    },
    /// Show receiving progress of an order
    Summary {
        order: PurchaseOrderId,

        /// Also compare each item with its ledger rows
        #[arg(long)]
        check: bool,
    },
    /// Show the audit trail of an order
    Audit { order: PurchaseOrderId },
    /// Show cached on-hand stock of a variant
    Stock { variant: VariantId },
    /// Compare cached stock with the ledger for every variant
    Reconcile {
        /// Rebuild drifted variants from the ledger
        #[arg(long)]
        repair: bool,
    },
    /// Run the receiving walkthrough against an in-memory store
    Demo,
}

fn parse_line(raw: &str) -> Result<NewLineItem, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    let [variant, quantity, unit_cost] = parts.as_slice() else {
        return Err(format!("expected VARIANT:QUANTITY:UNIT_COST, got '{raw}'"));
    };
    Ok(NewLineItem {
        product_id: ProductId::new(),
        variant_id: variant.parse().map_err(|e| format!("{e}"))?,
        quantity_ordered: quantity
            .parse()
            .map_err(|e| format!("quantity '{quantity}': {e}"))?,
        unit_cost: unit_cost
            .parse()
            .map_err(|e| format!("unit cost '{unit_cost}': {e}"))?,
    })
}

fn parse_item_quantity(raw: &str) -> Result<(PurchaseOrderItemId, i64), String> {
    let (item, quantity) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ITEM=QUANTITY, got '{raw}'"))?;
    let item = item.parse().map_err(|e| format!("{e}"))?;
    let quantity = quantity
        .parse()
        .map_err(|e| format!("quantity '{quantity}': {e}"))?;
    Ok((item, quantity))
}

#[tokio::main]
async fn main() {
    stockledger_observability::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("command failed: {e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let actor = cli.actor;
    match cli.command {
        Commands::Migrate => commands::migrate::run().await,
        Commands::Create {
            supplier,
            lines,
            draft,
        } => commands::orders::create(require(actor)?, supplier, lines, draft).await,
        Commands::Submit { order } => commands::orders::submit(require(actor)?, order).await,
        Commands::Cancel { order, reason } => {
            commands::orders::cancel(require(actor)?, order, reason).await
        }
        Commands::Receive {
            order,
            items,
            notes,
        } => commands::orders::receive(require(actor)?, order, items, notes).await,
        Commands::Summary { order, check } => commands::orders::summary(order, check).await,
        Commands::Audit { order } => commands::orders::audit(order).await,
        Commands::Stock { variant } => commands::stock::show(variant).await,
        Commands::Reconcile { repair } => commands::stock::reconcile(repair).await,
        Commands::Demo => commands::demo::run(actor.unwrap_or_else(UserId::new)).await,
    }
}

fn require(actor: Option<UserId>) -> anyhow::Result<UserId> {
    actor.ok_or_else(|| anyhow::anyhow!("--actor (or STOCKLEDGER_ACTOR) is required for writes"))
}
