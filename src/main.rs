// CashGuard CLI - every ledger operation from the terminal
//
//   cashguard setup --server localhost --database CashGuardDB --integrated-security
//   cashguard -u admin -p 123 summary
//   cashguard -u operador -p 123 invoice settle 103 1

use anyhow::{bail, Result};
use cashguard::reporting::{custodian_history, invoices_in_tab, tab_counts};
use cashguard::{
    today, CashGuard, DateRange, Decision, DbConfig, InvoiceDraft, InvoiceTab, InvoiceType,
    NewTransaction, NewUser, Persistence, Role, Settings, TransactionFilter, TransactionType,
};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "cashguard")]
#[command(about = "Cash custodians, invoices and transactions for small businesses")]
#[command(version)]
struct Cli {
    /// Username to log in with
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Password for --user
    #[arg(short, long, global = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Configure the database and create the schema
    Setup(SetupArgs),
    #[command(flatten)]
    Ledger(LedgerCommand),
}

/// Commands that need a logged-in user
#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// Dashboard figures
    Summary,
    /// Liquidity brief with upcoming payments
    Brief,
    /// Check balances against recorded transactions
    Reconcile,
    /// Bulk-load pending transactions from CSV
    Import { path: PathBuf },
    /// Move cash between custodians (creates two pending transactions)
    Transfer {
        from: String,
        to: String,
        amount: Decimal,
    },
    #[command(subcommand)]
    Custodian(CustodianCommand),
    #[command(subcommand)]
    Invoice(InvoiceCommand),
    #[command(subcommand, name = "tx")]
    Transaction(TransactionCommand),
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Args, Debug)]
struct SetupArgs {
    #[arg(long)]
    server: String,
    #[arg(long)]
    database: String,
    #[arg(long, default_value = "")]
    db_user: String,
    #[arg(long, default_value = "")]
    db_password: String,
    #[arg(long, default_value_t = false)]
    integrated_security: bool,
}

#[derive(Subcommand, Debug)]
enum CustodianCommand {
    List,
    Add { name: String },
    Delete { id: String },
    /// Transactions of one custodian, newest first
    History { id: String },
}

#[derive(Args, Debug)]
struct InvoiceFields {
    /// Who we owe or who owes us
    entity_name: String,
    amount: Decimal,
    /// Due date (YYYY-MM-DD)
    due_date: NaiveDate,
    /// RECEIVABLE (CXC) or PAYABLE (CXP)
    #[arg(value_name = "TYPE")]
    invoice_type: InvoiceType,
    #[arg(long, default_value = "")]
    description: String,
}

impl InvoiceFields {
    fn into_draft(self) -> InvoiceDraft {
        InvoiceDraft {
            entity_name: self.entity_name,
            description: self.description,
            amount: self.amount,
            due_date: self.due_date,
            invoice_type: self.invoice_type,
        }
    }
}

#[derive(Subcommand, Debug)]
enum InvoiceCommand {
    List {
        /// drafts, to-process or history
        #[arg(long, default_value = "to-process")]
        tab: InvoiceTab,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    Add(InvoiceFields),
    Edit {
        id: String,
        #[command(flatten)]
        fields: InvoiceFields,
    },
    Validate { id: String },
    Settle { id: String, custodian: String },
    Delete { id: String },
    /// Audit trail of one invoice
    Events { id: String },
}

#[derive(Subcommand, Debug)]
enum TransactionCommand {
    List {
        #[arg(long = "type")]
        kind: Option<TransactionType>,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    Add {
        custodian: String,
        amount: Decimal,
        /// INCOME or EXPENSE
        #[arg(value_name = "TYPE")]
        kind: TransactionType,
        #[arg(long, default_value = "")]
        description: String,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    Validate { id: String },
    Reject { id: String },
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    List,
    Add {
        name: String,
        role: Role,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        secret: Option<String>,
    },
    Delete { id: String },
}

// =============================================================================
// MAIN
// =============================================================================

fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let command = match cli.command {
        Command::Setup(args) => return run_setup(&settings, &args),
        Command::Ledger(command) => command,
    };

    let store = settings.connect()?;
    let mut app = CashGuard::open(store)?;

    let (Some(username), Some(password)) = (cli.user.as_deref(), cli.password.as_deref()) else {
        bail!("log in with --user and --password");
    };
    let user = app.login(username, password)?;
    tracing::debug!(user = %user.name, landing = ?user.role.landing_view(), "session started");

    run_command(&mut app, command)
}

fn run_setup(settings: &Settings, args: &SetupArgs) -> Result<()> {
    let config = DbConfig {
        server: args.server.clone(),
        database: args.database.clone(),
        user: args.db_user.clone(),
        password: args.db_password.clone(),
        integrated_security: args.integrated_security,
    };

    println!("🔧 Setting up database {}...", config.database);
    settings.setup(&config)?;
    println!("✓ Config saved to {}", settings.config_store().path().display());
    println!("✓ Backend: {}", settings.backend);
    if settings.backend == cashguard::Backend::Sqlite {
        println!("✓ Data file: {}", settings.database_path(&config).display());
    }
    Ok(())
}

fn run_command<P: Persistence>(app: &mut CashGuard<P>, command: LedgerCommand) -> Result<()> {
    match command {
        LedgerCommand::Summary => {
            let s = app.summary()?;
            println!("💰 Total cash:   ${:.2} across {} custodians", s.total_cash, s.custodian_count);
            println!("📈 Receivable:   ${:.2} ({} invoices)", s.total_receivables, s.receivable_count);
            println!("📉 Payable:      ${:.2} ({} invoices)", s.total_payables, s.payable_count);
            println!("   Net position: ${:.2}", s.net_position()?);
        }

        LedgerCommand::Brief => {
            print!("{}", app.brief()?.render());
        }

        LedgerCommand::Reconcile => {
            let report = app.reconcile()?;
            println!("⚖️  {}", report.summary());
            for d in &report.discrepancies {
                println!("  ❌ {:?}: {} (${:.2})", d.category, d.description, d.amount);
            }
            if report.is_balanced() {
                println!("✅ Books balance");
            }
        }

        LedgerCommand::Import { path } => {
            let rows = cashguard::load_csv(&path)?;
            println!("📂 Loaded {} rows from {}", rows.len(), path.display());
            let summary = app.import_transactions(rows)?;
            println!("✓ Inserted: {} transactions", summary.inserted);
            println!("✓ Skipped duplicates: {}", summary.duplicates);
        }

        LedgerCommand::Transfer { from, to, amount } => {
            let transfer = app.transfer(&from, &to, amount, today())?;
            println!("🔁 Transfer of ${:.2} requested", amount);
            println!("   {} (pending)", transfer.outgoing.description);
            println!("   {} (pending)", transfer.incoming.description);
        }

        LedgerCommand::Custodian(cmd) => run_custodian(app, cmd)?,
        LedgerCommand::Invoice(cmd) => run_invoice(app, cmd)?,
        LedgerCommand::Transaction(cmd) => run_transaction(app, cmd)?,
        LedgerCommand::User(cmd) => run_user(app, cmd)?,
    }

    Ok(())
}

fn run_custodian<P: Persistence>(app: &mut CashGuard<P>, cmd: CustodianCommand) -> Result<()> {
    match cmd {
        CustodianCommand::List => {
            for c in app.ledger().custodians() {
                let flag = if c.is_overdrawn() { " ⚠️ overdrawn" } else { "" };
                println!("{:<38} {:<24} ${:>12.2}{}", c.id, c.name, c.balance, flag);
            }
        }
        CustodianCommand::Add { name } => {
            let custodian = app.add_custodian(&name)?;
            println!("✓ Custodian {} created ({})", custodian.name, custodian.id);
        }
        CustodianCommand::Delete { id } => {
            app.delete_custodian(&id)?;
            println!("✓ Custodian {} deleted", id);
        }
        CustodianCommand::History { id } => {
            let Some(custodian) = app.ledger().custodian(&id) else {
                bail!("custodian not found: {}", id);
            };
            println!("📜 {} (balance ${:.2})", custodian.name, custodian.balance);
            for t in custodian_history(app.ledger().transactions(), &id) {
                println!(
                    "  {} {:>12.2} {:<8} {:<10} {}",
                    t.date,
                    t.signed_amount(),
                    t.transaction_type,
                    t.status,
                    t.description
                );
            }
        }
    }
    Ok(())
}

fn run_invoice<P: Persistence>(app: &mut CashGuard<P>, cmd: InvoiceCommand) -> Result<()> {
    match cmd {
        InvoiceCommand::List { tab, from, to } => {
            let counts = tab_counts(app.ledger().invoices());
            println!(
                "Drafts: {}  To process: {}  History: {}",
                counts.drafts, counts.to_process, counts.history
            );
            for i in invoices_in_tab(app.ledger().invoices(), tab, DateRange::new(from, to)) {
                println!(
                    "{:<38} {:<10} {:<28} ${:>10.2} due {} [{} / {}]",
                    i.id,
                    i.invoice_type,
                    i.entity_name,
                    i.amount,
                    i.due_date,
                    i.status,
                    i.validation_status
                );
            }
        }
        InvoiceCommand::Add(fields) => {
            let invoice = app.add_invoice(fields.into_draft())?;
            println!("✓ Draft invoice {} created", invoice.id);
        }
        InvoiceCommand::Edit { id, fields } => {
            app.update_invoice(&id, fields.into_draft())?;
            println!("✓ Invoice {} updated", id);
        }
        InvoiceCommand::Validate { id } => {
            app.validate_invoice(&id)?;
            println!("✓ Invoice {} validated", id);
        }
        InvoiceCommand::Settle { id, custodian } => {
            let settlement = app.settle_invoice(&id, &custodian, today())?;
            println!("✅ {}", settlement.transaction.description);
            println!("   New balance: ${:.2}", settlement.new_balance);
        }
        InvoiceCommand::Delete { id } => {
            app.delete_invoice(&id)?;
            println!("✓ Invoice {} deleted", id);
        }
        InvoiceCommand::Events { id } => {
            for e in app.history("invoice", &id)? {
                println!("{} {:<20} by {} {}", e.timestamp.to_rfc3339(), e.event_type, e.actor, e.data);
            }
        }
    }
    Ok(())
}

fn run_transaction<P: Persistence>(app: &mut CashGuard<P>, cmd: TransactionCommand) -> Result<()> {
    match cmd {
        TransactionCommand::List { kind, from, to } => {
            let filter = TransactionFilter {
                kind,
                range: DateRange::new(from, to),
            };
            for t in filter.apply(app.ledger().transactions()) {
                println!(
                    "{:<38} {} {:>12.2} {:<8} {:<10} {:<38} {}",
                    t.id,
                    t.date,
                    t.amount,
                    t.transaction_type,
                    t.status,
                    t.custodian_id,
                    t.description
                );
            }
        }
        TransactionCommand::Add {
            custodian,
            amount,
            kind,
            description,
            date,
        } => {
            let tx = app.add_transaction(NewTransaction {
                date: date.unwrap_or_else(today),
                amount,
                transaction_type: kind,
                custodian_id: custodian,
                description,
            })?;
            println!("✓ Transaction {} recorded (pending validation)", tx.id);
        }
        TransactionCommand::Validate { id } => {
            app.validate_transaction(&id, Decision::Validate)?;
            println!("✅ Transaction {} validated", id);
        }
        TransactionCommand::Reject { id } => {
            app.validate_transaction(&id, Decision::Reject)?;
            println!("✓ Transaction {} rejected", id);
        }
        TransactionCommand::Delete { id } => {
            app.delete_transaction(&id)?;
            println!("✓ Transaction {} deleted", id);
        }
    }
    Ok(())
}

fn run_user<P: Persistence>(app: &mut CashGuard<P>, cmd: UserCommand) -> Result<()> {
    match cmd {
        UserCommand::List => {
            for u in app.users()? {
                println!(
                    "{:<38} {:<24} {:<10} {}",
                    u.id,
                    u.name,
                    u.role,
                    u.username.as_deref().unwrap_or("-")
                );
            }
        }
        UserCommand::Add {
            name,
            role,
            username,
            secret,
        } => {
            let user = app.add_user(NewUser {
                name,
                role,
                username,
                password: secret,
            })?;
            println!("✓ User {} created ({})", user.name, user.id);
        }
        UserCommand::Delete { id } => {
            app.delete_user(&id)?;
            println!("✓ User {} deleted", id);
        }
    }
    Ok(())
}
