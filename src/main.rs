use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info};

use tenantdesk::{
    commands::{
        documents::RecalculateTotalsCommand, payments::RecordInvoicePaymentCommand, Command,
    },
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::DocumentKind,
    errors::ServiceError,
    events::{self, EventSender},
    reconciliation::PaymentType,
    AppServices,
};

#[derive(Parser)]
#[command(name = "tenantdesk", about = "Tenantdesk maintenance and back-office CLI", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    #[command(subcommand)]
    Settings(SettingsCommands),
    #[command(subcommand)]
    Invoice(InvoiceCommands),
    #[command(subcommand)]
    Document(DocumentCommands),
}

#[derive(Subcommand)]
enum SettingsCommands {
    Set(SettingsSetArgs),
    Get(SettingsGetArgs),
    List(SettingsListArgs),
}

#[derive(Args)]
struct SettingsSetArgs {
    #[arg(long)]
    company: i32,
    #[arg(long)]
    key: String,
    #[arg(long)]
    value: String,
}

#[derive(Args)]
struct SettingsGetArgs {
    #[arg(long)]
    company: i32,
    #[arg(long)]
    key: String,
}

#[derive(Args)]
struct SettingsListArgs {
    #[arg(long)]
    company: i32,
}

#[derive(Subcommand)]
enum InvoiceCommands {
    Summary(InvoiceSummaryArgs),
    Pay(InvoicePayArgs),
}

#[derive(Args)]
struct InvoiceSummaryArgs {
    #[arg(long)]
    id: i32,
}

#[derive(Args)]
struct InvoicePayArgs {
    #[arg(long)]
    id: i32,
    #[arg(long)]
    amount: Decimal,
    #[arg(long, default_value = "manual")]
    method: String,
    #[arg(long, help = "Processor transaction id; repeats are ignored")]
    transaction_id: Option<String>,
    #[arg(long, help = "full or partial; inferred from the balance when omitted")]
    payment_type: Option<PaymentType>,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Subcommand)]
enum DocumentCommands {
    Totals(DocumentTotalsArgs),
}

#[derive(Args)]
struct DocumentTotalsArgs {
    #[arg(long, help = "quote, sales_order, purchase_order, invoice, ...")]
    kind: DocumentKind,
    #[arg(long)]
    id: i32,
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(&config.logging);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx));

        Ok(Self {
            config,
            db,
            event_sender: Arc::new(event_sender),
        })
    }

    fn services(&self) -> Result<AppServices> {
        AppServices::new(&self.config, self.db.clone(), Some(self.event_sender.clone()))
            .context("failed to build services")
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

/// Prints the failure; business errors get their stable code in front.
fn report(err: &anyhow::Error) {
    match err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ServiceError>())
    {
        Some(service_err) => {
            error!(code = service_err.code(), error = %service_err, "command failed");
            eprintln!(
                "error[{}]: {}: {}",
                service_err.code(),
                err,
                service_err.response_message()
            );
        }
        None => eprintln!("error: {:#}", err),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let context = CliContext::initialize().await?;

    if context.config.auto_migrate && !matches!(cli.command, Commands::Migrate) {
        db::run_migrations(&context.db)
            .await
            .context("automatic migration failed")?;
    }

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("migration failed")?;
            println!("Migrations applied");
        }
        Commands::Settings(command) => handle_settings_command(&context, command, cli.json).await?,
        Commands::Invoice(command) => handle_invoice_command(&context, command, cli.json).await?,
        Commands::Document(command) => handle_document_command(&context, command, cli.json).await?,
    }

    info!("Command finished");
    Ok(())
}

async fn handle_settings_command(
    context: &CliContext,
    command: SettingsCommands,
    json: bool,
) -> Result<()> {
    let service = context.services()?.payment_settings;
    match command {
        SettingsCommands::Set(args) => {
            service
                .set_setting(args.company, &args.key, &args.value)
                .await
                .context("failed to store setting")?;
            println!("Stored {} for company {}", args.key, args.company);
        }
        SettingsCommands::Get(args) => {
            let value = service
                .get_setting(args.company, &args.key)
                .await
                .context("failed to read setting")?;
            match (value, json) {
                (value, true) => print_json(&value)?,
                (Some(value), false) => println!("{}", value),
                (None, false) => println!("{} is not set", args.key),
            }
        }
        SettingsCommands::List(args) => {
            let settings = service
                .all_settings(args.company)
                .await
                .context("failed to read settings")?;
            if json {
                print_json(&settings)?;
            } else {
                for (key, value) in settings {
                    println!("{} = {}", key, value);
                }
            }
        }
    }
    Ok(())
}

async fn handle_invoice_command(
    context: &CliContext,
    command: InvoiceCommands,
    json: bool,
) -> Result<()> {
    match command {
        InvoiceCommands::Summary(args) => {
            let summary = context
                .services()?
                .invoices
                .payment_summary(args.id)
                .await
                .context("failed to load invoice")?;
            if json {
                print_json(&summary)?;
            } else {
                println!(
                    "{} • {} • total {} • paid {} • remaining {}",
                    summary.number,
                    summary.status,
                    summary.total_amount,
                    summary.total_paid,
                    summary.remaining
                );
            }
        }
        InvoiceCommands::Pay(args) => {
            let command = RecordInvoicePaymentCommand {
                invoice_id: args.id,
                amount: args.amount,
                payment_type: args.payment_type,
                payment_method: args.method,
                transaction_id: args.transaction_id,
                notes: args.notes,
                created_by: None,
            };
            let recorded = command
                .execute(context.db.clone(), context.event_sender.clone())
                .await
                .context("failed to record payment")?;
            if json {
                print_json(&recorded)?;
            } else if recorded.duplicate {
                println!("Transaction already recorded as payment {}", recorded.payment.id);
            } else {
                println!(
                    "Payment {} recorded • invoice {} is {} • remaining {}",
                    recorded.payment.id,
                    recorded.summary.number,
                    recorded.summary.status,
                    recorded.summary.remaining
                );
            }
        }
    }
    Ok(())
}

async fn handle_document_command(
    context: &CliContext,
    command: DocumentCommands,
    json: bool,
) -> Result<()> {
    match command {
        DocumentCommands::Totals(args) => {
            let command = RecalculateTotalsCommand {
                kind: args.kind,
                document_id: args.id,
            };
            let totals = command
                .execute(context.db.clone(), context.event_sender.clone())
                .await
                .context("failed to recalculate totals")?;
            if json {
                print_json(&totals)?;
            } else {
                println!(
                    "subtotal {} • discount {} • tax {} • shipping {} • total {}",
                    totals.subtotal,
                    totals.discount_amount,
                    totals.tax_amount,
                    totals.shipping_amount,
                    totals.total_amount
                );
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
