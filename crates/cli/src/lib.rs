pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use clearway_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "clearway",
    about = "Clearway approval workflow CLI",
    long_about = "Create, advance, inspect and expire multi-step approval workflows, and check runtime readiness.",
    after_help = "Examples:\n  clearway create --subject inv_1 --type high_risk_investor\n  clearway approve <workflow-id> --role compliance_officer --approver user_co\n  clearway pending --role risk_manager\n  clearway sweep --watch"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a clearway.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, workflow catalog, DB connectivity and schema")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List workflow types and their approval chains")]
    Templates,
    #[command(about = "Create a workflow for a subject from a named template")]
    Create {
        #[arg(long, help = "Entity under review, e.g. an investor id")]
        subject: String,
        #[arg(long = "type", help = "Workflow type name, e.g. high_risk_investor")]
        workflow_type: String,
        #[arg(long = "meta", value_name = "KEY=VALUE", help = "Metadata entry; repeatable")]
        metadata: Vec<String>,
    },
    #[command(about = "Record an approval for the workflow's current step")]
    Approve {
        workflow_id: String,
        #[arg(long)]
        role: String,
        #[arg(long)]
        approver: String,
        #[arg(long)]
        comment: Option<String>,
    },
    #[command(about = "Reject the workflow at its current step")]
    Reject {
        workflow_id: String,
        #[arg(long)]
        role: String,
        #[arg(long)]
        rejecter: String,
        #[arg(long)]
        reason: String,
    },
    #[command(about = "Show a single workflow")]
    Show { workflow_id: String },
    #[command(about = "List workflows for a subject, newest first")]
    List {
        #[arg(long)]
        subject: String,
    },
    #[command(about = "List active workflows that still need a role's approval")]
    Pending {
        #[arg(long)]
        role: String,
    },
    #[command(about = "Expire workflows whose current step is past its timeout")]
    Sweep {
        #[arg(long, help = "Keep sweeping on an interval until Ctrl-C")]
        watch: bool,
        #[arg(long, help = "Override sweep.interval_secs for --watch")]
        interval_secs: Option<u64>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Config => commands::config::run(options),
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Templates => commands::templates::run(),
        Command::Create { subject, workflow_type, metadata } => {
            commands::workflow::create(options, &subject, &workflow_type, &metadata)
        }
        Command::Approve { workflow_id, role, approver, comment } => {
            commands::workflow::approve(options, &workflow_id, &role, &approver, comment)
        }
        Command::Reject { workflow_id, role, rejecter, reason } => {
            commands::workflow::reject(options, &workflow_id, &role, &rejecter, &reason)
        }
        Command::Show { workflow_id } => commands::workflow::show(options, &workflow_id),
        Command::List { subject } => commands::workflow::list(options, &subject),
        Command::Pending { role } => commands::workflow::pending(options, &role),
        Command::Sweep { watch, interval_secs } => {
            commands::sweep::run(options, watch, interval_secs)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
