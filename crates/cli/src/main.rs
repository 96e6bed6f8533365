use api_shared::{AuditRecordRes, DecisionRes, FindingRes, SubmitOrderRes};
use clap::{Args, Parser, Subcommand};
use guardian_core::constants::DEFAULT_GATEWAY_TIMEOUT;
use guardian_core::{
    gateway_settings_from_env_values, load_knowledge_base, AuditLog, CoreConfig, KnowledgeBase,
    SessionId, SessionManager, SubmitOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "guardian")]
#[command(about = "Patient Safety Guardian CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct CoreArgs {
    /// Directory of `<patient_id>.json` records
    #[arg(long, env = "GUARDIAN_PATIENT_DATA_DIR", default_value = "patients")]
    patients: PathBuf,
    /// Audit log file to append to (in memory only when omitted)
    #[arg(long, env = "GUARDIAN_AUDIT_LOG")]
    audit_log: Option<PathBuf>,
    /// YAML knowledge base overriding the built-in tables
    #[arg(long, env = "GUARDIAN_KNOWLEDGE_FILE")]
    knowledge: Option<PathBuf>,
    /// Upper bound on tool calls per order
    #[arg(long, env = "GUARDIAN_MAX_TOOL_CALLS")]
    max_tool_calls: Option<usize>,
    /// OpenAI-compatible reasoning endpoint; offline when omitted
    #[arg(long, env = "GUARDIAN_GATEWAY_URL")]
    gateway_url: Option<String>,
    #[arg(long, env = "GUARDIAN_GATEWAY_MODEL")]
    gateway_model: Option<String>,
    #[arg(long, env = "GUARDIAN_GATEWAY_API_KEY", hide_env_values = true)]
    gateway_api_key: Option<String>,
    /// Reasoning service timeout in seconds
    #[arg(long, env = "GUARDIAN_GATEWAY_TIMEOUT_SECS")]
    gateway_timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all patients with a readable record
    Patients {
        #[command(flatten)]
        core: CoreArgs,
    },
    /// Run a one-shot safety check of an order for a patient
    Check {
        #[command(flatten)]
        core: CoreArgs,
        /// Patient identifier, e.g. P-90210
        patient_id: String,
        /// Free-text medication order, e.g. "aspirin 81 mg daily"
        order: String,
        /// Print the response as JSON
        #[arg(long)]
        json: bool,
        /// Print the session's audit trail afterwards
        #[arg(long)]
        audit: bool,
    },
    /// Print records from an audit log file
    Audit {
        /// Audit JSON Lines file
        #[arg(long, env = "GUARDIAN_AUDIT_LOG", default_value = "audit/safety_interventions.jsonl")]
        file: PathBuf,
        /// Only show this session
        #[arg(long)]
        session: Option<String>,
    },
    /// Print the knowledge base tables as YAML
    Knowledge {
        /// Show this file (after validation) instead of the built-in tables
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

async fn open_manager(core: CoreArgs) -> Result<SessionManager, Box<dyn std::error::Error>> {
    let mut cfg = CoreConfig::new(core.patients, core.audit_log)?
        .with_knowledge(load_knowledge_base(core.knowledge)?)?
        .with_gateway_timeout(
            core.gateway_timeout
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_GATEWAY_TIMEOUT),
        )?;
    if let Some(max) = core.max_tool_calls {
        cfg = cfg.with_max_tool_calls(max)?;
    }
    let gateway =
        gateway_settings_from_env_values(core.gateway_url, core.gateway_model, core.gateway_api_key);
    Ok(SessionManager::open(Arc::new(cfg), &gateway).await?)
}

fn print_finding(finding: &FindingRes) {
    println!(
        "  - [{} / {}] {}",
        finding.source_tool, finding.severity, finding.explanation
    );
}

fn print_decision(decision: &DecisionRes) {
    println!("Decision: {}", decision.status.to_uppercase());
    println!("{}", decision.explanation);
    if !decision.findings.is_empty() {
        println!("Findings:");
        decision.findings.iter().for_each(print_finding);
    }
    if !decision.cautions.is_empty() {
        println!("Cautions:");
        decision.cautions.iter().for_each(print_finding);
    }
    if let Some(alternative) = &decision.alternative {
        println!("Suggested alternative: {}", alternative);
    }
    if let Some(education) = &decision.education {
        println!("Patient education: {}", education);
    }
    if decision.fallback_used {
        println!("(reasoning service unavailable, all safety tools were run)");
    }
}

fn print_record(record: &AuditRecordRes) {
    println!(
        "#{} {} session={} patient={} action={} status={}",
        record.sequence,
        record.timestamp,
        record.session_id,
        record.patient_id,
        record.action,
        record.resulting_status
    );
    if let Some(input) = &record.input_text {
        println!("    input: {}", input);
    }
    for finding in &record.findings_snapshot {
        println!(
            "    [{} / {}] {}",
            finding.source_tool, finding.severity, finding.explanation
        );
    }
}

async fn check(
    manager: &SessionManager,
    patient_id: &str,
    order: &str,
    json: bool,
) -> Result<SessionId, Box<dyn std::error::Error>> {
    let session_id = manager.start_session(patient_id).await?;
    let mut outcome = manager.submit_order(session_id, order).await?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let res = SubmitOrderRes::from(&outcome);
        if json {
            println!("{}", serde_json::to_string_pretty(&res)?);
        }

        let SubmitOutcome::Clarification(request) = &outcome else {
            if let (false, Some(decision)) = (json, &res.decision) {
                print_decision(decision);
            }
            return Ok(session_id);
        };

        eprintln!("Clarification needed: {}", request.question);
        eprint!("> ");
        match stdin.next_line().await? {
            Some(reply) if !reply.trim().is_empty() => {
                outcome = manager.submit_order(session_id, &reply).await?;
            }
            _ => {
                manager.abandon_session(session_id).await?;
                eprintln!("No reply given; session abandoned.");
                return Ok(session_id);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guardian_core=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Patients { core }) => {
            let manager = open_manager(core).await?;
            let patients = manager.list_patients().await?;
            if patients.is_empty() {
                println!("No patients found.");
            } else {
                for patient in patients {
                    println!("ID: {}, Name: {}", patient.patient_id, patient.name);
                }
            }
        }
        Some(Commands::Check {
            core,
            patient_id,
            order,
            json,
            audit,
        }) => {
            let manager = open_manager(core).await?;
            let session_id = check(&manager, &patient_id, &order, json).await?;
            if audit {
                println!("Audit trail:");
                for record in manager.get_audit_trail(session_id).await? {
                    print_record(&AuditRecordRes::from(&record));
                }
            }
        }
        Some(Commands::Audit { file, session }) => {
            let session = session.as_deref().map(SessionId::parse).transpose()?;
            let records = AuditLog::read_file(&file).await?;
            let mut shown = 0;
            for record in records
                .iter()
                .filter(|r| session.map_or(true, |id| r.session_id == id))
            {
                print_record(&AuditRecordRes::from(record));
                shown += 1;
            }
            if shown == 0 {
                println!("No audit records found.");
            }
        }
        Some(Commands::Knowledge { file }) => {
            let kb = match file {
                Some(path) => KnowledgeBase::from_yaml_file(&path)?,
                None => KnowledgeBase::default(),
            };
            print!("{}", serde_yaml::to_string(&kb)?);
        }
        None => {
            println!("No command provided. Use --help for usage.");
        }
    }

    Ok(())
}
