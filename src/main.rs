//! givehub command-line interface.

use std::process::ExitCode;
use std::sync::Arc;

use log::error;

use givehub_lib::ai::OpenAiProvider;
use givehub_lib::crm::{sync, CrmClient};
use givehub_lib::db::{DonorDb, DonorListOptions};
use givehub_lib::email::{
    build_email_context, generate_email, polish_email, record_sent_email, EmailPurpose,
    EmailRequest,
};
use givehub_lib::enrichment::{enrich_donor, CrawlerClient, SearchClient};
use givehub_lib::query::{run_raw, run_structured, QueryRequest, MAX_QUERY_LIMIT};
use givehub_lib::services::{donors, stats};
use givehub_lib::state::AppState;
use givehub_lib::types::Config;
use givehub_lib::whatsapp;

#[derive(Debug, PartialEq)]
enum Command {
    DonorsList {
        search: Option<String>,
        status: Option<String>,
        page: u32,
    },
    DonorShow {
        id: String,
    },
    Stats,
    Query {
        json: String,
    },
    Sql {
        sql: String,
    },
    Ask {
        question: String,
    },
    Email {
        donor_id: String,
        purpose: String,
        record: bool,
    },
    Enrich {
        donor_id: String,
    },
    SyncPump,
    SyncStatus,
    Worker,
    Help,
    Version,
}

const USAGE: &str = "\
givehub — donor relationship backend

USAGE:
  givehub donors list [--search TEXT] [--status STATUS] [--page N]
  givehub donor <id>                 Show a donor with giving stats
  givehub stats                      Organization dashboard
  givehub query <json>               Run a structured query plan
  givehub sql <select>               Run a validated raw SELECT
  givehub ask <question>             Ask the assistant in plain language
  givehub email <donor-id> <purpose> [--record]
                                     Draft a donor email; purpose is
                                     thank-you, update, appeal, or free
                                     text (--record logs it as sent)
  givehub enrich <donor-id>          Research a donor on the web
  givehub sync pump                  Push pending donations to the CRM now
  givehub sync status                Show the CRM sync queue
  givehub worker                     Run the background sync worker
  givehub help | version

Config lives at ~/.givehub/config.json; API keys come from
GIVEHUB_CRM_API_KEY, GIVEHUB_LLM_API_KEY, and GIVEHUB_SEARCH_API_KEY.";

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut it = args.iter().map(|s| s.as_str());
    let command = match it.next() {
        None | Some("help") | Some("--help") | Some("-h") => return Ok(Command::Help),
        Some("version") | Some("--version") => return Ok(Command::Version),
        Some(cmd) => cmd,
    };

    match command {
        "donors" => match it.next() {
            Some("list") => {
                let mut search = None;
                let mut status = None;
                let mut page = 1u32;
                while let Some(flag) = it.next() {
                    match flag {
                        "--search" => {
                            search = Some(
                                it.next().ok_or("--search requires a value")?.to_string(),
                            )
                        }
                        "--status" => {
                            status = Some(
                                it.next().ok_or("--status requires a value")?.to_string(),
                            )
                        }
                        "--page" => {
                            page = it
                                .next()
                                .ok_or("--page requires a value")?
                                .parse()
                                .map_err(|_| "--page expects a number".to_string())?
                        }
                        other => return Err(format!("Unknown flag: {other}")),
                    }
                }
                Ok(Command::DonorsList { search, status, page })
            }
            other => Err(format!(
                "Unknown donors subcommand: {}",
                other.unwrap_or("(none)")
            )),
        },
        "donor" => {
            let id = it.next().ok_or("donor requires an id")?.to_string();
            Ok(Command::DonorShow { id })
        }
        "stats" => Ok(Command::Stats),
        "query" => {
            let json = it.collect::<Vec<_>>().join(" ");
            if json.trim().is_empty() {
                return Err("query requires a JSON plan".to_string());
            }
            Ok(Command::Query { json })
        }
        "sql" => {
            let sql = it.collect::<Vec<_>>().join(" ");
            if sql.trim().is_empty() {
                return Err("sql requires a SELECT statement".to_string());
            }
            Ok(Command::Sql { sql })
        }
        "ask" => {
            let question = it.collect::<Vec<_>>().join(" ");
            if question.trim().is_empty() {
                return Err("ask requires a question".to_string());
            }
            Ok(Command::Ask { question })
        }
        "email" => {
            let donor_id = it.next().ok_or("email requires a donor id")?.to_string();
            let rest: Vec<&str> = it.collect();
            let record = rest.contains(&"--record");
            let purpose = rest
                .iter()
                .filter(|w| **w != "--record")
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            if purpose.trim().is_empty() {
                return Err("email requires a purpose, e.g. \"thank-you for the March gift\"".to_string());
            }
            Ok(Command::Email { donor_id, purpose, record })
        }
        "enrich" => {
            let donor_id = it.next().ok_or("enrich requires a donor id")?.to_string();
            Ok(Command::Enrich { donor_id })
        }
        "sync" => match it.next() {
            Some("pump") => Ok(Command::SyncPump),
            Some("status") => Ok(Command::SyncStatus),
            other => Err(format!(
                "Unknown sync subcommand: {} (expected pump or status)",
                other.unwrap_or("(none)")
            )),
        },
        "worker" => Ok(Command::Worker),
        other => Err(format!("Unknown command: {other} (try givehub help)")),
    }
}

/// Map the CLI's free-form purpose text onto a drafting request: a known
/// leading keyword selects the purpose, anything further (or an
/// unrecognized phrase entirely) becomes custom instructions.
fn email_request(donor_id: &str, purpose_text: &str) -> EmailRequest {
    let mut words = purpose_text.splitn(2, ' ');
    let first = words.next().unwrap_or_default();
    let rest = words.next().map(str::trim).filter(|s| !s.is_empty());
    match EmailPurpose::from_word(first) {
        Some(purpose) => EmailRequest {
            donor_id: donor_id.to_string(),
            purpose,
            instructions: rest.map(str::to_string),
        },
        None => EmailRequest {
            donor_id: donor_id.to_string(),
            purpose: EmailPurpose::Custom,
            instructions: Some(purpose_text.to_string()),
        },
    }
}

fn build_provider(config: &Config) -> Result<OpenAiProvider, String> {
    OpenAiProvider::new(
        config.llm.api_base_url.clone(),
        config.llm.model.clone(),
        config.llm.temperature,
        config.llm.timeout_seconds,
        config.llm.api_key(),
    )
    .map_err(|e| e.to_string())
}

async fn run_command(command: Command) -> Result<(), String> {
    if matches!(command, Command::Help) {
        println!("{USAGE}");
        return Ok(());
    }
    if matches!(command, Command::Version) {
        println!("givehub {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let state = Arc::new(AppState::new());
    state.init()?;
    let config = state.get_config()?;

    match command {
        Command::Help | Command::Version => unreachable!(),
        Command::DonorsList { search, status, page } => {
            let options = DonorListOptions {
                search,
                status,
                page: Some(page),
                ..Default::default()
            };
            let result = donors::list_donors(&state, options)?;
            for donor in &result.items {
                println!(
                    "{}  {}  [{}] {}",
                    donor.id,
                    donor.name,
                    donor.status,
                    donor.email.as_deref().unwrap_or("-")
                );
            }
            println!(
                "page {}/{} ({} donor(s))",
                result.page,
                (result.total as u32).div_ceil(result.page_size).max(1),
                result.total
            );
        }
        Command::DonorShow { id } => {
            let donor = donors::get_donor(&state, &id)?;
            let giving = stats::donor_stats(&state, &id)?;
            println!("{}", serde_json::to_string_pretty(&donor).map_err(|e| e.to_string())?);
            println!("---");
            println!("{}", serde_json::to_string_pretty(&giving).map_err(|e| e.to_string())?);
        }
        Command::Stats => {
            let dashboard = stats::org_dashboard(&state)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&dashboard).map_err(|e| e.to_string())?
            );
        }
        Command::Query { json } => {
            let request: QueryRequest =
                serde_json::from_str(&json).map_err(|e| format!("Invalid query plan: {e}"))?;
            let db = DonorDb::open().map_err(|e| e.to_string())?;
            let outcome = run_structured(&db, &request, &config.organization_id, "cli")
                .map_err(|e| e.to_string())?;
            println!("-- {} ({} ms)", outcome.description, outcome.duration_ms);
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome.rows).map_err(|e| e.to_string())?
            );
        }
        Command::Sql { sql } => {
            let db = DonorDb::open().map_err(|e| e.to_string())?;
            let outcome = run_raw(&db, &sql, &config.organization_id, "cli", MAX_QUERY_LIMIT)
                .map_err(|e| e.to_string())?;
            println!("-- {} row(s) in {} ms", outcome.rows.len(), outcome.duration_ms);
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome.rows).map_err(|e| e.to_string())?
            );
        }
        Command::Ask { question } => {
            let db = DonorDb::open().map_err(|e| e.to_string())?;
            let provider = build_provider(&config)?;
            let reply = whatsapp::handle_message(
                &db,
                &provider,
                &config,
                &state.wa_rate,
                "cli",
                &question,
            )
            .await?;
            println!("{reply}");
        }
        Command::Email { donor_id, purpose, record } => {
            let db = DonorDb::open().map_err(|e| e.to_string())?;
            let provider = build_provider(&config)?;
            let context = build_email_context(&db, &config.organization_id, &donor_id)?;
            let request = email_request(&donor_id, &purpose);
            let draft = generate_email(&provider, &context, &request)
                .await
                .map_err(|e| e.to_string())?;
            let polished = polish_email(&provider, &draft).await.map_err(|e| e.to_string())?;
            println!("{}", polished.render_plain_text());
            if let Some(tone) = &polished.tone {
                println!("[tone: {tone}]");
            }
            if record {
                record_sent_email(&db, &config.organization_id, &donor_id, &polished)?;
                println!("\nLogged as an outbound email.");
            }
        }
        Command::Enrich { donor_id } => {
            let db = DonorDb::open().map_err(|e| e.to_string())?;
            let provider = build_provider(&config)?;
            let search = SearchClient::new(&config.search).map_err(|e| e.to_string())?;
            let crawler = CrawlerClient::new(&config.crawler).map_err(|e| e.to_string())?;
            let result = enrich_donor(
                &db,
                &provider,
                &search,
                &crawler,
                &config.organization_id,
                &donor_id,
            )
            .await
            .map_err(|e| e.to_string())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?
            );
        }
        Command::SyncPump => {
            let db = DonorDb::open().map_err(|e| e.to_string())?;
            let client = CrmClient::new(&config.crm).map_err(|e| e.to_string())?;
            let summary = sync::process_due(
                &db,
                &client,
                &config.organization_id,
                config.sync.batch_size,
            )
            .await?;
            println!(
                "{} synced, {} failed, {} skipped",
                summary.synced, summary.failed, summary.skipped
            );
        }
        Command::SyncStatus => {
            let db = DonorDb::open().map_err(|e| e.to_string())?;
            let counts = db.sync_queue_counts().map_err(|e| e.to_string())?;
            if counts.is_empty() {
                println!("sync queue is empty");
            }
            for (queue_state, count) in counts {
                println!("{queue_state}: {count}");
            }
        }
        Command::Worker => {
            println!("givehub worker running (ctrl-c to stop)");
            let poller_state = Arc::clone(&state);
            tokio::spawn(givehub_lib::crm::run_crm_sync_poller(poller_state));
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| format!("Failed to wait for ctrl-c: {e}"))?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };
    if let Err(e) = run_command(command).await {
        error!("{e}");
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(parse_args(&args(&[])).unwrap(), Command::Help);
        assert_eq!(parse_args(&args(&["version"])).unwrap(), Command::Version);
        assert_eq!(parse_args(&args(&["stats"])).unwrap(), Command::Stats);
        assert_eq!(parse_args(&args(&["sync", "pump"])).unwrap(), Command::SyncPump);
        assert_eq!(parse_args(&args(&["worker"])).unwrap(), Command::Worker);
    }

    #[test]
    fn test_parse_donors_list_flags() {
        let parsed = parse_args(&args(&[
            "donors", "list", "--search", "ada", "--status", "active", "--page", "3",
        ]))
        .unwrap();
        assert_eq!(
            parsed,
            Command::DonorsList {
                search: Some("ada".to_string()),
                status: Some("active".to_string()),
                page: 3,
            }
        );
        assert!(parse_args(&args(&["donors", "list", "--page", "x"])).is_err());
        assert!(parse_args(&args(&["donors", "list", "--search"])).is_err());
    }

    #[test]
    fn test_parse_multiword_tail_commands() {
        assert_eq!(
            parse_args(&args(&["ask", "top", "donors", "this", "year"])).unwrap(),
            Command::Ask { question: "top donors this year".to_string() }
        );
        assert_eq!(
            parse_args(&args(&["email", "d1", "thank-you", "note", "--record"])).unwrap(),
            Command::Email {
                donor_id: "d1".to_string(),
                purpose: "thank-you note".to_string(),
                record: true,
            }
        );
        assert!(parse_args(&args(&["email", "d1"])).is_err());
    }

    #[test]
    fn test_email_request_mapping() {
        let req = email_request("d1", "thank-you for the March gift");
        assert_eq!(req.purpose, EmailPurpose::ThankYou);
        assert_eq!(req.instructions.as_deref(), Some("for the March gift"));

        let req = email_request("d1", "update");
        assert_eq!(req.purpose, EmailPurpose::Update);
        assert!(req.instructions.is_none());

        let req = email_request("d1", "invite them to the gala");
        assert_eq!(req.purpose, EmailPurpose::Custom);
        assert_eq!(req.instructions.as_deref(), Some("invite them to the gala"));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(parse_args(&args(&["sync", "everything"])).is_err());
        assert!(parse_args(&args(&["donors", "list", "--color"])).is_err());
    }
}
