use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use revcycle_core::{
    AllocationRow, Conditions, CyclePhase, CycleQuestion, FieldValue, FormId, PhaseNr, QuestionId,
    ReviewObjId, ReviewScores, UserId,
};
use revcycle_store::{
    Config, Mapper, Record, ReviewCycle, ReviewerAllocation, SqliteRepository,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

/// revcycle: inspect and administer peer review cycle databases
#[derive(Parser, Debug)]
#[command(name = "revcycle")]
#[command(about = "Inspect and administer peer review cycle databases", long_about = None)]
struct Cli {
    /// Database file (overrides REVCYCLE_STATE_DIR / REVCYCLE_DB_FILE)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Review container to operate on
    #[arg(long = "obj", env = "REVCYCLE_REVIEW_OBJ")]
    review_obj: u64,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List cycle questions
    Questions(FilterArgs),
    /// List review forms
    Forms(FilterArgs),
    /// List phase configuration
    Phases(FilterArgs),
    /// List raw allocation rows
    Allocations(FilterArgs),
    /// Add or replace a cycle question
    AddQuestion(AddQuestionArgs),
    /// Set the number of reviewers a phase requires
    SetPhase(SetPhaseArgs),
    /// Show the allocation of one author in one phase, if it meets the quorum
    ShowAllocation(AllocationKeyArgs),
    /// Allocate reviewers to an author and open their review forms
    Allocate(AllocateArgs),
    /// Delete every allocation of a phase
    ClearPhase(PhaseArgs),
    /// Remove a phase and its allocations
    RemovePhase(PhaseArgs),
    /// List unfinished questions of a phase without a complete allocation
    Unallocated(PhaseArgs),
    /// List unfinished questions that have a submitted review
    Reviewed,
    /// Mark questions finished
    Finish(FinishArgs),
    /// Submit a review from a JSON scores document
    Submit(SubmitArgs),
}

#[derive(Parser, Debug)]
struct FilterArgs {
    /// Attribute filter, repeatable; all must match
    #[arg(long = "where", value_name = "FIELD=VALUE", value_parser = parse_condition)]
    conditions: Vec<(String, FieldValue)>,
}

#[derive(Parser, Debug)]
struct AddQuestionArgs {
    id: u64,

    #[arg(long)]
    author: u64,

    #[arg(long)]
    phase: u64,

    #[arg(long, default_value = "")]
    title: String,
}

#[derive(Parser, Debug)]
struct SetPhaseArgs {
    phase: u64,
    nr_reviewers: u32,
}

#[derive(Parser, Debug)]
struct PhaseArgs {
    phase: u64,
}

#[derive(Parser, Debug)]
struct AllocationKeyArgs {
    phase: u64,
    author: u64,
}

#[derive(Parser, Debug)]
struct AllocateArgs {
    phase: u64,
    author: u64,

    /// Reviewer user ids
    #[arg(required = true, num_args = 1..)]
    reviewers: Vec<u64>,
}

#[derive(Parser, Debug)]
struct FinishArgs {
    #[arg(required = true, num_args = 1..)]
    ids: Vec<u64>,
}

#[derive(Parser, Debug)]
struct SubmitArgs {
    form_id: u64,

    /// Path to a JSON `ReviewScores` document, or `-` for stdin
    scores: PathBuf,
}

#[derive(Serialize)]
struct AllocationView {
    phase_nr: u64,
    author: u64,
    loaded: bool,
    reviewers: Vec<u64>,
}

/// Parse `field=value`. Integers and `true`/`false` keep their type so they
/// compare naturally against integer and flag columns.
fn parse_condition(s: &str) -> Result<(String, FieldValue), String> {
    let (field, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{}'", s))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in '{}'", s));
    }

    let value = match value {
        "true" => FieldValue::Bool(true),
        "false" => FieldValue::Bool(false),
        v => v
            .parse::<i64>()
            .map(FieldValue::Int)
            .unwrap_or_else(|_| FieldValue::Text(v.to_string())),
    };
    Ok((field.to_string(), value))
}

fn conditions(args: FilterArgs) -> Conditions {
    args.conditions.into_iter().collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn open_repository(db: Option<PathBuf>) -> Result<SqliteRepository> {
    match db {
        Some(path) => SqliteRepository::new(&path)
            .with_context(|| format!("Failed to open review database at {}", path.display())),
        None => Config::from_env()?.open_repository(),
    }
}

/// The allocation stored for `author` in `phase`, as the mapper loads it.
async fn stored_allocation(mapper: &Mapper, phase: u64, author: u64) -> Result<AllocationView> {
    let mut allocation = ReviewerAllocation::unbound(mapper);
    let loaded = allocation
        .load_from_db(PhaseNr(phase), mapper.review_obj(), UserId(author))
        .await?;
    Ok(AllocationView {
        phase_nr: phase,
        author,
        loaded,
        reviewers: allocation.reviewers().iter().map(|r| r.0).collect(),
    })
}

fn read_scores(path: &PathBuf) -> Result<ReviewScores> {
    let raw = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("Failed to read scores from stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scores from {}", path.display()))?
    };
    serde_json::from_str(&raw).context("Scores are not a valid ReviewScores document")
}

async fn run(cycle: &ReviewCycle, command: Commands) -> Result<()> {
    let mapper: &Mapper = cycle.mapper();
    let review_obj = cycle.review_obj();

    match command {
        Commands::Questions(args) => {
            print_json(&mapper.get_cycle_questions(&conditions(args)).await?)
        }
        Commands::Forms(args) => print_json(&mapper.get_review_forms(&conditions(args)).await?),
        Commands::Phases(args) => print_json(&mapper.get_cycle_phases(&conditions(args)).await?),
        Commands::Allocations(args) => {
            let rows: Vec<AllocationRow> =
                mapper.get_reviewer_allocations(&conditions(args)).await?;
            print_json(&rows)
        }
        Commands::AddQuestion(args) => {
            let question = CycleQuestion {
                id: QuestionId(args.id),
                review_obj,
                author: UserId(args.author),
                phase_nr: PhaseNr(args.phase),
                finished: false,
                title: args.title,
            };
            question.store_to_db(mapper).await?;
            info!(id = args.id, "Stored question");
            print_json(&question)
        }
        Commands::SetPhase(args) => {
            cycle
                .configure_phase(PhaseNr(args.phase), args.nr_reviewers)
                .await?;
            print_json(&CyclePhase {
                review_obj,
                phase_nr: PhaseNr(args.phase),
                nr_reviewers: args.nr_reviewers,
            })
        }
        Commands::ShowAllocation(args) => {
            print_json(&stored_allocation(mapper, args.phase, args.author).await?)
        }
        Commands::Allocate(args) => {
            let reviewers = args.reviewers.iter().copied().map(UserId).collect();
            let stored = cycle
                .allocate(PhaseNr(args.phase), UserId(args.author), reviewers)
                .await?;
            if !stored {
                anyhow::bail!(
                    "Allocation for author {} has fewer distinct reviewers than phase {} requires",
                    args.author,
                    args.phase
                );
            }
            print_json(&stored_allocation(mapper, args.phase, args.author).await?)
        }
        Commands::ClearPhase(args) => {
            ReviewerAllocation::for_phase(mapper, PhaseNr(args.phase), review_obj)
                .delete_from_db()
                .await?;
            print_json(&serde_json::json!({ "cleared": args.phase }))
        }
        Commands::RemovePhase(args) => {
            let removed = cycle.remove_phase(PhaseNr(args.phase)).await?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
        Commands::Unallocated(args) => {
            print_json(&cycle.unallocated_questions(PhaseNr(args.phase)).await?)
        }
        Commands::Reviewed => print_json(&cycle.reviewed_questions().await?),
        Commands::Finish(args) => {
            let ids: Vec<QuestionId> = args.ids.into_iter().map(QuestionId).collect();
            let finished = cycle.finish_questions(&ids).await?;
            print_json(&serde_json::json!({ "finished": finished }))
        }
        Commands::Submit(args) => {
            let scores = read_scores(&args.scores)?;
            if !cycle.submit_review(FormId(args.form_id), scores).await? {
                anyhow::bail!(
                    "Review form {} was not submitted: unknown form or unanswered rubric",
                    args.form_id
                );
            }
            print_json(&serde_json::json!({ "submitted": args.form_id }))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let repo = open_repository(cli.db)?;
    let cycle = ReviewCycle::new(ReviewObjId(cli.review_obj), Arc::new(repo));
    run(&cycle, cli.command).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use revcycle_store::InMemoryRepository;

    #[test]
    fn test_parse_condition_types() {
        assert_eq!(
            parse_condition("author=42").unwrap(),
            ("author".to_string(), FieldValue::Int(42))
        );
        assert_eq!(
            parse_condition("finished=false").unwrap(),
            ("finished".to_string(), FieldValue::Bool(false))
        );
        assert_eq!(
            parse_condition("title=a=b").unwrap(),
            ("title".to_string(), FieldValue::Text("a=b".to_string()))
        );
    }

    #[test]
    fn test_parse_condition_rejects_malformed() {
        assert!(parse_condition("author").is_err());
        assert!(parse_condition("=5").is_err());
    }

    #[tokio::test]
    async fn test_stored_allocation_reports_distinct_reviewers() {
        let cycle = ReviewCycle::new(ReviewObjId(7), Arc::new(InMemoryRepository::new()));
        cycle.configure_phase(PhaseNr(1), 2).await.unwrap();
        assert!(cycle
            .allocate(PhaseNr(1), UserId(100), vec![UserId(5), UserId(9), UserId(5)])
            .await
            .unwrap());

        let view = stored_allocation(cycle.mapper(), 1, 100).await.unwrap();
        assert!(view.loaded);
        let mut reviewers = view.reviewers;
        reviewers.sort_unstable();
        assert_eq!(reviewers, vec![5, 9]);

        let missing = stored_allocation(cycle.mapper(), 1, 200).await.unwrap();
        assert!(!missing.loaded);
        assert!(missing.reviewers.is_empty());
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "revcycle", "--obj", "7", "--db", "/tmp/x.db", "allocate", "1", "100", "5", "9",
        ])
        .unwrap();
        assert_eq!(cli.review_obj, 7);
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        match cli.command {
            Commands::Allocate(args) => assert_eq!(args.reviewers, vec![5, 9]),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
