mod input;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tramita_engine::{
    actions::{
        create_default_registry, handlers::INSTANCE_FIELD, ActionDispatcher, ActionStatus,
        Collaborators, LogNotifier,
    },
    config::EngineConfig,
    entity::JsonEntity,
    expression::Expression,
    rules::{load_rule_set, parse_rule_set, validate_rule_set, MatchResult, RuleEngine, Severity},
    workflow::{NewInstance, Task, WorkflowCoordinator},
    OptionResultExt, ResultExt,
};

#[derive(Parser)]
#[command(name = "tramita")]
#[command(version, about = "Tramita rules and workflow CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a rule set (YAML or JSON)
    ///
    /// Exits non-zero when any error-level issue is found.
    Validate {
        /// Rule set file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },

    /// Evaluate a rule set against an entity
    ///
    /// Examples:
    ///     tramita evaluate rules.yaml --entity '{"tipo": "urgente"}'
    ///     tramita evaluate rules.yaml --entity @solicitud.json --set monto=20000
    ///     tramita evaluate rules.yaml --entity '{}' --workflow aprobacion --dry-run
    #[command(verbatim_doc_comment)]
    Evaluate {
        /// Rule set file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Entity fields as a JSON object, or @path to a JSON file
        #[arg(short, long, value_name = "JSON|@FILE", default_value = "{}")]
        entity: String,

        /// Set entity fields (format: key=value, dotted keys allowed), can be repeated
        #[arg(long = "set", value_name = "KEY=VALUE")]
        variables: Vec<String>,

        /// Start an in-memory instance of this workflow and bind it to the entity
        #[arg(short, long, value_name = "WORKFLOW_ID")]
        workflow: Option<String>,

        /// Evaluate conditions without running any action
        #[arg(long)]
        dry_run: bool,

        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },

    /// Evaluate a conditional expression
    ///
    /// Example:
    ///     tramita expr "monto > 1000 && tipo == 'urgente'" --context '{"monto": 5000, "tipo": "urgente"}'
    #[command(verbatim_doc_comment)]
    Expr {
        #[arg(value_name = "EXPRESSION")]
        expression: String,

        /// Variables as a JSON object, or @path to a JSON file
        #[arg(short, long, value_name = "JSON|@FILE", default_value = "{}")]
        context: String,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tramita_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = EngineConfig::from_env().context("Failed to load TRAMITA_* configuration")?;

    match cli.command {
        Commands::Validate { file, output } => validate(&file, output, &config),
        Commands::Evaluate {
            file,
            entity,
            variables,
            workflow,
            dry_run,
            output,
        } => {
            evaluate(
                &file,
                &entity,
                &variables,
                workflow.as_deref(),
                dry_run,
                output,
                &config,
            )
            .await
        }
        Commands::Expr {
            expression,
            context,
        } => expr(&expression, &context),
    }
}

fn validate(file: &Path, output: OutputFormat, config: &EngineConfig) -> Result<()> {
    let content = input::read_rules_file(file)?;
    let rules = parse_rule_set(&content)
        .log("parsing rule set")
        .with_context(|| format!("Invalid rule set: {}", file.display()))?;

    let coordinator = Arc::new(WorkflowCoordinator::in_memory(config));
    let registry = create_default_registry(config, &collaborators(coordinator));
    let issues = validate_rule_set(&rules, Some(&registry));
    let has_errors = issues.iter().any(|i| i.severity == Severity::Error);

    match output {
        OutputFormat::Json => {
            let report = json!({
                "file": file.display().to_string(),
                "rules": rules.len(),
                "valid": !has_errors,
                "issues": issues,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            if issues.is_empty() {
                println!("{}: {} rules, no issues", file.display(), rules.len());
            } else {
                println!("{:<10} {:<25} {}", "SEVERITY", "RULE", "MESSAGE");
                for issue in &issues {
                    println!("{:<10} {:<25} {}", issue.severity, issue.rule, issue.message);
                }
            }
        }
    }

    if has_errors {
        std::process::exit(1);
    }
    Ok(())
}

async fn evaluate(
    file: &Path,
    entity_arg: &str,
    variables: &[String],
    workflow: Option<&str>,
    dry_run: bool,
    output: OutputFormat,
    config: &EngineConfig,
) -> Result<()> {
    let content = input::read_rules_file(file)?;

    let mut fields = input::json_object(entity_arg).context("Invalid --entity")?;
    for (key, value) in input::parse_variables(variables)? {
        input::set_path(&mut fields, &key, value);
    }

    let coordinator = Arc::new(WorkflowCoordinator::in_memory(config));
    let instance_id = match workflow {
        Some(workflow_id) => {
            let instance = coordinator
                .start_instance(
                    NewInstance::new(workflow_id)
                        .with_data(fields.clone())
                        .initiated_by("tramita"),
                )
                .await
                .log("starting workflow instance")?;
            let instance = coordinator.begin_instance(instance.id).await?;
            fields.insert(INSTANCE_FIELD.to_string(), Value::String(instance.id.to_string()));
            Some(instance.id)
        }
        None => None,
    };

    let registry = create_default_registry(config, &collaborators(coordinator.clone()));
    let (rules, _issues) = load_rule_set(&content, &registry, config)
        .log("loading rule set")
        .with_context(|| format!("Failed to load rule set: {}", file.display()))?;

    let engine = RuleEngine::new(ActionDispatcher::new(registry)).dry_run(dry_run);
    let entity = JsonEntity::new(entity_label(file), fields);
    let (results, summary) = engine.evaluate_with_summary(&entity, &rules).await;

    let tasks = match instance_id {
        Some(id) => coordinator.tasks_for_instance(id).await?,
        None => Vec::new(),
    };

    match output {
        OutputFormat::Json => {
            let report = json!({
                "summary": summary,
                "results": results,
                "entity": entity.snapshot(),
                "tasks": tasks,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            print_results(&results);
            print_tasks(&tasks);
            println!();
            println!("{}", summary);
            println!(
                "{}",
                serde_json::to_string_pretty(&Value::Object(entity.snapshot()))?
            );
        }
    }
    Ok(())
}

fn expr(expression: &str, context: &str) -> Result<()> {
    let variables: HashMap<String, Value> = input::json_object(context)
        .context("Invalid --context")?
        .into_iter()
        .collect();
    let parsed = Expression::parse(expression)
        .with_context(|| format!("Invalid expression: {}", expression))?;
    let missing: Vec<&str> = parsed
        .variables()
        .into_iter()
        .filter(|name| {
            let root = name.split('.').next().unwrap_or_default();
            !variables.contains_key(root)
        })
        .collect();
    if !missing.is_empty() {
        tracing::warn!(variables = ?missing, "Variables not in context evaluate as null");
    }
    println!("{}", parsed.evaluate(&variables));
    Ok(())
}

/// Notifications go to the log; workflow actions to the in-memory coordinator.
fn collaborators(coordinator: Arc<WorkflowCoordinator>) -> Collaborators {
    Collaborators::new()
        .with_notifier(Arc::new(LogNotifier::new()))
        .with_coordinator(coordinator)
}

fn entity_label(file: &Path) -> String {
    file.file_stem()
        .log_none("rule set path has no file name")
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "entity".to_string())
}

fn print_results(results: &[MatchResult]) {
    if results.is_empty() {
        println!("No rules matched.");
        return;
    }
    println!("{:<25} {:<20} {:<10} {}", "RULE", "ACTION", "STATUS", "DETAIL");
    for result in results {
        if result.actions.is_empty() {
            println!("{:<25} {:<20} {:<10}", result.rule, "-", "-");
        }
        for action in &result.actions {
            let detail = match action.status {
                ActionStatus::Succeeded => action
                    .output
                    .as_ref()
                    .map(|o| o.to_string())
                    .unwrap_or_default(),
                _ => action.error.clone().unwrap_or_default(),
            };
            println!(
                "{:<25} {:<20} {:<10} {}",
                result.rule, action.action_type, action.status, detail
            );
        }
    }
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        return;
    }
    println!();
    println!("{:<38} {:<20} {:<10} {:<15} {}", "TASK ID", "NAME", "STATE", "GROUP", "ASSIGNEE");
    for task in tasks {
        let group = task.parallel_group.clone().unwrap_or_else(|| "-".to_string());
        let assignee = task
            .assignee
            .as_ref()
            .map(|a| format!("{}:{}", a.kind, a.id))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<20} {:<10} {:<15} {}",
            task.id, task.name, task.state, group, assignee
        );
    }
}
