mod config;

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use log::debug;
use tokio_util::sync::CancellationToken;

use azurerm_core::differ::{create_destroy_plan, create_plan};
use azurerm_core::effect::Effect;
use azurerm_core::interpreter::{EffectOutcome, Interpreter, InterpreterConfig};
use azurerm_core::plan::Plan;
use azurerm_core::provider::Provider;
use azurerm_core::resource::{Resource, ResourceAddress, State, Value};
use azurerm_core::schema::ResourceSchema;
use azurerm_provider::AzureRmProvider;
use azurerm_provider::resources::resource_types;
use azurerm_state::{LockInfo, SENSITIVE_PLACEHOLDER, StateBackend, StateFile, create_backend};

use config::Workspace;

#[derive(Parser)]
#[command(name = "azurerm")]
#[command(about = "Manage Azure Resource Manager resources declared in a JSON file", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, global = true, default_value = "azurerm.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration file
    Validate,
    /// Show execution plan without applying changes
    Plan,
    /// Apply changes to reach the desired state
    Apply,
    /// Destroy all resources tracked in the state
    Destroy {
        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Adopt an existing remote resource into the state
    Import {
        /// Resource type (e.g., azurerm_app_service_extension)
        resource_type: String,
        /// Resource name in the configuration
        name: String,
        /// ARM resource identifier
        identifier: String,
    },
    /// Show the current state with sensitive values masked
    Show,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let file = cli.config;
    let result = match cli.command {
        Commands::Validate => run_validate(&file),
        Commands::Plan => run_plan(&file, cancel).await,
        Commands::Apply => run_apply(&file, cancel).await,
        Commands::Destroy { auto_approve } => run_destroy(&file, auto_approve, cancel).await,
        Commands::Import {
            resource_type,
            name,
            identifier,
        } => run_import(&file, ResourceAddress::new(resource_type, name), &identifier, cancel).await,
        Commands::Show => run_show(&file).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Ctrl-C cancels every in-flight operation; pollers and lock waits return promptly
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            eprintln!("{}", "Interrupted, cancelling operations...".yellow().bold());
            cancel.cancel();
        }
    });
}

fn get_schemas() -> HashMap<String, ResourceSchema> {
    resource_types()
        .into_iter()
        .map(|t| (t.name().to_string(), t.schema()))
        .collect()
}

fn sensitive_attributes(schemas: &HashMap<String, ResourceSchema>, resource_type: &str) -> Vec<String> {
    schemas
        .get(resource_type)
        .map(ResourceSchema::sensitive_attributes)
        .unwrap_or_default()
}

fn validate_resources(resources: &[Resource]) -> Result<(), String> {
    let schemas = get_schemas();
    let mut all_errors = Vec::new();

    for resource in resources {
        match schemas.get(&resource.address.resource_type) {
            Some(schema) => {
                let mut attributes = resource.attributes.clone();
                schema.apply_defaults(&mut attributes);
                if let Err(errors) = schema.validate(&attributes) {
                    for error in errors {
                        all_errors.push(format!("{}: {}", resource.address, error));
                    }
                }
            }
            None => all_errors.push(format!(
                "{}: unknown resource type {:?}",
                resource.address, resource.address.resource_type
            )),
        }
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors.join("\n"))
    }
}

fn run_validate(file: &PathBuf) -> Result<(), String> {
    let workspace = Workspace::load(file)?;
    let resources = workspace.resources();
    validate_resources(&resources)?;

    println!(
        "{}",
        format!("✓ {} resources validated successfully.", resources.len())
            .green()
            .bold()
    );
    Ok(())
}

// =============================================================================
// Session: provider, interpreter and state backend of one run
// =============================================================================

struct Session {
    workspace: Workspace,
    schemas: HashMap<String, ResourceSchema>,
    interpreter: Interpreter<AzureRmProvider>,
    backend: Box<dyn StateBackend>,
}

impl Session {
    async fn open(file: &PathBuf, cancel: CancellationToken) -> Result<Self, String> {
        let workspace = Workspace::load(file)?;
        let provider_config = workspace.provider_config();
        let import_policy = provider_config.import_policy();
        let provider = AzureRmProvider::from_config(provider_config).map_err(|e| e.to_string())?;

        let backend = create_backend(&workspace.backend_config()?).map_err(|e| e.to_string())?;
        backend.init().await.map_err(|e| e.to_string())?;

        let interpreter = Interpreter::new(provider)
            .with_config(InterpreterConfig {
                import_policy,
                ..Default::default()
            })
            .with_cancellation(cancel);

        Ok(Self {
            workspace,
            schemas: get_schemas(),
            interpreter,
            backend,
        })
    }

    async fn read_state(&self) -> Result<StateFile, String> {
        Ok(self
            .backend
            .read_state()
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?
            .unwrap_or_default())
    }

    async fn write_state(&self, state: &mut StateFile) -> Result<(), String> {
        state.increment_serial();
        self.backend
            .write_state(state)
            .await
            .map_err(|e| format!("Failed to write state: {}", e))
    }

    async fn lock(&self, operation: &str) -> Result<LockInfo, String> {
        let lock = self
            .backend
            .acquire_lock(operation)
            .await
            .map_err(|e| e.to_string())?;
        debug!("acquired state lock {}", lock.id);
        Ok(lock)
    }

    /// Release the state lock whatever `result` is; the run's own error wins
    async fn unlock<T>(&self, lock: &LockInfo, result: Result<T, String>) -> Result<T, String> {
        let released = self
            .backend
            .release_lock(lock)
            .await
            .map_err(|e| format!("Failed to release state lock: {}", e));
        let value = result?;
        released?;
        Ok(value)
    }

    /// Read every tracked resource from the control plane and reconcile the state file
    async fn refresh(&self, state: &mut StateFile) -> Result<Vec<State>, String> {
        let provider = self.interpreter.provider();
        let mut refreshed = Vec::new();

        for tracked in state.resources.clone() {
            let address = tracked.address();
            let previous = tracked.to_state();
            let ctx = self.interpreter.operation_context();
            let current = provider
                .read(&ctx, &address, &tracked.identifier, Some(&previous))
                .await
                .map_err(|e| format!("Failed to read state: {}", e))?;

            if !current.exists {
                println!(
                    "  {} {} no longer exists and will be removed from the state",
                    "!".yellow().bold(),
                    address
                );
            }
            state.record(
                &current,
                sensitive_attributes(&self.schemas, &address.resource_type),
            );
            refreshed.push(current);
        }
        Ok(refreshed)
    }

    fn record_outcome(&self, state: &mut StateFile, outcome: &EffectOutcome) {
        match outcome {
            EffectOutcome::Read { state: current }
            | EffectOutcome::Created { state: current }
            | EffectOutcome::Updated { state: current }
            | EffectOutcome::Replaced { state: current } => state.record(
                current,
                sensitive_attributes(&self.schemas, &current.address.resource_type),
            ),
            EffectOutcome::Deleted { address } => {
                state.remove_resource(address);
            }
            EffectOutcome::Skipped { .. } => {}
        }
    }

    /// Execute the plan, record every outcome and persist the state
    async fn execute(&self, plan: &Plan, state: &mut StateFile) -> Result<usize, String> {
        let result = self.interpreter.apply(plan).await;

        for (effect, outcome) in plan.effects().iter().zip(&result.outcomes) {
            match outcome {
                Ok(outcome) => {
                    self.record_outcome(state, outcome);
                    println!("  {} {}", "✓".green(), format_effect(effect));
                }
                Err(e) => println!("  {} {} - {}", "✗".red(), format_effect(effect), e),
            }
        }
        self.write_state(state).await?;

        println!();
        if result.is_success() {
            Ok(result.success_count)
        } else {
            Err(format!(
                "{} succeeded, {} failed.",
                result.success_count, result.failure_count
            ))
        }
    }
}

fn states_by_address(states: Vec<State>) -> HashMap<ResourceAddress, State> {
    states
        .into_iter()
        .map(|s| (s.address.clone(), s))
        .collect()
}

async fn run_plan(file: &PathBuf, cancel: CancellationToken) -> Result<(), String> {
    let session = Session::open(file, cancel).await?;
    let resources = session.workspace.resources();
    validate_resources(&resources)?;

    let mut state = session.read_state().await?;
    let current = states_by_address(session.refresh(&mut state).await?);
    let plan = create_plan(&resources, &current, &session.schemas);
    print_plan(&plan, &session.schemas);
    Ok(())
}

async fn run_apply(file: &PathBuf, cancel: CancellationToken) -> Result<(), String> {
    let session = Session::open(file, cancel).await?;
    let resources = session.workspace.resources();
    validate_resources(&resources)?;

    let lock = session.lock("apply").await?;
    let result = apply_locked(&session, &resources).await;
    session.unlock(&lock, result).await
}

async fn apply_locked(session: &Session, resources: &[Resource]) -> Result<(), String> {
    let mut state = session.read_state().await?;
    let current = states_by_address(session.refresh(&mut state).await?);
    let plan = create_plan(resources, &current, &session.schemas);

    if plan.is_empty() {
        session.write_state(&mut state).await?;
        println!("{}", "No changes needed.".green());
        return Ok(());
    }

    print_plan(&plan, &session.schemas);
    println!();
    println!("{}", "Applying changes...".cyan().bold());
    println!();

    match session.execute(&plan, &mut state).await {
        Ok(count) => {
            println!(
                "{}",
                format!("Apply complete! {} changes applied.", count)
                    .green()
                    .bold()
            );
            Ok(())
        }
        Err(summary) => Err(format!("Apply failed. {}", summary)),
    }
}

async fn run_destroy(
    file: &PathBuf,
    auto_approve: bool,
    cancel: CancellationToken,
) -> Result<(), String> {
    let session = Session::open(file, cancel).await?;
    let lock = session.lock("destroy").await?;
    let result = destroy_locked(&session, auto_approve).await;
    session.unlock(&lock, result).await
}

async fn destroy_locked(session: &Session, auto_approve: bool) -> Result<(), String> {
    let mut state = session.read_state().await?;
    let current = session.refresh(&mut state).await?;
    let plan = create_destroy_plan(&current);

    if plan.is_empty() {
        session.write_state(&mut state).await?;
        println!("{}", "No resources to destroy.".green());
        return Ok(());
    }

    println!("{}", "Destroy Plan:".red().bold());
    println!();
    for effect in plan.effects() {
        println!("  {} {}", effect.symbol().red().bold(), effect.address());
    }
    println!();
    println!(
        "Plan: {} to destroy.",
        plan.effects().len().to_string().red()
    );
    println!();

    if !auto_approve && !confirm_destroy()? {
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();

    match session.execute(&plan, &mut state).await {
        Ok(count) => {
            println!(
                "{}",
                format!("Destroy complete! {} resources destroyed.", count)
                    .green()
                    .bold()
            );
            Ok(())
        }
        Err(summary) => Err(format!("Destroy failed. {}", summary)),
    }
}

fn confirm_destroy() -> Result<bool, String> {
    println!(
        "{}",
        "Do you really want to destroy all resources?"
            .yellow()
            .bold()
    );
    println!(
        "  {}",
        "This action cannot be undone. Type 'yes' to confirm.".yellow()
    );
    print!("\n  Enter a value: ");
    std::io::Write::flush(&mut std::io::stdout()).map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    println!();
    Ok(input.trim() == "yes")
}

async fn run_import(
    file: &PathBuf,
    address: ResourceAddress,
    identifier: &str,
    cancel: CancellationToken,
) -> Result<(), String> {
    let session = Session::open(file, cancel).await?;
    if !session.schemas.contains_key(&address.resource_type) {
        return Err(format!("unknown resource type {:?}", address.resource_type));
    }

    let lock = session.lock("import").await?;
    let result = import_locked(&session, &address, identifier).await;
    session.unlock(&lock, result).await
}

async fn import_locked(
    session: &Session,
    address: &ResourceAddress,
    identifier: &str,
) -> Result<(), String> {
    let mut state = session.read_state().await?;
    if let Some(existing) = state.find_resource(address) {
        return Err(format!(
            "{} is already managed (ID {:?}); remove it from the state before importing",
            address, existing.identifier
        ));
    }

    let ctx = session.interpreter.operation_context();
    let imported = session
        .interpreter
        .provider()
        .import(&ctx, address, identifier)
        .await
        .map_err(|e| e.to_string())?;
    state.record(
        &imported,
        sensitive_attributes(&session.schemas, &address.resource_type),
    );
    session.write_state(&mut state).await?;

    println!(
        "{}",
        format!("Import successful! {} is now managed.", address)
            .green()
            .bold()
    );
    Ok(())
}

async fn run_show(file: &PathBuf) -> Result<(), String> {
    let workspace = Workspace::load(file)?;
    let backend = create_backend(&workspace.backend_config()?).map_err(|e| e.to_string())?;
    let state = backend
        .read_state()
        .await
        .map_err(|e| format!("Failed to read state: {}", e))?;

    let Some(state) = state else {
        println!("{}", "No state.".yellow());
        return Ok(());
    };

    let shown = state.redacted();
    println!(
        "{} (serial {}, lineage {})",
        "State".cyan().bold(),
        shown.serial,
        shown.lineage
    );
    for resource in &shown.resources {
        println!();
        println!("{}", resource.address().to_string().bold());
        println!("  {} = {:?}", "id".dimmed(), resource.identifier);
        let mut names: Vec<&String> = resource.attributes.keys().collect();
        names.sort();
        for name in names {
            println!("  {} = {}", name, resource.attributes[name]);
        }
    }
    Ok(())
}

// =============================================================================
// Plan rendering
// =============================================================================

fn print_plan(plan: &Plan, schemas: &HashMap<String, ResourceSchema>) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        let symbol = match effect {
            Effect::Create(_) => effect.symbol().green().bold(),
            Effect::Update { .. } => effect.symbol().yellow().bold(),
            Effect::Replace { .. } => effect.symbol().magenta().bold(),
            Effect::Delete { .. } => effect.symbol().red().bold(),
            Effect::Read { .. } => effect.symbol().cyan().bold(),
        };
        println!("  {} {}", symbol, effect.address());

        let schema = schemas.get(&effect.address().resource_type);
        let is_sensitive = |name: &str| schema.is_some_and(|s| s.is_sensitive(name));
        let shown = |name: &str, value: Option<&Value>| match value {
            None => "(none)".to_string(),
            Some(_) if is_sensitive(name) => SENSITIVE_PLACEHOLDER.to_string(),
            Some(v) => format_value(v),
        };

        match effect {
            Effect::Create(resource) => {
                let mut names: Vec<&String> = resource.attributes.keys().collect();
                names.sort();
                for name in names {
                    println!(
                        "      {}: {}",
                        name,
                        shown(name, resource.attributes.get(name)).green()
                    );
                }
            }
            Effect::Update {
                from,
                to,
                changed_attributes,
            }
            | Effect::Replace {
                from,
                to,
                changed_attributes,
            } => {
                for name in changed_attributes {
                    let forces = matches!(effect, Effect::Replace { .. })
                        && schema.is_some_and(|s| s.is_force_new(name));
                    println!(
                        "      {}: {} → {}{}",
                        name,
                        shown(name, from.attributes.get(name)).red(),
                        shown(name, to.attributes.get(name)).green(),
                        if forces {
                            " (forces replacement)".magenta().to_string()
                        } else {
                            String::new()
                        }
                    );
                }
            }
            Effect::Delete { identifier, .. } | Effect::Read { identifier, .. } => {
                println!("      {}", identifier.dimmed());
            }
        }
    }

    println!();
    println!("{}", plan.summary());
}

fn format_effect(effect: &Effect) -> String {
    let verb = match effect {
        Effect::Create(_) => "Create",
        Effect::Update { .. } => "Update",
        Effect::Replace { .. } => "Replace",
        Effect::Delete { .. } => "Delete",
        Effect::Read { .. } => "Read",
    };
    format!("{} {}", verb, effect.address())
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s),
        Value::Int(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::List(items) => {
            let strs: Vec<_> = items.iter().map(format_value).collect();
            format!("[{}]", strs.join(", "))
        }
        Value::Map(map) => {
            let mut strs: Vec<_> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, format_value(v)))
                .collect();
            strs.sort();
            format!("{{{}}}", strs.join(", "))
        }
    }
}
