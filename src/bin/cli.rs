//! Device Pilot - autonomous Android missions from the command line
//!
//! Run with: cargo run --bin device-pilot -- [options] [goal]

use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use device_pilot::device::AdbConnection;
use device_pilot::scheduler::ApprovalRequest;
use device_pilot::skills::AppOpenerSkill;
use device_pilot::{
    AdbTransport, AnyOf, ApprovalGate, AutonomyLevel, ConfigOverrides, DeclaredComplete, Event,
    EventBus, EventType, ForegroundPackage, Mission, MissionStatus, ModelClient, ModelConfig,
    Orchestrator, PilotConfig, SkillRegistry,
};

/// Asks on the terminal before checkpointed actions.
struct TerminalApproval;

#[async_trait]
impl ApprovalGate for TerminalApproval {
    async fn approve(&self, request: &ApprovalRequest) -> bool {
        let prompt = format!(
            "\n⚠️  Approve {} {} ({}, plan confidence {:.2})? [y/N] ",
            request.action.capability,
            serde_json::Value::Object(request.action.params.clone()),
            request.reason,
            request.plan_confidence
        );
        tokio::task::spawn_blocking(move || {
            print!("{}", prompt);
            let _ = io::stdout().flush();
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(_) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
                Err(_) => false,
            }
        })
        .await
        .unwrap_or(false)
    }
}

/// Parsed command line.
#[derive(Default)]
struct CliArgs {
    overrides: ConfigOverrides,
    resume: Option<String>,
    until_package: Option<String>,
    connect: Option<String>,
    list_devices: bool,
    list_missions: bool,
    goal: Vec<String>,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();
    for arg in args {
        if let Some(value) = arg.strip_prefix("--autonomy=") {
            cli.overrides.autonomy_level = Some(value.parse::<AutonomyLevel>()?);
        } else if let Some(value) = arg.strip_prefix("--max-steps=") {
            cli.overrides.max_steps = Some(value.parse()?);
        } else if let Some(value) = arg.strip_prefix("--confidence=") {
            cli.overrides.confidence_threshold = Some(value.parse()?);
        } else if let Some(value) = arg.strip_prefix("--parallel=") {
            cli.overrides.parallel_actions = Some(matches!(value, "1" | "true" | "yes" | "on"));
        } else if arg == "--sequential" {
            cli.overrides.parallel_actions = Some(false);
        } else if let Some(value) = arg.strip_prefix("--resume=") {
            cli.resume = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("--until-package=") {
            cli.until_package = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("--connect=") {
            cli.connect = Some(value.to_string());
        } else if arg == "--list-devices" {
            cli.list_devices = true;
        } else if arg == "--list-missions" {
            cli.list_missions = true;
        } else if arg.starts_with("--") {
            anyhow::bail!("Unknown option: {}", arg);
        } else {
            cli.goal.push(arg.clone());
        }
    }
    Ok(cli)
}

fn print_event(event: &Event) {
    let c = &event.content;
    match event.event_type {
        EventType::Observation => {
            if let Some(summary) = c["summary"].as_str() {
                println!("👀 {} [{}]", summary, c["package"].as_str().unwrap_or("?"));
            }
        }
        EventType::Skill => {
            if let Some(skill) = c["skill"].as_str() {
                println!("🧩 {} ({}): {}", skill, c["priority"], c["rationale"].as_str().unwrap_or(""));
            }
        }
        EventType::Reasoning => match c["status"].as_str() {
            Some("planned") => println!(
                "💭 {} (confidence {})",
                c["reasoning"].as_str().unwrap_or(""),
                c["confidence"]
            ),
            _ => println!("⚠️  Reasoning: {}", c["error"].as_str().unwrap_or("unknown error")),
        },
        EventType::Action => {
            if let Some(status) = c["status"].as_str() {
                if status != "awaiting_approval" {
                    println!("⚡ {} {} -> {}", c["id"].as_str().unwrap_or(""), c["capability"].as_str().unwrap_or(""), status);
                }
            }
        }
        EventType::Reflection => {
            println!(
                "🔁 Step {}: {}{}",
                c["step"],
                c["outcome"].as_str().unwrap_or(""),
                if c["loop_signal"].is_null() { "" } else { " (loop detected)" }
            );
        }
        EventType::Mission => {
            if let Some(summary) = c["summary"].as_str() {
                println!("🏁 {}", summary);
            }
        }
    }
}

fn print_result(mission: &Mission) {
    match mission.status {
        MissionStatus::Succeeded => println!("\n✅ Mission {} succeeded in {} step(s)", mission.id, mission.step_count),
        MissionStatus::Aborted => println!("\n⏹️  Mission {} aborted", mission.id),
        _ => eprintln!(
            "\n❌ Mission {} {}: {}",
            mission.id,
            mission.status,
            mission.last_error.as_deref().unwrap_or("no further detail")
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config = PilotConfig::from_env()?;

    // RUST_LOG wins over LOG_LEVEL
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    let connection = AdbConnection::new().with_timeout(config.device_timeout);
    if let Some(address) = &cli.connect {
        println!("🔌 {}", connection.connect(address).await?);
    }
    if cli.list_devices {
        for device in connection.list_devices().await? {
            println!(
                "{}\t{}\t{:?}\t{}",
                device.device_id,
                device.status,
                device.connection_type,
                device.model.as_deref().unwrap_or("-")
            );
        }
        return Ok(());
    }

    let device_id = match env::var("ADB_DEVICE_ID") {
        Ok(id) => Some(id),
        Err(_) => match connection.first_online().await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("No device selected ({}), using adb's default", e);
                None
            }
        },
    };
    let mut transport = AdbTransport::new(device_id.clone()).with_timeout(config.device_timeout);
    if let Ok(path) = env::var("SECRETS_FILE") {
        transport = transport.with_secrets_file(path);
    }
    let installed = match transport.list_packages().await {
        Ok(packages) => packages,
        Err(e) => {
            tracing::warn!("Could not list installed packages: {}", e);
            Vec::new()
        }
    };

    let model_config = ModelConfig::from_env().with_timeout(config.reasoning_timeout);

    println!("🤖 Device Pilot - Autonomous Android Missions");
    println!("================================================");
    println!("Model: {} @ {}", model_config.model_name, model_config.base_url);
    println!("Autonomy: {:?}", cli.overrides.autonomy_level.unwrap_or(config.autonomy_level));
    println!("Max steps: {}", cli.overrides.max_steps.unwrap_or(config.max_steps));
    println!("State: {}", config.state_dir.display());
    if let Some(ref id) = device_id {
        println!("Device: {}", id);
    }
    println!("================================================\n");

    let events = Arc::new(EventBus::default());
    events.subscribe(Arc::new(print_event));

    let mut predicate = AnyOf::new().or(DeclaredComplete);
    if let Some(package) = &cli.until_package {
        predicate = predicate.or(ForegroundPackage::new(package.clone()));
    }

    let registry = SkillRegistry::with_app_opener(
        &config,
        AppOpenerSkill::new().with_installed_packages(installed),
    );
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(transport),
        Arc::new(ModelClient::new(model_config)),
        events,
    )?
    .with_registry(registry)
    .with_gate(Arc::new(TerminalApproval))
    .with_predicate(predicate);

    if cli.list_missions {
        if let Some(store) = orchestrator.mission_store() {
            for mission in store.list()? {
                println!(
                    "{}\t{}\t{} step(s)\t{}",
                    mission.id, mission.status, mission.step_count, mission.goal
                );
            }
        }
        return Ok(());
    }

    // Ctrl-C aborts the running mission between steps
    let abort = orchestrator.abort_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    if let Some(id) = &cli.resume {
        println!("📂 Resuming mission {}\n", id);
        let mission = orchestrator.resume(id).await?;
        print_result(&mission);
        return Ok(());
    }

    if !cli.goal.is_empty() {
        let goal = cli.goal.join(" ");
        println!("📝 Goal: {}\n", goal);
        match orchestrator.run(&goal, cli.overrides.clone()).await {
            Ok(mission) => print_result(&mission),
            Err(e) => eprintln!("\n❌ Error: {}", e),
        }
        return Ok(());
    }

    // Interactive mode
    println!("Interactive mode. Type a goal and press Enter.");
    println!("Type 'quit' or 'exit' to exit.\n");

    let stdin = io::stdin();
    loop {
        print!("📝 Goal: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let goal = line.trim();

        if goal.is_empty() {
            continue;
        }

        if goal == "quit" || goal == "exit" {
            println!("Goodbye! 👋");
            break;
        }

        match orchestrator.run(goal, cli.overrides.clone()).await {
            Ok(mission) => print_result(&mission),
            Err(e) => eprintln!("\n❌ Error: {}\n", e),
        }
    }

    Ok(())
}
