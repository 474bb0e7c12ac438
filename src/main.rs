//! Application entry point.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Pick the workflow kind: first CLI argument, else `workflow.kind`.
//! 4. Build a current-thread tokio runtime, the HTTP client, the cpal
//!    capture device and the orchestrator.
//! 5. Spawn the hotkey listener thread.
//! 6. Start a session, then serve hotkey events and stdin commands until
//!    `quit` or end of input.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use voice_workflow::{
    api::{HttpWorkflowClient, WorkflowSummary},
    audio::CpalDevice,
    capture::CaptureLifecycleController,
    config::{AppConfig, AppPaths},
    hotkey::{parse_key, HotkeyEvent, HotkeyListener},
    workflow::{
        new_shared_workflow, ContactResolution, StepId, WorkflowKind, WorkflowOrchestrator,
    },
};

const HELP: &str = "\
commands:
  confirm               accept the current step
  back | next           move between steps
  goto <step>           jump to a step
  set <field> <value>   edit a draft field
  contact <name>        match a contact by name
  add-item | review     invoice line items
  keep-item | last-item confirm the pending item, then another or review
  remove-item <n>       drop confirmed item n (from 1)
  clear-items           drop every item
  summary               show the server-side draft
  submit                create the record
  restart               abandon and start a new session
  quit";

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Command {
    Confirm,
    Back,
    Next,
    GoTo(StepId),
    Set { field: String, value: Value },
    Contact(String),
    AddItem,
    Review,
    ConfirmItem { add_another: bool },
    RemoveItem(usize),
    ClearItems,
    Summary,
    Submit,
    Restart,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    let cmd = match verb {
        "confirm" | "c" => Command::Confirm,
        "back" | "b" => Command::Back,
        "next" | "n" => Command::Next,
        "goto" if !rest.is_empty() => Command::GoTo(StepId::new(rest)),
        "set" => {
            let (field, value) = rest.split_once(' ')?;
            Command::Set {
                field: field.to_string(),
                value: parse_value(value.trim()),
            }
        }
        "contact" if !rest.is_empty() => Command::Contact(rest.to_string()),
        "add-item" => Command::AddItem,
        "review" => Command::Review,
        "keep-item" => Command::ConfirmItem { add_another: true },
        "last-item" => Command::ConfirmItem { add_another: false },
        "remove-item" => match rest.parse::<usize>() {
            Ok(n) if n > 0 => Command::RemoveItem(n - 1),
            _ => return None,
        },
        "clear-items" => Command::ClearItems,
        "summary" => Command::Summary,
        "submit" => Command::Submit,
        "restart" => Command::Restart,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => return None,
    };
    Some(cmd)
}

/// Numbers and booleans are sent typed; anything else as a string.
fn parse_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Status output
// ---------------------------------------------------------------------------

fn print_status(orchestrator: &WorkflowOrchestrator) {
    let state = orchestrator.state();
    let st = state.lock().unwrap();

    let Some(session) = st.session() else {
        println!("[{}] no session", st.phase().label());
        return;
    };
    let nav = st.navigation();
    let title = st.kind().step_title(&session.current_step);
    let total = st.definition().steps().len();
    let position = st
        .definition()
        .position(&session.current_step)
        .map_or(0, |p| p + 1);

    println!();
    println!("[{}] step {position}/{total}: {title}", st.phase().label());
    println!("  {}", session.step_prompt);
    if let Some(transcript) = st.transcript() {
        println!("  heard: \"{transcript}\"");
    }
    if let Some(result) = st.step_result() {
        for (field, value) in &result.parsed_data {
            println!("  {field} = {value}");
        }
        if result.requires_confirmation {
            println!("  (say it again, or `confirm`)");
        }
    }
    if let Some(invoice) = session.draft.as_invoice() {
        for (n, item) in invoice.line_items.iter().enumerate() {
            println!(
                "  {}. {} x{} @ {:.2}",
                n + 1,
                item.description,
                item.quantity,
                item.unit_price
            );
        }
        if let Some(item) = &invoice.current_line_item {
            println!(
                "  pending: {} x{} @ {:.2}",
                item.description, item.quantity, item.unit_price
            );
        }
        if invoice.all_line_items().next().is_some() {
            println!("  subtotal {:.2}", invoice.subtotal());
        }
    }
    if let Some(err) = st.error() {
        println!("  error: {err}");
    }
    println!(
        "  back: {}  next: {}",
        if nav.can_go_back { "yes" } else { "no" },
        if nav.can_go_forward { "yes" } else { "no" },
    );
    if let Some(sub) = st.submission() {
        println!(
            "  created {} {}",
            sub.number.as_deref().unwrap_or(&sub.entity_id),
            sub.external_url.as_deref().unwrap_or("")
        );
    }
}

fn print_summary(summary: &WorkflowSummary) {
    match summary {
        WorkflowSummary::Contact(c) => {
            println!("  name:    {}", c.name.as_deref().unwrap_or("-"));
            println!("  email:   {}", c.email_address.as_deref().unwrap_or("-"));
            println!("  city:    {}", c.city.as_deref().unwrap_or("-"));
            println!("  country: {}", c.country.as_deref().unwrap_or("-"));
        }
        WorkflowSummary::Invoice(inv) => {
            println!("  contact: {}", inv.contact_name.as_deref().unwrap_or("-"));
            println!("  due:     {}", inv.due_date.as_deref().unwrap_or("-"));
            for line in &inv.line_items {
                println!(
                    "  {} x{} @ {:.2} = {:.2}",
                    line.item.description, line.item.quantity, line.item.unit_price, line.line_total
                );
            }
            println!(
                "  subtotal {:.2}  vat {:.2}  total {:.2}",
                inv.totals.subtotal, inv.totals.vat_total, inv.totals.grand_total
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Runs one command.  Returns `false` when the loop should exit.
async fn dispatch(orchestrator: &WorkflowOrchestrator, cmd: Command) -> bool {
    let result = match cmd {
        Command::Quit => return false,
        Command::Help => {
            println!("{HELP}");
            return true;
        }
        Command::Confirm => orchestrator.confirm().await.map(drop),
        Command::Back => orchestrator.go_back().await.map(drop),
        Command::Next => orchestrator.go_forward().await.map(drop),
        Command::GoTo(step) => orchestrator.go_to(step).await.map(drop),
        Command::Set { field, value } => orchestrator
            .update_field(&field, value)
            .await
            .map(|saved| {
                if !saved {
                    println!("  server kept the previous value of `{field}`");
                }
            }),
        Command::Contact(name) => orchestrator.resolve_contact(&name).await.map(|r| match r {
            ContactResolution::Matched(c) => println!("  contact: {}", c.name),
            ContactResolution::NotFound { candidates } => {
                println!("  no contact matches \"{name}\"; known contacts:");
                for c in candidates {
                    println!("    {}", c.name);
                }
            }
        }),
        Command::AddItem => orchestrator.add_another_item().await.map(drop),
        Command::Review => orchestrator.proceed_to_review().await.map(drop),
        Command::ConfirmItem { add_another } => orchestrator
            .confirm_line_item(add_another)
            .await
            .map(drop),
        Command::RemoveItem(index) => orchestrator.clear_line_item(index).await.map(drop),
        Command::ClearItems => orchestrator.clear_all_line_items().await.map(drop),
        Command::Summary => orchestrator
            .refresh_summary()
            .await
            .map(|s| print_summary(&s)),
        Command::Submit => orchestrator.submit().await.map(drop),
        Command::Restart => {
            orchestrator.abandon();
            orchestrator.start().await
        }
    };

    if let Err(e) = result {
        log::warn!("command failed: {e}");
    }
    print_status(orchestrator);
    true
}

async fn on_hotkey(
    event: HotkeyEvent,
    capture: &CaptureLifecycleController,
    orchestrator: &WorkflowOrchestrator,
) {
    match event {
        HotkeyEvent::PushToTalkPressed => {
            // Acquiring before the next event is read; a quick release then
            // cancels the acquisition instead of missing it.
            if capture.spawn_start().is_some() {
                println!("  recording...");
            }
        }
        HotkeyEvent::PushToTalkReleased => {
            let Some(artifact) = capture.stop().await else {
                if let Some(err) = capture.error() {
                    println!("  capture failed: {err}");
                }
                return;
            };
            log::info!(
                "recorded {:.1} s to {}",
                artifact.duration.as_secs_f32(),
                artifact.path.display()
            );
            if let Err(e) = orchestrator.process_recording(&artifact).await {
                log::warn!("step processing failed: {e}");
            }
            if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
                log::debug!("could not remove {}: {e}", artifact.path.display());
            }
            print_status(orchestrator);
        }
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Workflow kind
    let kind = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<WorkflowKind>().map_err(anyhow::Error::msg)?,
        None => config.workflow.kind,
    };
    log::info!("voice-workflow starting ({kind:?} workflow, {})", config.server.base_url);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(config, kind))
}

async fn run(config: AppConfig, kind: WorkflowKind) -> Result<()> {
    // 4. Components
    let api = Arc::new(HttpWorkflowClient::from_config(&config.server));
    let orchestrator = WorkflowOrchestrator::new(api, new_shared_workflow(kind));
    let min_recording = Duration::from_secs_f32(config.capture.min_recording_secs.max(0.0));
    let orchestrator = orchestrator.with_min_recording(min_recording);

    let device = Arc::new(CpalDevice::new(&config.capture, &AppPaths::new()));
    let capture = CaptureLifecycleController::new(device)
        .with_tick_interval(Duration::from_millis(config.capture.tick_interval_ms.max(1)));

    // 5. Hotkey listener thread
    let key = parse_key(&config.hotkey.push_to_talk_key).unwrap_or_else(|| {
        log::warn!(
            "Unknown push-to-talk key {:?}; falling back to F9",
            config.hotkey.push_to_talk_key
        );
        rdev::Key::F9
    });
    let (hotkey_tx, mut hotkey_rx) = mpsc::channel::<HotkeyEvent>(16);
    let _hotkey_listener =
        HotkeyListener::start(key, hotkey_tx).context("failed to spawn hotkey listener")?;

    // 6. Session + event loop
    if let Err(e) = orchestrator.start().await {
        log::error!("could not start a session: {e}");
    }
    println!("hold {} and speak; type `help` for commands", config.hotkey.push_to_talk_key);
    print_status(&orchestrator);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = hotkey_rx.recv() => {
                on_hotkey(event, &capture, &orchestrator).await;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(cmd) => {
                        if !dispatch(&orchestrator, cmd).await {
                            break;
                        }
                    }
                    None => println!("unknown command; type `help`"),
                }
            }
        }
    }

    capture.reset();
    log::info!("voice-workflow shutting down");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
