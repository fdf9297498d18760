// src/cli/play.rs - Interactive conversation loop

use std::sync::{Arc, Mutex};

use crate::infra::config::Config;
use crate::remote::ScenarioFilter;
use crate::session::metrics::MetricsSnapshot;
use crate::session::types::{Message, Scenario, Sender};
use crate::session::{
    EndSummary, SendOutcome, SessionController, SessionDeps, SessionEvent, SignalSnapshot,
};
use crate::util::format_elapsed;

/// What the REPL should do after a slash command.
enum Next {
    Continue,
    End,
    Leave,
}

/// Run one interactive session for `scenario` (picker when `None`).
pub async fn run_play(
    deps: SessionDeps,
    config: &Config,
    scenario: Option<String>,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let scenario_id = match scenario {
        Some(id) => id,
        None => pick_scenario(&deps).await?,
    };

    let mut config = config.clone();
    if seed.is_some() {
        config.signals.seed = seed;
    }

    // Metrics failures surface on /metrics instead of interrupting typing.
    let last_metrics_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let errors = Arc::clone(&last_metrics_error);
    let controller = SessionController::new(deps, &config).with_events(move |event| match event {
        SessionEvent::StateChanged { from, to } => tracing::debug!("Session {from} -> {to}"),
        SessionEvent::MetricsUpdated(_) => {
            *errors.lock().unwrap_or_else(|p| p.into_inner()) = None;
        }
        SessionEvent::MetricsError(e) => {
            *errors.lock().unwrap_or_else(|p| p.into_inner()) = Some(e.clone());
        }
        SessionEvent::ExchangeCompleted { .. } => {}
    });

    let opened = controller.open(&scenario_id).await?;
    print_header(&opened.scenario, opened.resumed);
    for message in controller.transcript().messages() {
        print_message(message);
    }
    eprintln!("(type /help for commands)\n");

    while let Some(input) = read_input() {
        let trimmed = input.trim();

        if trimmed == "quit" || trimmed == "exit" {
            return leave(&scenario_id);
        }

        if trimmed.starts_with('/') {
            match handle_slash_command(trimmed, &controller, &last_metrics_error) {
                Next::Continue => continue,
                Next::End => break,
                Next::Leave => return leave(&scenario_id),
            }
        }

        if trimmed.is_empty() {
            continue;
        }

        match controller.send(trimmed).await {
            Ok(SendOutcome::Delivered(exchange)) => print_message(&exchange.counterpart_message),
            Ok(SendOutcome::Fallback { message, error }) => {
                eprintln!("[error] {error}");
                print_message(&message);
            }
            Err(e) => eprintln!("[error] {e}"),
        }
    }

    let mut summary = controller.end().await?;
    if summary.analysis.is_none() {
        match controller.analysis().await {
            Ok(analysis) => summary.analysis = Some(analysis),
            Err(e) => tracing::debug!("Analysis unavailable: {e}"),
        }
    }
    print_summary(&summary);
    Ok(())
}

fn leave(scenario_id: &str) -> anyhow::Result<()> {
    eprintln!("\nSession kept. Resume with `simcoach play {scenario_id}`.");
    Ok(())
}

async fn pick_scenario(deps: &SessionDeps) -> anyhow::Result<String> {
    let scenarios = deps.resolver.list(&ScenarioFilter::default()).await?;
    if scenarios.is_empty() {
        anyhow::bail!("No scenarios available");
    }

    let labels: Vec<String> = scenarios
        .iter()
        .map(|s| format!("{} [{}] ({})", s.title, s.difficulty, s.category))
        .collect();
    let choice = inquire::Select::new("Select a scenario:", labels.clone())
        .with_help_message("Saved sessions are resumed automatically")
        .prompt()
        .map_err(|_| anyhow::anyhow!("Selection cancelled"))?;

    let index = labels
        .iter()
        .position(|l| *l == choice)
        .ok_or_else(|| anyhow::anyhow!("Selection cancelled"))?;
    Ok(scenarios[index].id.clone())
}

fn read_input() -> Option<String> {
    use std::io::{self, BufRead, Write};

    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    let mut line = String::new();
    match stdin.lock().read_line(&mut line) {
        Ok(0) => None, // EOF
        Ok(_) => Some(line),
        Err(_) => None,
    }
}

fn handle_slash_command(
    input: &str,
    controller: &SessionController,
    last_metrics_error: &Mutex<Option<String>>,
) -> Next {
    let cmd = input.split_whitespace().next().unwrap_or("");

    match cmd {
        "/metrics" => {
            match controller.latest_metrics() {
                Some(snapshot) => print_metrics(&snapshot, controller),
                None => eprintln!("  No metrics yet."),
            }
            if let Some(ref e) = *last_metrics_error.lock().unwrap_or_else(|p| p.into_inner()) {
                eprintln!("  Last poll failed: {e}");
            }
        }

        "/signals" => print_signals(&controller.signals()),

        "/objectives" => {
            let signals = controller.signals();
            if signals.objectives.is_empty() {
                eprintln!("  No objectives tracked.");
            }
            for (key, entry) in signals.objectives.iter() {
                let mark = if entry.value.is_complete() { "x" } else { " " };
                let updated = match entry.sequence {
                    0 => String::new(),
                    n => format!(", exchange {n}"),
                };
                eprintln!("  [{mark}] {key} ({:.0}%{updated})", entry.value.percent());
            }
        }

        "/transcript" => {
            for message in controller.transcript().messages() {
                print_message(message);
            }
        }

        "/end" => return Next::End,

        "/quit" => return Next::Leave,

        "/help" => {
            eprintln!("  /metrics      Live metrics from the last poll");
            eprintln!("  /signals      Tone, alignment and objective completion");
            eprintln!("  /objectives   Per-objective progress");
            eprintln!("  /transcript   Full conversation so far");
            eprintln!("  /end          End the session and show the analysis");
            eprintln!("  /quit         Leave without ending (resume later)");
        }

        other => eprintln!("  Unknown command: {other} (try /help)"),
    }
    Next::Continue
}

fn print_header(scenario: &Scenario, resumed: bool) {
    eprintln!(
        "simcoach v{} | {} | {} | {}",
        env!("CARGO_PKG_VERSION"),
        scenario.title,
        scenario.difficulty,
        if scenario.duration.is_empty() { "-" } else { scenario.duration.as_str() },
    );
    if !scenario.description.is_empty() {
        eprintln!("{}", scenario.description);
    }
    if !scenario.objectives.is_empty() {
        eprintln!("Objectives:");
        for (i, o) in scenario.objectives.iter().enumerate() {
            eprintln!("  {}. {o}", i + 1);
        }
    }
    if resumed {
        eprintln!("(resumed saved session)");
    }
    eprintln!();
}

fn print_message(message: &Message) {
    match message.sender {
        Sender::User => println!("you: {}", message.content),
        Sender::Counterpart => match message.emotion {
            Some(emotion) => println!("them [{emotion}]: {}", message.content),
            None => println!("them: {}", message.content),
        },
    }
}

fn print_signals(signals: &SignalSnapshot) {
    eprintln!("  Emotional tone:      {}/100", signals.emotional_tone);
    eprintln!("  Strategic alignment: {}/100", signals.strategic_alignment);
    eprintln!(
        "  Objectives:          {}/{} completed",
        signals.objectives.completed_count(),
        signals.objectives.len()
    );
}

fn print_metrics(snapshot: &MetricsSnapshot, controller: &SessionController) {
    let m = &snapshot.metrics;
    let freshness = if snapshot.is_fresh(controller.metrics_validity()) {
        "fresh"
    } else {
        "stale"
    };
    eprintln!(
        "  Fetched {}s ago ({freshness})",
        snapshot.age().as_secs()
    );
    eprintln!(
        "  Messages: {} ({} you / {} them) | {} min",
        m.session_kpis.total_messages,
        m.session_kpis.user_messages,
        m.session_kpis.ai_messages,
        m.session_kpis.duration_minutes
    );
    let objectives = &m.session_kpis.objectives_progress;
    eprintln!(
        "  Objectives: {}/{} ({}%)",
        objectives.completed, objectives.total, objectives.percentage
    );
    if !m.session_kpis.momentum.level.is_empty() {
        eprintln!(
            "  Momentum: {} ({}, {})",
            m.session_kpis.momentum.level, m.session_kpis.momentum.trend, m.session_kpis.momentum.score
        );
    }
    let e = &m.emotional_metrics;
    if !e.dominant_emotion.is_empty() {
        eprintln!(
            "  Tone: {} | dominant: {} | urgency: {}",
            e.emotional_tone, e.dominant_emotion, e.urgency_level
        );
    }
    let b = &m.business_metrics;
    if !b.risk_level.is_empty() {
        eprintln!("  Risk: {} | impact: {}", b.risk_level, b.business_impact);
    }
    if !m.progress_metrics.engagement_level.is_empty() {
        eprintln!(
            "  Engagement: {} | information density: {}",
            m.progress_metrics.engagement_level, m.progress_metrics.information_density
        );
    }
}

fn print_summary(summary: &EndSummary) {
    eprintln!(
        "\nSession {} ended after {} | {} message(s)",
        summary.session_id,
        format_elapsed(summary.elapsed),
        summary.transcript.len()
    );
    print_signals(&summary.signals);
    if !summary.remote_acknowledged {
        eprintln!("  (the service did not confirm the close)");
    }

    let Some(ref a) = summary.analysis else {
        return;
    };
    eprintln!(
        "\nScore: {} overall | strategic {} | communication {} | emotional {}",
        a.overall_score, a.strategic_score, a.communication_score, a.emotional_score
    );
    for (title, items) in [
        ("Strengths", &a.strengths),
        ("To improve", &a.improvements),
        ("Recommendations", &a.recommendations),
    ] {
        if items.is_empty() {
            continue;
        }
        eprintln!("{title}:");
        for item in items {
            eprintln!("  - {item}");
        }
    }
    if !a.key_moments.is_empty() {
        eprintln!("Key moments:");
        for k in &a.key_moments {
            eprintln!("  {} [{}] {}", k.time, k.impact, k.analysis);
        }
    }
}
