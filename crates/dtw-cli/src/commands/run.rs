use std::path::Path;

use colored::Colorize;
use comfy_table::{ContentArrangement, Table};
use miette::IntoDiagnostic;

use dtw_kernel::{SimEvent, SimEventKind};
use dtw_model::{HasContainer, Identifiable, Locatable, Scenario};

pub fn run(path: &Path, until: Option<f64>, json: bool, verbose: bool) -> miette::Result<()> {
    let mut scenario = super::load_scenario(path)?;
    let stats = match until {
        Some(limit) => scenario.run_until(limit),
        None => scenario.run(),
    };

    if json {
        let events = serde_json::to_string_pretty(scenario.env().events().events()).into_diagnostic()?;
        println!("{events}");
    } else {
        print_summary(&scenario, &super::scenario_name(path), stats.events_fired);
        if verbose {
            print_event_log(scenario.env().events().events());
        }
        print_tables(&scenario);
    }

    if stats.failed > 0 {
        miette::bail!(
            "{} process{} failed",
            stats.failed,
            if stats.failed == 1 { "" } else { "es" }
        );
    }
    Ok(())
}

fn print_summary(scenario: &Scenario, name: &str, events_fired: u64) {
    let env = scenario.env();
    println!(
        "  {} '{}' {}",
        "Scenario".bold(),
        name,
        format!("(epoch {})", env.epoch()).dimmed()
    );
    println!(
        "  Finished at {:.2} s ({}), {} timer events",
        env.now(),
        env.timestamp(),
        events_fired
    );
    let waiting = env.suspended_processes();
    if !waiting.is_empty() {
        println!("  Still waiting: {}", waiting.join(", ").yellow());
    }
    println!();
}

fn print_event_log(events: &[SimEvent]) {
    println!("  {}", "Event Log".bold().underline());
    println!();
    for event in events {
        let time = format!("[{:>12.2} s]", event.time).dimmed();
        println!("  {time} {}", colorize_event(event));
    }
    if events.is_empty() {
        println!("  {}", "(no events)".dimmed());
    }
    println!();
}

fn print_tables(scenario: &Scenario) {
    println!("  {}", "Sites".bold().underline());
    println!();
    let mut sites = Table::new();
    sites.set_content_arrangement(ContentArrangement::Dynamic);
    sites.set_header(vec!["Site", "Level", "Capacity", "Fill"]);
    for site in scenario.sites() {
        let container = site.container();
        sites.add_row(vec![
            site.name().to_string(),
            format!("{:.2}", container.level()),
            format!("{:.2}", container.capacity()),
            format_fill(container.fill_fraction()),
        ]);
    }
    println!("{sites}");
    println!();

    if !scenario.vessels().is_empty() {
        println!("  {}", "Vessels".bold().underline());
        println!();
        let mut vessels = Table::new();
        vessels.set_content_arrangement(ContentArrangement::Dynamic);
        vessels.set_header(vec!["Vessel", "Level", "Capacity", "Position", "Last speed"]);
        for vessel in scenario.vessels() {
            let container = vessel.container();
            vessels.add_row(vec![
                vessel.name().to_string(),
                format!("{:.2}", container.level()),
                format!("{:.2}", container.capacity()),
                vessel.geometry().to_string(),
                vessel
                    .current_speed()
                    .map(|v| format!("{v:.2} m/s"))
                    .unwrap_or_else(|| "--".to_string()),
            ]);
        }
        println!("{vessels}");
        println!();
    }

    if !scenario.activities().is_empty() {
        println!("  {}", "Activities".bold().underline());
        println!();
        let mut activities = Table::new();
        activities.set_content_arrangement(ContentArrangement::Dynamic);
        activities.set_header(vec!["Activity", "State", "Cycles"]);
        for activity in scenario.activities() {
            activities.add_row(vec![
                activity.name().to_string(),
                activity.state().to_string(),
                activity.cycles().to_string(),
            ]);
        }
        println!("{activities}");
        println!();
    }
}

fn colorize_event(event: &SimEvent) -> colored::ColoredString {
    let description = event.description.as_str();
    match &event.kind {
        SimEventKind::ActivityStarted | SimEventKind::ActivityTerminated { .. } => {
            description.bold()
        }
        SimEventKind::CycleStarted { .. } | SimEventKind::CycleCompleted { .. } => {
            description.green()
        }
        SimEventKind::Departed { .. } | SimEventKind::Arrived { .. } => description.blue(),
        SimEventKind::TransferStarted { .. } | SimEventKind::TransferStopped { .. } => {
            description.cyan()
        }
        SimEventKind::LevelChanged { .. }
        | SimEventKind::ResourceGranted { .. }
        | SimEventKind::ResourceReleased { .. } => description.dimmed(),
        SimEventKind::Custom { .. } => description.normal(),
    }
}

fn format_fill(fraction: f64) -> String {
    let pct = (fraction * 100.0).round() as u32;
    let filled = (fraction * 10.0).round() as usize;
    let bar = format!("{}{}", "#".repeat(filled), "-".repeat(10_usize.saturating_sub(filled)));
    if fraction >= 0.999 {
        format!("[{}] {pct:>3}%", bar.green())
    } else if fraction <= 0.001 {
        format!("[{}] {pct:>3}%", bar.dimmed())
    } else {
        format!("[{}] {pct:>3}%", bar.yellow())
    }
}
