// Colored terminal output for verdicts and onboarding status.
//
// main.rs delegates all human-readable formatting here; `--json` output
// bypasses it.

use colored::Colorize;

use crate::moderation::traits::ModerationVerdict;
use crate::registration::flow::{FlowStage, RegistrationFlow};

/// Display a moderation verdict.
pub fn display_verdict(verdict: &ModerationVerdict, source: &str) {
    let headline = if verdict.is_abusive {
        "FLAGGED".red().bold()
    } else {
        "CLEAN".green().bold()
    };
    println!("\n{} {}", headline, format!("({source})").dimmed());
    println!("  Text:       {}", verdict.filtered_text);

    if let Some(confidence) = verdict.confidence {
        println!("  Confidence: {:.2}", confidence);
    }
    if !verdict.categories.is_empty() {
        let labels: Vec<String> = verdict
            .categories
            .iter()
            .map(|c| colorize_category(c).to_string())
            .collect();
        println!("  Categories: {}", labels.join(", "));
    }
    if !verdict.reason.is_empty() {
        println!("  Reason:     {}", verdict.reason.dimmed());
    }
    println!();
}

/// Display where onboarding stands.
pub fn display_flow_status(flow: &RegistrationFlow) {
    println!("\n{}", "=== Onboarding ===".bold());
    println!("  Stage: {}", colorize_stage(flow.stage()));

    match flow.lead() {
        Some(lead) => {
            println!("  Lead:  {} <{}>", lead.full_name, lead.email);
            if !lead.website.is_empty() {
                println!("  Site:  {}", lead.website);
            }
        }
        None => println!("  Lead:  {}", "none pending".dimmed()),
    }

    let prompts = flow.prompts();
    if prompts.password_open {
        println!(
            "\n  {} Set a password: `exitfunnel lead verify-now` or `lead verify-later`",
            "->".cyan()
        );
    }
    if prompts.otp_open {
        println!(
            "\n  {} Enter the code we emailed: `exitfunnel lead otp <code>`",
            "->".cyan()
        );
    }
    println!();
}

/// Display the outcome of a flow step: its notice or its inline error.
pub fn display_flow_outcome(flow: &RegistrationFlow) {
    if let Some(notice) = flow.notice() {
        println!("{} {}", "ok".green().bold(), notice);
    }
    if let Some(error) = flow.error() {
        println!("{} {}", "error".red().bold(), error);
    }
}

/// One reminder line for `lead remind`.
pub fn display_reminder(email: &str, shown: u64) {
    println!(
        "{} [{}] {} still needs a password. Run `exitfunnel lead verify-now` to finish.",
        "reminder".yellow().bold(),
        shown,
        email
    );
}

fn colorize_category(label: &str) -> colored::ColoredString {
    match label {
        "HATE" | "HARASSMENT" | "THREATS" | "SAFETY_VIOLATION" => label.red().bold(),
        "PROFANITY" | "INSULTS" => label.bright_red(),
        "SPAM" => label.yellow(),
        _ => label.normal(),
    }
}

fn colorize_stage(stage: FlowStage) -> colored::ColoredString {
    let name = format!("{stage:?}");
    match stage {
        FlowStage::Verified => name.green().bold(),
        FlowStage::Skipped => name.dimmed(),
        FlowStage::AwaitingPassword | FlowStage::AwaitingOtp => name.yellow(),
        FlowStage::Idle => name.normal(),
    }
}
