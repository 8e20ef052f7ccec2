use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use exitfunnel::config::Config;
use exitfunnel::moderation::gateway::ModerationGateway;
use exitfunnel::moderation::gemini::GeminiClient;
use exitfunnel::moderation::patterns::PatternClassifier;
use exitfunnel::moderation::rate_limiter::RateLimiter;
use exitfunnel::output::terminal;
use exitfunnel::registration::api::BackendClient;
use exitfunnel::registration::flow::{
    password_step_pending, FlowSettings, FlowStage, RegistrationFlow,
};
use exitfunnel::registration::lead::LeadRecord;
use exitfunnel::registration::store::{FileStore, LocalStore};

/// exitfunnel: lead capture and chat moderation for an exit-planning service.
#[derive(Parser)]
#[command(name = "exitfunnel", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Moderate a chat message (remote model with local fallback)
    Moderate {
        /// The message text
        text: String,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,

        /// Fail instead of running local-only when no API key is configured
        #[arg(long)]
        require_remote: bool,
    },

    /// Run only the local pattern classifier on a message
    Classify {
        /// The message text
        text: String,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Lead capture and account onboarding
    Lead {
        #[command(subcommand)]
        action: LeadCommand,
    },
}

#[derive(Subcommand)]
enum LeadCommand {
    /// Submit the lead form
    Submit {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
        #[arg(long, default_value = "")]
        website: String,
        /// Accept the privacy policy
        #[arg(long)]
        accept_privacy: bool,
    },

    /// Set a password and get an email verification code
    VerifyNow {
        #[arg(long)]
        password: String,
        #[arg(long)]
        confirm: String,
    },

    /// Set a password and verify the email later
    VerifyLater {
        #[arg(long)]
        password: String,
        #[arg(long)]
        confirm: String,
    },

    /// Enter the emailed verification code
    Otp {
        /// The 6-digit code
        code: String,
    },

    /// Email a new verification code
    ResendOtp,

    /// Abandon the pending onboarding
    Skip,

    /// Show the pending onboarding, if any
    Status,

    /// Keep reminding until the pending lead sets a password (Ctrl-C to stop)
    Remind,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("exitfunnel=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Moderate {
            text,
            json,
            require_remote,
        } => {
            if require_remote {
                config.require_gemini()?;
            }
            let gateway = build_gateway(&config)?;
            let source = if gateway.has_backend() {
                "remote model, local fallback"
            } else {
                "local patterns only"
            };
            let verdict = gateway.moderate(&text).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                terminal::display_verdict(&verdict, source);
            }
        }

        Commands::Classify { text, json } => {
            let verdict = PatternClassifier::default().classify(&text).into_verdict();
            if json {
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            } else {
                terminal::display_verdict(&verdict, "local patterns only");
            }
        }

        Commands::Lead { action } => run_lead(&config, action).await?,
    }

    Ok(())
}

/// Build the moderation gateway from config: remote when a key is set,
/// local-only otherwise.
fn build_gateway(config: &Config) -> Result<ModerationGateway> {
    let Some(key) = &config.gemini_api_key else {
        info!("GEMINI_API_KEY not configured, using local pattern moderation");
        return Ok(ModerationGateway::local_only());
    };

    let mut client = GeminiClient::new(&config.gemini_api_url, &config.gemini_model, key.clone())?;
    if let Some(qps) = config.moderation_max_qps {
        client = client.with_rate_limiter(RateLimiter::per_second(qps));
    }
    Ok(ModerationGateway::new(Arc::new(client)))
}

async fn run_lead(config: &Config, action: LeadCommand) -> Result<()> {
    let store: Arc<dyn LocalStore> = Arc::new(FileStore::new(&config.store_path));
    let api = Arc::new(BackendClient::new(&config.funnel_api_url)?);
    let settings = FlowSettings {
        phone_digits: config.phone_digits,
        reminder_interval: config.reminder_interval,
    };
    let mut flow = RegistrationFlow::new(api, Arc::clone(&store), settings);
    flow.resume()?;

    let show_status = !matches!(action, LeadCommand::Status | LeadCommand::Remind);
    let result = match action {
        LeadCommand::Submit {
            name,
            email,
            phone,
            website,
            accept_privacy,
        } => {
            let lead = LeadRecord {
                full_name: name,
                email,
                website,
                phone,
                privacy: accept_privacy,
            };
            flow.submit_lead(lead).await
        }
        LeadCommand::VerifyNow { password, confirm } => flow.verify_now(&password, &confirm).await,
        LeadCommand::VerifyLater { password, confirm } => {
            flow.verify_later(&password, &confirm).await
        }
        LeadCommand::Otp { code } => flow.submit_otp(&code).await,
        LeadCommand::ResendOtp => flow.resend_otp().await,
        LeadCommand::Skip => flow.skip(),
        LeadCommand::Status => {
            terminal::display_flow_status(&flow);
            Ok(())
        }
        LeadCommand::Remind => {
            remind_until_done(&flow, store.as_ref()).await?;
            Ok(())
        }
    };

    flow.shutdown();
    result?;

    terminal::display_flow_outcome(&flow);
    if show_status && !flow.stage().is_terminal() && flow.stage() != FlowStage::Idle {
        terminal::display_flow_status(&flow);
    }
    Ok(())
}

/// Print a reminder each interval while the lead is waiting on a password.
/// Stops when another session finishes onboarding or on Ctrl-C.
async fn remind_until_done(flow: &RegistrationFlow, store: &dyn LocalStore) -> Result<()> {
    let email = match (flow.stage(), flow.lead()) {
        (FlowStage::AwaitingPassword, Some(lead)) => lead.email.clone(),
        (FlowStage::AwaitingOtp, _) => {
            println!("Waiting on the emailed code. Run `exitfunnel lead otp <code>`.");
            return Ok(());
        }
        _ => {
            println!("No onboarding pending.");
            return Ok(());
        }
    };

    println!(
        "{}",
        format!(
            "Reminding {} every {}s. Press Ctrl-C to stop.",
            email,
            flow.settings().reminder_interval.as_secs()
        )
        .dimmed()
    );

    let mut reminders = flow.reminders();
    loop {
        tokio::select! {
            changed = reminders.changed() => {
                if changed.is_err() {
                    break;
                }
                if !password_step_pending(store)? {
                    println!("Password step finished in another session.");
                    break;
                }
                let shown = *reminders.borrow_and_update();
                terminal::display_reminder(&email, shown);
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }
    Ok(())
}
