//! Quest Verifier - verify social-share screenshots from the command line
//!
//! Runs OCR on a screenshot, checks it for the challenge's required tags,
//! and records progress locally.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use parking_lot::RwLock;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use quest_verifier::config::{self, AppConfig};
use quest_verifier::storage::{self, ChallengeCompletion, ProgressStore};
use quest_verifier::verify::{Action, VerifyState};
use quest_verifier::vision::TesseractEngine;
use quest_verifier::{
    ClientOptions, ImageSource, OcrClient, OcrSession, RecognitionResult, SessionState, TagPolicy,
    VerificationObserver, VerificationPolicy, Verifier, VerifierOptions,
};

/// Quest Verifier - OCR verification for quest challenges
#[derive(Parser, Debug)]
#[command(name = "quest-verifier")]
#[command(about = "Verify that a social-share screenshot contains the required tags")]
struct Args {
    /// Configuration file (defaults to config.toml in the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Progress store file (defaults to progress.json in the user data directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize an image and print the result as JSON
    Analyze {
        /// Image to recognize
        image: PathBuf,
        /// Required tag (repeatable); defaults to the configured tags
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// Verify a proof-of-share screenshot for a challenge
    Verify {
        /// Screenshot of the shared post
        image: PathBuf,
        /// Challenge identifier used for progress tracking
        #[arg(short, long, default_value = "social-share")]
        challenge: String,
        /// Required tag (repeatable); defaults to the configured tags
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Minimum confidence (0 - 100)
        #[arg(long)]
        threshold: Option<u8>,
        /// Whether any or all required tags must pass
        #[arg(long, value_enum)]
        policy: Option<TagPolicy>,
        /// Accept the post manually if automatic verification fails and override is offered
        #[arg(long)]
        force: bool,
    },
    /// Show completed challenges and failed-attempt counters
    Progress,
    /// Clear failed-attempt counters
    Reset {
        /// Only reset this challenge
        #[arg(short, long)]
        challenge: Option<String>,
    },
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_or_default_config(args.config.as_deref())?;

    match args.command {
        Command::Analyze { image, tags } => {
            let tags = tags_or_default(tags, &config);
            let image = ImageSource::from_path(&image)
                .with_context(|| format!("Failed to read image {}", image.display()))?;
            let session = build_session(&config);

            let result = with_progress(&session, || session.run(&image, &tags))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify {
            image,
            challenge,
            tags,
            threshold,
            policy,
            force,
        } => {
            let mut store = open_store(args.store.as_deref())?;
            if store.is_completed(&challenge)? {
                println!("Challenge '{}' is already completed.", challenge);
                return Ok(ExitCode::SUCCESS);
            }

            let image = ImageSource::from_path(&image)
                .with_context(|| format!("Failed to read image {}", image.display()))?;
            let options = VerifierOptions {
                required_tags: tags_or_default(tags, &config),
                policy: VerificationPolicy::new(
                    threshold.unwrap_or(config.verification.threshold),
                    policy.unwrap_or(config.verification.policy),
                ),
                override_after_attempts: config.verification.override_after_attempts,
                success_delay: Duration::from_millis(config.verification.success_delay_ms),
            };
            let session = build_session(&config);
            let observer = StoreObserver {
                store: &mut store,
                challenge: challenge.clone(),
            };

            let mut verifier = Verifier::new(&session, image, options, observer);
            with_progress(&session, || {
                verifier.start();
            });
            run_verify_outcome(&mut verifier, &challenge, force)
        }
        Command::Progress => {
            let store = open_store(args.store.as_deref())?;
            let completions = store.completions()?;
            if completions.is_empty() {
                println!("No challenges completed yet.");
            }
            for c in &completions {
                println!(
                    "[done] {} at {}{}{}",
                    c.challenge,
                    c.completed_at.format("%Y-%m-%d %H:%M"),
                    c.confidence.map(|v| format!(" ({}% confidence)", v)).unwrap_or_default(),
                    if c.forced { " (manual)" } else { "" }
                );
            }
            for (challenge, attempts) in store.attempt_counters()? {
                println!("[open] {}: {} failed attempt(s)", challenge, attempts);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset { challenge } => {
            let mut store = open_store(args.store.as_deref())?;
            let challenges = match challenge {
                Some(c) => vec![c],
                None => store.attempt_counters()?.into_iter().map(|(c, _)| c).collect(),
            };
            for c in challenges {
                if store.reset_attempts(&c)? {
                    println!("Reset attempts for '{}'", c);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Report the verifier's state, applying the manual override when asked
fn run_verify_outcome(
    verifier: &mut Verifier<'_, StoreObserver<'_>>,
    challenge: &str,
    force: bool,
) -> Result<ExitCode> {
    let failure = match verifier.state() {
        VerifyState::Success { .. } => {
            println!("Challenge '{}' verified!", challenge);
            return Ok(ExitCode::SUCCESS);
        }
        VerifyState::Running => return Ok(ExitCode::FAILURE),
        VerifyState::Failed(failure) => failure.clone(),
    };

    println!("{}", failure.message());

    if force {
        if verifier.manual_override() {
            println!("Challenge '{}' confirmed manually.", challenge);
            return Ok(ExitCode::SUCCESS);
        }
        println!("Manual confirmation isn't available yet. Try again with a clearer screenshot.");
    } else {
        let hints: Vec<&str> = failure
            .actions()
            .into_iter()
            .map(|a| match a {
                Action::ManualOverride => "rerun with --force to confirm manually",
                Action::Retry => "rerun to try again",
            })
            .collect();
        println!("Next: {}", hints.join(", or "));
    }

    Ok(ExitCode::from(2))
}

/// Records attempts and completions in the progress store
struct StoreObserver<'a> {
    store: &'a mut ProgressStore,
    challenge: String,
}

impl VerificationObserver for StoreObserver<'_> {
    fn on_verified(&mut self, result: &RecognitionResult, forced: bool) {
        let completion = ChallengeCompletion {
            challenge: self.challenge.clone(),
            forced,
            confidence: result.per_tag_confidence.values().flatten().copied().max(),
            tags: result.detected_tags.clone(),
            completed_at: Utc::now(),
        };
        if let Err(e) = self.store.record_completion(&completion) {
            error!("Failed to record completion: {}", e);
        }
    }

    fn on_attempt(&mut self) {
        match self.store.record_failed_attempt(&self.challenge) {
            Ok(n) => info!("Failed attempt {} for '{}'", n, self.challenge),
            Err(e) => error!("Failed to record attempt: {}", e),
        }
    }

    fn failed_attempts(&self) -> u32 {
        self.store.failed_attempts(&self.challenge).unwrap_or(0)
    }
}

/// Load configuration from file or fall back to defaults
fn load_or_default_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_path) = storage::default_config_path() {
        if config_path.exists() {
            let config = config::load_config(&config_path)?;
            info!("Loaded configuration from {:?}", config_path);
            return Ok(config);
        }
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn open_store(explicit: Option<&Path>) -> Result<ProgressStore> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => storage::default_store_path()?,
    };
    ProgressStore::open(&path).with_context(|| format!("Failed to open progress store {}", path.display()))
}

fn build_session(config: &AppConfig) -> OcrSession {
    let client = OcrClient::new(
        TesseractEngine::factory(config.ocr.clone()),
        ClientOptions {
            timeout: config.ocr.timeout(),
            match_options: config.ocr.match_options(),
        },
    );
    OcrSession::new(Arc::new(client))
}

fn tags_or_default(tags: Vec<String>, config: &AppConfig) -> Vec<String> {
    if tags.is_empty() {
        config.verification.required_tags.clone()
    } else {
        tags
    }
}

/// Run `f` while printing the session's progress to stderr
fn with_progress<T>(session: &OcrSession, f: impl FnOnce() -> T) -> T {
    let done = Arc::new(AtomicBool::new(false));
    let printer = {
        let done = done.clone();
        let state = session.shared_state();
        std::thread::spawn(move || print_progress(state, done))
    };

    let outcome = f();
    done.store(true, Ordering::SeqCst);
    let _ = printer.join();
    outcome
}

fn print_progress(state: Arc<RwLock<SessionState>>, done: Arc<AtomicBool>) {
    let mut last = None;
    while !done.load(Ordering::SeqCst) {
        let snapshot = {
            let s = state.read();
            s.is_analyzing.then_some(s.progress)
        };
        if let Some(progress) = snapshot {
            if last != Some(progress) {
                eprint!("\rRecognizing text... {:>3}%", progress);
                let _ = std::io::stderr().flush();
                last = Some(progress);
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    if last.is_some() {
        eprintln!();
    }
}
