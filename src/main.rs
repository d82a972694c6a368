use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use course_resilience::error::{
    classify, BoundaryOptions, BoundaryStatus, Fault, IsolationBoundary, MemorySink,
    RecoveryCallbacks, RecoveryCoordinator, RenderFn, Rendered, ReportingSink,
};
use course_resilience::{AppError, ResilienceConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resilience")]
#[command(about = "Exercise the course platform's error resilience layer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the platform config dir)
    #[arg(long, global = true, env = "COURSE_RESILIENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a failure and print the classification as JSON
    Classify {
        /// HTTP status of the failed response
        #[arg(long, conflicts_with_all = ["kind", "message"])]
        status: Option<u16>,

        /// Typed failure kind
        #[arg(long, value_enum, conflicts_with = "message")]
        kind: Option<FailureKind>,

        /// Free-form failure message
        #[arg(long)]
        message: Option<String>,
    },

    /// Run a flaky operation through the recovery coordinator
    Simulate {
        /// Number of failures before the operation succeeds
        #[arg(short, long, default_value = "2")]
        failures: u32,

        /// Kind of failure the operation raises
        #[arg(long, value_enum, default_value = "network")]
        kind: FailureKind,

        /// Override retry.max_attempts
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Override retry.initial_delay_ms
        #[arg(long)]
        initial_delay_ms: Option<u64>,

        /// Cancel the recovery after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,
    },

    /// Drive an isolation boundary through a number of faults
    Boundary {
        /// Number of consecutive faulting renders
        #[arg(short, long, default_value = "4")]
        faults: u32,

        /// Override boundary.auto_reset_ms
        #[arg(long, default_value = "200")]
        auto_reset_ms: u64,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailureKind {
    Network,
    Timeout,
    Validation,
    Auth,
    NotFound,
    RateLimited,
    Server,
}

impl FailureKind {
    fn to_error(self, detail: &str) -> AppError {
        let detail = detail.to_string();
        match self {
            FailureKind::Network => AppError::Network(detail),
            FailureKind::Timeout => AppError::Timeout(detail),
            FailureKind::Validation => AppError::Validation(detail),
            FailureKind::Auth => AppError::Auth(detail),
            FailureKind::NotFound => AppError::NotFound(detail),
            FailureKind::RateLimited => AppError::RateLimited(detail),
            FailureKind::Server => AppError::Server(detail),
        }
    }
}

fn init_logging(debug: bool, json: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn classify_command(
    status: Option<u16>,
    kind: Option<FailureKind>,
    message: Option<String>,
) -> Result<()> {
    let error = match (status, kind, message) {
        (Some(status), _, _) => AppError::http(status, "response"),
        (None, Some(kind), message) => kind.to_error(message.as_deref().unwrap_or("failure")),
        (None, None, Some(message)) => AppError::Other(message),
        (None, None, None) => anyhow::bail!("one of --status, --kind or --message is required"),
    };

    println!("{}", serde_json::to_string_pretty(&classify(&error))?);
    Ok(())
}

async fn simulate_command(
    config: ResilienceConfig,
    failures: u32,
    kind: FailureKind,
    cancel_after: Option<Duration>,
) -> Result<()> {
    let sink = Arc::new(MemorySink::new(config.reporting.breadcrumb_capacity));
    let coordinator = RecoveryCoordinator::with_policy(sink.clone(), config.retry.clone())
        .with_retained_failures(config.recovery.retained_failures);
    let calls = Arc::new(AtomicU32::new(0));
    let start = Instant::now();

    println!(
        "Simulating {} failure(s) of kind {} under {:?}",
        failures,
        classify(&kind.to_error("")).kind,
        config.retry
    );

    if let Some(after) = cancel_after {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            println!("  [{:>6} ms] cancelling", start.elapsed().as_millis());
            coordinator.cancel("simulation");
        });
    }

    let operation = {
        let calls = Arc::clone(&calls);
        move || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            println!("  [{:>6} ms] attempt {}", start.elapsed().as_millis(), attempt);
            async move {
                if attempt <= failures {
                    Err(kind.to_error(&format!("simulated failure {}", attempt)))
                } else {
                    Ok(attempt)
                }
            }
        }
    };

    let callbacks = RecoveryCallbacks::default()
        .on_retry(move |attempt| {
            println!(
                "  [{:>6} ms] attempt {} failed, retrying",
                start.elapsed().as_millis(),
                attempt
            )
        })
        .on_success(|| println!("  recovered"))
        .on_failure(|error| {
            let classification = classify(error);
            println!(
                "  gave up: {} {}",
                classification.user_message, classification.suggested_action
            )
        });

    let result = coordinator
        .execute("simulation", operation, config.retry.clone(), callbacks)
        .await;

    match result {
        Ok(attempt) => println!("Succeeded on attempt {}", attempt),
        Err(error) => println!("Failed: {}", error),
    }
    println!("Elapsed: {}", humantime::format_duration(start.elapsed()));

    for report in sink.reports() {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

async fn boundary_command(config: ResilienceConfig, faults: u32, auto_reset: Duration) -> Result<()> {
    let sink = Arc::new(MemorySink::new(config.reporting.breadcrumb_capacity));
    let options = BoundaryOptions::<String>::from_settings(&config.boundary)
        .with_auto_reset(auto_reset)
        .with_isolation_id("demo-lesson");
    let boundary = IsolationBoundary::new(options).with_sink(sink.clone() as Arc<dyn ReportingSink>);
    let mut status = boundary.subscribe();

    let renders = AtomicU32::new(0);
    let lesson = RenderFn::new("lesson-1", || {
        let n = renders.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= faults {
            Err(Fault::new(format!("lesson renderer crashed (render {})", n)))
        } else {
            Ok("lesson content".to_string())
        }
    });

    loop {
        match boundary.render(&lesson).context("fallback faulted")? {
            Rendered::Content(view) => {
                println!("render: {}", view);
                break;
            }
            Rendered::Fallback(view) => println!("render: fallback {}", view),
            Rendered::Default(fallback) => println!(
                "render: fallback \"{}\" ({})",
                fallback.user_message, fallback.suggested_action
            ),
        }

        let state = boundary.state();
        println!(
            "  state: {:?}, faults {}, auto-reset {}",
            state.status,
            state.fault_count,
            if state.reset_scheduled { "scheduled" } else { "suppressed" }
        );
        if !state.reset_scheduled {
            println!("  boundary stays faulted until manually reset");
            break;
        }

        status
            .wait_for(|status| *status == BoundaryStatus::Healthy)
            .await
            .context("boundary dropped")?;
        println!("  auto-reset");
    }

    println!("{} report(s) captured", sink.reports().len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug, cli.json);

    let mut config = ResilienceConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Classify {
            status,
            kind,
            message,
        } => classify_command(status, kind, message)?,

        Commands::Simulate {
            failures,
            kind,
            max_attempts,
            initial_delay_ms,
            cancel_after_ms,
        } => {
            if let Some(max_attempts) = max_attempts {
                config.retry.max_attempts = max_attempts;
            }
            if let Some(initial_delay_ms) = initial_delay_ms {
                config.retry.initial_delay_ms = initial_delay_ms;
                config.retry.max_delay_ms = config.retry.max_delay_ms.max(initial_delay_ms);
            }
            config.validate()?;
            simulate_command(
                config,
                failures,
                kind,
                cancel_after_ms.map(Duration::from_millis),
            )
            .await?
        }

        Commands::Boundary {
            faults,
            auto_reset_ms,
        } => boundary_command(config, faults, Duration::from_millis(auto_reset_ms)).await?,

        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
    }

    Ok(())
}
