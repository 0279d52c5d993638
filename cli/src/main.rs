use clap::Parser;
mod commands;
mod error;
mod output;
mod scenario;
use buildtree_core::api::{CompositeConfig, CoordinatorError, LoggingConfig};
use commands::cli;
use error::CliError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

fn main() {
    let exit = match real_main() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();
    let cfg: CompositeConfig = buildtree_core::config::load_default(args.config.as_deref())?;
    init_tracing(&cfg.logging).map_err(CliError::Command)?;

    tracing::debug!(
        max_workers = cfg.execution.max_workers,
        isolated_projects = cfg.isolated_projects,
        "configuration loaded"
    );

    dispatch(args.command, cfg)
}

fn exit_code_for_error(e: &CliError) -> i32 {
    // 0: success
    // 1: build failure
    // 11: config / scenario error
    // 12: build tree validation (names, cycles, unknown tasks)
    // 50: internal/uncategorized
    match e {
        CliError::Config(_) => 11,
        CliError::Scenario(_) => 11,
        CliError::Coordinator(ce) => match ce {
            CoordinatorError::Configuration(_)
            | CoordinatorError::BuildCycle { .. }
            | CoordinatorError::CircularDependency { .. }
            | CoordinatorError::TaskNotFound { .. }
            | CoordinatorError::UnknownBuild(_) => 12,
            CoordinatorError::Build(_) => 1,
            _ => 50,
        },
        CliError::Command(_) => 50,
    }
}

fn dispatch(cmd: cli::Commands, cfg: CompositeConfig) -> Result<i32, CliError> {
    match cmd {
        cli::Commands::Run(run_args) => commands::run::run(run_args, cfg),
        cli::Commands::Check(check_args) => commands::check::check(check_args, cfg),
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("buildtree"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("buildtree.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let validation = CliError::Coordinator(CoordinatorError::BuildCycle {
            path: ":p -> :q -> :p".into(),
        });
        assert_eq!(exit_code_for_error(&validation), 12);
        let configure = CliError::Coordinator(CoordinatorError::Build(anyhow::anyhow!("boom")));
        assert_eq!(exit_code_for_error(&configure), 1);
        let misuse = CliError::Coordinator(CoordinatorError::illegal_state("not ready"));
        assert_eq!(exit_code_for_error(&misuse), 50);
        assert_eq!(exit_code_for_error(&CliError::Scenario("x".into())), 11);
    }
}
