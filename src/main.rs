use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::io;
use std::process::Stdio;
use tokio::io::AsyncReadExt;

use oops::capture::{synthesize, CaptureStrategy, CommandOutcome};
use oops::cli::Cli;
use oops::config::{self, Config};
use oops::dispatch::{self, PipelineOptions};
use oops::hooks;
use oops::output;
use oops::providers::Gateway;
use oops::request::DiagnosisRequest;
use oops::session::SessionState;
use oops::snapshot::SnapshotAssembler;

fn init_tracing() {
    // Silent unless OOPS_LOG is set; hook mode must never pollute the prompt
    if std::env::var("OOPS_LOG").is_ok() {
        use tracing_subscriber::EnvFilter;
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_env("OOPS_LOG"))
            .with_writer(io::stderr)
            .init();
    }
}

fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "oops", &mut io::stdout());
}

fn load_config(cli: &Cli) -> Config {
    let mut config = Config::load();
    config.apply_env_overrides();
    if let Some(family) = cli.provider {
        config.provider.family = family;
    }
    if let Some(ref model) = cli.model {
        config.provider.model = model.clone();
    }
    config
}

/// Print the resolved configuration with the credential masked.
fn show_config(config: &Config) {
    println!("{}", "Configuration".bold());
    println!();
    println!("  {} {}", "Provider:".blue().bold(), config.provider.family);
    println!("  {} {}", "Model:".blue().bold(), config.provider.model);
    if let Some(ref url) = config.provider.base_url {
        println!("  {} {}", "Endpoint:".blue().bold(), url);
    }
    let key_display = match config.provider.resolve_api_key() {
        Some(key) if key.len() > 8 => format!("{}…", &key[..8]),
        Some(_) => "set".to_string(),
        None => "not set".to_string(),
    };
    println!("  {} {}", "API key:".blue().bold(), key_display);
    println!(
        "  {} {}s",
        "Timeout:".blue().bold(),
        config.provider.timeout_secs
    );
    println!(
        "  {} {}s",
        "Dedup window:".blue().bold(),
        config.dedup.window_secs
    );
    if let Some(path) = Config::config_path() {
        println!();
        println!("  {} {}", "Config file:".blue().bold(), path.display());
    }
    println!();
}

/// Print the context snapshot a diagnosis would carry right now.
async fn show_context(config: &Config, json: bool) -> Result<()> {
    let snapshot = SnapshotAssembler::new(config).assemble().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!();
        println!("{}", "Context Snapshot".bold());
        println!();
        println!("{}", snapshot.render(config.limits.max_field_bytes));
        println!();
    }
    Ok(())
}

/// Connectivity self-check against the configured backend.
async fn test_provider(config: &Config) -> Result<()> {
    let gateway = match Gateway::from_config(&config.provider) {
        Ok(gateway) => gateway,
        Err(err) => {
            bail!("{} {}", "✗".red(), output::failure_summary(&err));
        }
    };

    println!(
        "Testing {} ({})...",
        gateway.provider_name(),
        gateway.model_name()
    );

    let request = DiagnosisRequest::question(
        "Reply with the single word OK.",
        Default::default(),
        config,
    );
    match gateway.submit(&request).await {
        Ok(_) => {
            println!("{} Connection succeeded", "✓".green());
            Ok(())
        }
        Err(err) => bail!("{} {}", "✗".red(), output::failure_summary(&err)),
    }
}

/// Ask a free-form question against the current environment.
async fn ask(config: &Config, question: &str, json: bool) -> Result<()> {
    if question.trim().is_empty() {
        bail!("No question provided. Usage: oops --ask \"<question>\"");
    }

    let snapshot = SnapshotAssembler::new(config).assemble().await;
    let request = DiagnosisRequest::question(question, snapshot, config);
    let gateway = Gateway::from_config(&config.provider)
        .map_err(|err| anyhow::anyhow!(output::failure_summary(&err)))?;

    let answer = gateway
        .submit(&request)
        .await
        .map_err(|err| anyhow::anyhow!(output::failure_summary(&err)))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "question": question,
                "answer": answer,
            }))?
        );
    } else {
        println!();
        for line in answer.trim().lines() {
            for wrapped in textwrap::wrap(line, 76) {
                println!("  {wrapped}");
            }
        }
        println!();
    }
    Ok(())
}

/// Run a command with its error stream teed into the wrapper scratch file,
/// then diagnose it through the regular pipeline if it fails.
/// Returns the child's exit code so the wrapper is transparent.
async fn run_and_diagnose(
    config: &Config,
    session: &SessionState,
    argv: &[String],
    options: &PipelineOptions,
) -> Result<i32> {
    let Some((program, rest)) = argv.split_first() else {
        bail!("No command provided. Usage: oops --run -- <command...>");
    };
    let command_text = argv.join(" ");

    let spawned = tokio::process::Command::new(program)
        .args(rest)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::piped())
        .spawn();

    let (exit_status, stderr_bytes) = match spawned {
        Ok(mut child) => {
            // Tee stderr: display live, keep a copy for the wrapper channel
            let mut collected = Vec::new();
            if let Some(mut stderr) = child.stderr.take() {
                let mut buf = [0u8; 4096];
                loop {
                    match stderr.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            use std::io::Write;
                            let _ = io::stderr().write_all(&buf[..n]);
                            collected.extend_from_slice(&buf[..n]);
                        }
                        Err(_) => break,
                    }
                }
            }
            let status = child.wait().await.context("failed to wait for command")?;
            (status.code().unwrap_or(1), collected)
        }
        Err(_) => (127, Vec::new()),
    };

    if exit_status == 0 {
        return Ok(0);
    }

    let error_text = String::from_utf8_lossy(&stderr_bytes).into_owned();
    let outcome = if error_text.trim().is_empty() {
        CommandOutcome {
            command: command_text.clone(),
            exit_status,
            error_text: synthesize(&command_text, exit_status),
            strategy: CaptureStrategy::Synthesized,
            timestamp: std::time::SystemTime::now(),
        }
    } else {
        // Populate the wrapper channel so the session state stays coherent
        let _ = std::fs::write(session.wrapper_path(), &stderr_bytes);
        CommandOutcome {
            command: command_text.clone(),
            exit_status,
            error_text,
            strategy: CaptureStrategy::Wrapper,
            timestamp: std::time::SystemTime::now(),
        }
    };

    match Gateway::from_config(&config.provider) {
        Ok(gateway) => {
            dispatch::run_diagnosis_cycle(config, session, gateway, outcome, options).await;
        }
        Err(err) => output::print_failure_notice(&err, options.quiet),
    }
    session.capture_channel().clear();

    Ok(exit_status)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        print_completions(shell);
        return Ok(());
    }
    if let Some(shell) = cli.hook {
        hooks::print_hook_script(shell);
        return Ok(());
    }
    if let Some(shell) = cli.hook_install {
        return hooks::install_hook(shell);
    }
    if let Some(shell) = cli.hook_uninstall {
        return hooks::uninstall_hook(shell);
    }
    if cli.enable {
        return hooks::enable_hook();
    }
    if cli.disable {
        return hooks::disable_hook();
    }
    if cli.status {
        hooks::print_hook_status();
        return Ok(());
    }
    if cli.hook_config {
        config::print_hook_config();
        return Ok(());
    }

    let config = load_config(&cli);

    if cli.show_config {
        show_config(&config);
        return Ok(());
    }
    if cli.context {
        return show_context(&config, cli.json).await;
    }
    if cli.test {
        return test_provider(&config).await;
    }
    if cli.ask {
        return ask(&config, &cli.args.join(" "), cli.json).await;
    }

    let session = SessionState::from_env();
    let options = PipelineOptions {
        bypass_dedup: cli.force,
        json: cli.json,
        quiet: cli.quiet,
    };

    if cli.run {
        let code = run_and_diagnose(&config, &session, &cli.args, &options).await?;
        std::process::exit(code);
    }

    if cli.is_hook_event() {
        // The hook invocation must never fail the shell: absorb everything
        // and always exit 0.
        if !hooks::is_hook_enabled() {
            return Ok(());
        }
        let exit_code = cli.exit_code.unwrap_or(0);
        let command = cli.last_command.as_deref().unwrap_or("");
        dispatch::handle_hook_event(
            &config,
            &session,
            exit_code,
            command,
            cli.last_output.as_deref().filter(|s| !s.is_empty()),
            &options,
        )
        .await;
        return Ok(());
    }

    println!("oops - shell failure diagnosis companion");
    println!();
    println!("  {} - install the shell hook", "oops --hook-install <shell>".cyan());
    println!("  {} - run and diagnose a command", "oops --run -- <cmd...>".cyan());
    println!("  {} - ask a question", "oops --ask \"<question>\"".cyan());
    println!("  {} - test backend connectivity", "oops --test".cyan());
    println!("  {} - show hook status", "oops --status".cyan());
    println!();
    println!("  See {} for all options.", "oops --help".cyan());

    Ok(())
}
