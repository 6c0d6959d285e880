use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use log::LevelFilter;
use mailsift::http::{build_routes, AppState};
use mailsift::lists::ListKind;
use mailsift::reputation::ReputationStore;
use mailsift::{Config, Verifier};
use std::process;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() {
    let matches = Command::new("mailsift")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Email address risk assessor: scores addresses from 0 to 100 and accepts or rejects them")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("mailsift.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Load the configuration and every file it points to, then exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verify")
                .long("verify")
                .value_name("EMAIL")
                .help("Verify one address and print the result as JSON")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("report-spam")
                .long("report-spam")
                .value_name("EMAIL")
                .help("Record a spam report against the address's domain")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("stats")
                .long("stats")
                .help("Show per-domain check counts, spam reports and penalties")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("mailsift.yaml");
    let config = match Config::load_or_default(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("stats") {
        if let Err(e) = print_stats(&config) {
            eprintln!("❌ Failed to read statistics: {e:#}");
            process::exit(1);
        }
        return;
    }

    let verifier = match Verifier::from_config(&config) {
        Ok(verifier) => verifier,
        Err(e) => {
            eprintln!("❌ Failed to initialise: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        test_config(&config, &verifier);
        return;
    }

    if let Some(email) = matches.get_one::<String>("verify") {
        match verifier.verify(email).await {
            Ok(result) => match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("❌ Failed to render result: {e}");
                    process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("❌ Verification failed: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(email) = matches.get_one::<String>("report-spam") {
        match verifier.report_spam(email) {
            Ok(domain) => println!("Domain {domain} marked as spam."),
            Err(e) => {
                eprintln!("❌ Failed to record spam report: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = serve(&config, verifier).await {
        log::error!("Server error: {e:#}");
        process::exit(1);
    }
}

async fn serve(config: &Config, verifier: Verifier) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        verifier,
        overrides_path: config.scoring.overrides_path.clone(),
    });
    let app = build_routes(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;
    log::info!("mailsift listening on {}", config.server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    log::info!("mailsift stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => log::info!("Received SIGTERM, starting graceful shutdown"),
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e:#}");
            process::exit(1);
        }
    }
}

fn test_config(config: &Config, verifier: &Verifier) {
    println!("🔍 Testing configuration...");
    println!();
    println!("Listen address: {}", config.server.listen);
    println!("List directory: {}", config.lists.directory.display());

    let mut failed = false;
    for kind in ListKind::ALL {
        match verifier.lists().list(kind) {
            Ok(domains) => println!("  {kind}: {} domains", domains.len()),
            Err(e) => {
                println!("  ❌ {kind}: {e}");
                failed = true;
            }
        }
    }

    println!("Reputation database: {}", config.reputation.database_path.display());
    let weights = verifier.weights();
    println!(
        "Score weights: base={} mx_exists={} smtp_valid={} whitelisted={} new_domain={} disposable={} blacklisted={} spam_keywords={}",
        weights.base,
        weights.mx_exists,
        weights.smtp_valid,
        weights.whitelisted,
        weights.new_domain,
        weights.disposable,
        weights.blacklisted,
        weights.spam_keywords
    );

    if failed {
        println!("❌ Configuration validation failed");
        process::exit(1);
    }
    println!("✅ Configuration is valid");
}

fn print_stats(config: &Config) -> anyhow::Result<()> {
    let store = ReputationStore::open(&config.reputation.database_path)?;
    let records = store.records()?;

    println!("📊 mailsift Domain Reputation");
    println!("═══════════════════════════════════════");
    if records.is_empty() {
        println!("📭 No domains checked yet");
        return Ok(());
    }

    let total_checks: u64 = records.iter().map(|r| r.total_checks).sum();
    let total_reports: u64 = records.iter().map(|r| r.user_marked_spam).sum();
    println!("  Domains: {}", records.len());
    println!("  Checks: {total_checks}");
    println!("  Spam reports: {total_reports}");
    println!();

    println!("┌──────────────────────────────────────────────┬─────────┬─────────┬─────────┐");
    println!("│ Domain                                       │  Checks │    Spam │ Penalty │");
    println!("├──────────────────────────────────────────────┼─────────┼─────────┼─────────┤");
    for record in &records {
        println!(
            "│ {:<44} │ {:>7} │ {:>7} │ {:>7} │",
            truncate_string(&record.domain, 44),
            record.total_checks,
            record.user_marked_spam,
            record.penalty()
        );
    }
    println!("└──────────────────────────────────────────────┴─────────┴─────────┴─────────┘");
    Ok(())
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
