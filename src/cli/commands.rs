use anyhow::Result;
use colored::Colorize;

use crate::{
    app::{init_config, load_config, load_config_from, CacheConfig},
    cache::{self, HealthReport, Preloader, WarmupReport, WarmupStatus},
};

use super::{Cli, Commands, OutputFormat};

/// Resolve the configuration the command line asks for
pub fn resolve_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(std::slice::from_ref(path))?,
        None => load_config()?,
    };
    if let Some(url) = &cli.remote_url {
        config.remote.url = Some(url.clone());
    }
    Ok(config)
}

/// Handle CLI subcommands; returns the process exit code
pub async fn handle_command(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Commands::Init => {
            match init_config()? {
                Some(path) => println!("Created default configuration at: {}", path.display()),
                None => println!("Configuration already exists, left untouched"),
            }
            Ok(0)
        }
        Commands::Config => {
            let config = resolve_config(cli)?;
            match cli.output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Text => print!("{}", toml::to_string_pretty(&config)?),
            }
            Ok(0)
        }
        Commands::Health => {
            let manager = cache::init(resolve_config(cli)?).await?;
            let report = manager.health_check().await;
            match cli.output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => println!("{}", format_health(&report)),
            }
            Ok(if report.overall_health { 0 } else { 1 })
        }
        Commands::Stats { reset } => {
            let manager = cache::init(resolve_config(cli)?).await?;
            if *reset {
                manager.reset_statistics();
            }
            let report = manager.health_check().await;
            match cli.output_format {
                OutputFormat::Json => {
                    let body = serde_json::json!({
                        "statistics": report.statistics,
                        "local": report.local_stats,
                        "remote": report.remote_info,
                    });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                OutputFormat::Text => println!("{}", format_stats(&report)),
            }
            Ok(0)
        }
        Commands::Warm { file } => {
            let manager = cache::init(resolve_config(cli)?).await?;
            let preloader = Preloader::from_seed_file(manager.clone(), file.clone());
            let report = manager.warm(vec![preloader]).await;
            match cli.output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => println!("{}", format_warmup(&report)),
            }
            Ok(if report.failed.is_empty() { 0 } else { 1 })
        }
        Commands::Clear { pattern } => {
            let manager = cache::init(resolve_config(cli)?).await?;
            let removed = manager.clear(pattern).await;
            print_count(cli.output_format, "removed", removed, manager.has_remote());
            Ok(0)
        }
        Commands::Invalidate { tags } => {
            let manager = cache::init(resolve_config(cli)?).await?;
            let removed = manager.invalidate_by_tags(tags).await;
            print_count(cli.output_format, "invalidated", removed, manager.has_remote());
            Ok(0)
        }
    }
}

fn print_count(format: OutputFormat, verb: &str, count: usize, remote: bool) {
    match format {
        OutputFormat::Json => {
            let mut body = serde_json::Map::new();
            body.insert(verb.to_string(), count.into());
            body.insert("remote_connected".to_string(), remote.into());
            println!("{}", serde_json::Value::Object(body));
        }
        OutputFormat::Text => {
            println!("{} {} keys", verb, count.to_string().bold());
            if !remote {
                println!("{}", "no remote store connected; only this process was touched".yellow());
            }
        }
    }
}

/// Human-readable health report
pub fn format_health(report: &HealthReport) -> String {
    let mut lines = Vec::new();

    let status = if report.overall_health {
        "[OK] healthy".green()
    } else {
        "[ERROR] degraded".red()
    };
    lines.push(format!("Cache Status: {}", status));

    let remote = match (report.remote_configured, report.remote_available) {
        (_, true) => "[OK] reachable".green(),
        (true, false) => "[ERROR] unreachable".red(),
        (false, false) => "not configured".normal(),
    };
    lines.push(format!("  Remote: {}", remote));
    if let Some(memory) = report
        .remote_info
        .as_ref()
        .and_then(|info| info.used_memory_human.as_deref())
    {
        lines.push(format!("      used memory: {}", memory));
    }

    let local = &report.local_stats;
    lines.push(format!(
        "  Local: {}/{} keys ({:.1}%), {} tags",
        local.total_keys, local.max_size, local.usage_percent, local.total_tags
    ));

    let stats = &report.statistics;
    lines.push(format!(
        "  Hit Rate: {:.1}% ({} hits, {} misses, {} evictions)",
        stats.hit_rate, stats.hits, stats.misses, stats.evictions
    ));

    for error in &report.errors {
        lines.push(format!("  {} {}", "!".red(), error));
    }
    lines.join("\n")
}

/// Counters, local usage and remote memory
pub fn format_stats(report: &HealthReport) -> String {
    let stats = &report.statistics;
    let local = &report.local_stats;
    let mut lines = vec![
        format!("Cache Statistics (since {})", stats.started_at.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("  Hits: {}", stats.hits),
        format!("  Misses: {}", stats.misses),
        format!("  Hit Rate: {:.1}%", stats.hit_rate),
        format!("  Sets: {}  Deletes: {}  Evictions: {}", stats.sets, stats.deletes, stats.evictions),
        format!("  Local: {}/{} keys ({:.1}%)", local.total_keys, local.max_size, local.usage_percent),
    ];
    match &report.remote_info {
        Some(info) => lines.push(format!(
            "  Remote memory: {}",
            info.used_memory_human.as_deref().unwrap_or("unknown")
        )),
        None => lines.push(format!("  Remote: {}", "not connected".yellow())),
    }
    lines.join("\n")
}

pub fn format_warmup(report: &WarmupReport) -> String {
    if report.status == WarmupStatus::WarmingDisabled {
        return "warming is disabled in the configuration".yellow().to_string();
    }
    let mut lines = Vec::new();
    for name in &report.succeeded {
        lines.push(format!("{} {}", "[OK]".green(), name));
    }
    for (name, error) in &report.failed {
        lines.push(format!("{} {}: {}", "[ERROR]".red(), name, error));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LocalStats, RemoteInfo, StatsSnapshot};

    fn report(errors: Vec<String>) -> HealthReport {
        HealthReport {
            overall_health: errors.is_empty(),
            remote_configured: true,
            remote_available: errors.is_empty(),
            remote_info: None,
            local_stats: LocalStats {
                total_keys: 3,
                max_size: 10,
                usage_percent: 30.0,
                total_tags: 1,
                evictions: 0,
            },
            statistics: StatsSnapshot::default(),
            errors,
            checked_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_format_health_lists_errors() {
        colored::control::set_override(false);
        let text = format_health(&report(vec!["remote store unreachable: refused".to_string()]));
        assert!(text.contains("degraded"));
        assert!(text.contains("unreachable"));
        assert!(text.contains("3/10 keys"));
        assert!(text.contains("remote store unreachable: refused"));
    }

    #[test]
    fn test_format_health_ok() {
        colored::control::set_override(false);
        let text = format_health(&report(vec![]));
        assert!(text.contains("healthy"));
        assert!(text.contains("reachable"));
    }

    #[test]
    fn test_format_stats() {
        colored::control::set_override(false);
        let mut report = report(vec![]);
        report.statistics.hits = 3;
        report.statistics.misses = 1;
        report.statistics.hit_rate = 75.0;
        assert!(format_stats(&report).contains("Hit Rate: 75.0%"));
        assert!(format_stats(&report).contains("not connected"));

        report.remote_info = Some(RemoteInfo {
            used_memory_human: Some("1.50M".to_string()),
            ..RemoteInfo::default()
        });
        assert!(format_stats(&report).contains("Remote memory: 1.50M"));
    }

    #[test]
    fn test_format_warmup() {
        colored::control::set_override(false);
        let report = WarmupReport {
            status: WarmupStatus::Completed,
            succeeded: vec!["seed:a.json".to_string()],
            failed: vec![("seed:b.json".to_string(), "parsing seed file b.json".to_string())],
        };
        let text = format_warmup(&report);
        assert!(text.contains("[OK] seed:a.json"));
        assert!(text.contains("[ERROR] seed:b.json: parsing seed file b.json"));

        let disabled = WarmupReport {
            status: WarmupStatus::WarmingDisabled,
            succeeded: vec![],
            failed: vec![],
        };
        assert!(format_warmup(&disabled).contains("disabled"));
    }
}
