//! Alcohol tracker CLI
//!
//! Logs drinks and shows statistics through the remote data endpoint, and
//! manages the offline cache of the tracker's static assets.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Month;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use alcotrack::api::{ApiClient, PeriodStats};
use alcotrack::cache::{CacheHandler, DiskStorage, Registration, VersionTag};
use alcotrack::cli::{
    current_month, default_log_date, parse_setting_value, today, Cli, Command, SettingsCommand,
    StatsPeriod,
};
use alcotrack::config::Config;
use alcotrack::error::{ApiError, AppError, ConfigError};
use alcotrack::fetch::{HttpFetcher, Request};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("alcotrack=warn"),
        1 => EnvFilter::new("alcotrack=info"),
        _ => EnvFilter::new("alcotrack=debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config_path = cli.config.clone().or_else(Config::default_path);
    let config = match &config_path {
        Some(path) => Config::load(path).await?,
        None => Config::default(),
    };
    let config = config.apply(cli.overrides());
    debug!(?config, "configuration loaded");

    match cli.command {
        Command::Install => {
            let registration = open_registration(&config).await?;
            let tag = config.cache.version_tag();
            let manifest = config.cache.manifest();
            registration.install(&tag, &manifest).await?;
            println!("Installed {} ({} assets), waiting to activate", tag, manifest.len());
        }
        Command::Activate => {
            let registration = open_registration(&config).await?;
            let tag = registration.activate().await?;
            registration.settle().await;
            println!("Activated {}", tag);
        }
        Command::Fetch {
            url,
            method,
            headers,
            output,
        } => {
            let registration = open_registration(&config).await?;
            let mut request = Request::get(url).with_method(method);
            for (name, value) in headers {
                request = request.with_header(name, value);
            }
            let response = registration.fetch(&request).await?;
            registration.settle().await;

            eprintln!("{} ({:?})", response.status, response.response_type);
            write_body(output, &response.body)?;
        }
        Command::Status => {
            let status = open_registration(&config).await?.status().await?;
            let show = |tag: &Option<VersionTag>| match tag {
                Some(tag) => tag.to_string(),
                None => "none".to_string(),
            };
            println!("Active:  {}", show(&status.active));
            println!("Waiting: {}", show(&status.waiting));
            for (tag, count) in &status.generations {
                println!("  {} ({} entries)", tag, count);
            }
        }
        Command::Push => {
            let notification = open_registration(&config).await?.push(&[]);
            print_json(&notification)?;
        }
        Command::Click { action } => {
            let registration = open_registration(&config).await?;
            let notification = registration.push(&[]);
            let outcome = registration.notification_click(&notification, Some(action));
            match outcome.open_url {
                Some(url) => println!("Notification closed; open {}", url),
                None => println!("Notification closed"),
            }
        }
        Command::Log { drinks, date } => {
            let date = date.unwrap_or_else(|| default_log_date(today()));
            let response = api_client(&config)?.log_drinks(date, drinks).await?;
            println!(
                "{}",
                response
                    .message
                    .unwrap_or_else(|| format!("Logged {} for {}", drinks, date))
            );
        }
        Command::Recent { days } => {
            let entries = api_client(&config)?.get_recent_entries(days).await?;
            if entries.is_empty() {
                println!("No recent entries found.");
            }
            for entry in entries {
                println!("{}\t{}", entry.tracking_date, entry.actual_drinks);
            }
        }
        Command::Settings { command } => {
            let api = api_client(&config)?;
            match command {
                SettingsCommand::Get => {
                    let settings = api.get_settings().await?;
                    println!("Cost per drink: ${:.2}", settings.cost_per_drink);
                    println!("Daily target:   {}", settings.daily_target);
                }
                SettingsCommand::Set { name, value } => {
                    let response = api
                        .update_setting(name.as_str(), parse_setting_value(&value))
                        .await?;
                    println!(
                        "{}",
                        response
                            .message
                            .unwrap_or_else(|| format!("Updated {}", name))
                    );
                }
            }
        }
        Command::Stats { period } => {
            let api = api_client(&config)?;
            let (current_month, current_year) = current_month();
            let stats = match period {
                StatsPeriod::Month { month, year } => {
                    api.get_month_stats(
                        month.unwrap_or(current_month),
                        year.unwrap_or(current_year),
                    )
                    .await?
                }
                StatsPeriod::Year { year } => {
                    api.get_year_stats(year.unwrap_or(current_year)).await?
                }
            };
            print_stats(&stats);
        }
    }
    Ok(())
}

async fn open_registration(
    config: &Config,
) -> Result<Registration<DiskStorage, HttpFetcher>, AppError> {
    let storage = match &config.cache.dir {
        Some(dir) => DiskStorage::with_dir(dir.clone()),
        None => DiskStorage::new().ok_or(ConfigError::NoCacheDir)?,
    };
    let state_path: PathBuf = storage.root().join("registration.json");
    let fetcher = HttpFetcher::new(&config.app.origin)?;
    let handler = CacheHandler::new(Arc::new(storage), Arc::new(fetcher));
    Ok(Registration::load(handler, state_path).await?)
}

fn api_client(config: &Config) -> Result<ApiClient, ApiError> {
    let endpoint = config
        .app
        .endpoint
        .clone()
        .ok_or(ApiError::MissingEndpoint)?;
    Ok(ApiClient::new(endpoint))
}

fn write_body(output: Option<PathBuf>, body: &[u8]) -> Result<(), AppError> {
    match output {
        Some(path) => std::fs::write(&path, body)
            .map_err(|e| AppError::InvalidArgument(format!("writing {}: {}", path.display(), e))),
        None => {
            let mut stdout = std::io::stdout();
            // Ignore broken pipes.
            let _ = stdout.write_all(body);
            let _ = stdout.flush();
            Ok(())
        }
    }
}

fn print_stats(stats: &PeriodStats) {
    println!("Total drinks:         {}", stats.total_drinks);
    println!("Drinking days:        {}", stats.drinking_days);
    println!("Dry days:             {}", stats.dry_days);
    println!(
        "Avg per drinking day: {:.1}",
        stats.average_drinks_per_drinking_day
    );
    println!("Total cost:           ${:.2}", stats.total_cost);
    println!("Days tracked:         {}", stats.total_days_tracked);

    for month in &stats.monthly_breakdown {
        let name = u8::try_from(month.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map(|m| m.name().to_string())
            .unwrap_or_else(|| month.month.to_string());
        println!("  {:<10} {} drinks", name, month.total_drinks);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value).map_err(ApiError::from)?;
    println!("{}", json);
    Ok(())
}
