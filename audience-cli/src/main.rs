//! audience-cli: command-line frontend for the Audience HTTP API
//!
//! # Subcommands
//! - `submit <image> --identity <name> [--date YYYY-MM-DD]`: run a screenshot through the pipeline
//! - `analyze <text-or-file> [--json]`: classify and extract without recording
//! - `history <account> --identity <name> [--json]`: recorded observations
//! - `status`: show server health

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8767";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "audience-cli",
    version,
    about = "Follower tracking from profile screenshots"
)]
struct Cli {
    /// Audience HTTP server URL (overrides AUDIENCE_HTTP_URL env var)
    #[arg(long, env = "AUDIENCE_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Submit a profile screenshot
    Submit {
        /// Path to the image file
        image: String,

        /// Who the screenshot belongs to
        #[arg(short, long)]
        identity: String,

        /// Observation date (YYYY-MM-DD), server's today by default
        #[arg(long)]
        date: Option<String>,
    },

    /// Classify and extract accounts from OCR text (a file path or the text itself)
    Analyze {
        input: String,

        #[arg(long)]
        json: bool,
    },

    /// Show recorded observations for an account
    History {
        /// Account handle, e.g. @mybrand
        account: String,

        #[arg(short, long)]
        identity: String,

        #[arg(long)]
        json: bool,
    },

    /// Show Audience server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ObservationView {
    pub date: String,
    pub identity: String,
    pub platform: String,
    pub account: String,
    pub followers: i64,
    pub evolution: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub summary: String,
    pub observations: Vec<ObservationView>,
}

#[derive(Debug, Deserialize)]
pub struct AccountView {
    pub account: String,
    pub followers: i64,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeResponse {
    pub platform: String,
    pub accounts: Vec<AccountView>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub observations: Vec<ObservationView>,
}

// ============================================================================
// Formatting
// ============================================================================

/// `+120`, `-35`, `0`, or `?` when there was nothing to compare with.
pub fn evolution_label(evolution: Option<i64>) -> String {
    match evolution {
        Some(d) if d > 0 => format!("+{}", d),
        Some(d) => d.to_string(),
        None => "?".to_string(),
    }
}

pub fn format_observation(o: &ObservationView) -> String {
    format!(
        "{}  {:<10} {:<24} {:>10}  {}",
        o.date,
        o.platform,
        o.account,
        o.followers,
        evolution_label(o.evolution)
    )
}

pub fn format_account(a: &AccountView) -> String {
    if a.followers < 0 {
        format!("{:<24} (no follower count)", a.account)
    } else {
        format!("{:<24} {:>10}", a.account, a.followers)
    }
}

/// A readable file's contents, otherwise the argument itself.
fn read_text_arg(input: &str) -> anyhow::Result<String> {
    let path = Path::new(input);
    if path.is_file() {
        Ok(std::fs::read_to_string(path)?)
    } else {
        Ok(input.to_string())
    }
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: u64) -> anyhow::Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send and decode, exiting on connection or HTTP failure.
fn expect_json<T: serde::de::DeserializeOwned>(
    url: &str,
    resp: reqwest::Result<reqwest::blocking::Response>,
) -> T {
    let resp = match resp {
        Ok(r) => r,
        Err(e) => {
            eprintln!("audience-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("audience-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    match resp.json() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("audience-cli: failed to parse response: {}", e);
            std::process::exit(1);
        }
    }
}

fn do_submit(server: &str, image: &str, identity: &str, date: Option<&str>) -> anyhow::Result<()> {
    let bytes = std::fs::read(image)?;
    let url = format!("{}/submit", server);
    let body = serde_json::json!({
        "identity": identity,
        "image_base64": STANDARD.encode(&bytes),
        "date": date,
    });

    let resp: SubmitResponse = expect_json(&url, client(120)?.post(&url).json(&body).send());

    println!("{}", resp.summary);
    for o in &resp.observations {
        println!("  {}", format_observation(o));
    }
    Ok(())
}

fn do_analyze(server: &str, input: &str, json_output: bool) -> anyhow::Result<()> {
    let text = read_text_arg(input)?;
    let url = format!("{}/analyze", server);
    let body = serde_json::json!({ "text": text });

    let resp = client(30)?.post(&url).json(&body).send();
    if json_output {
        let value: serde_json::Value = expect_json(&url, resp);
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let resp: AnalyzeResponse = expect_json(&url, resp);
    println!("Platform: {}", resp.platform);
    if resp.accounts.is_empty() {
        eprintln!("No handle found");
    }
    for a in &resp.accounts {
        println!("  {}", format_account(a));
    }
    Ok(())
}

fn do_history(server: &str, account: &str, identity: &str, json_output: bool) -> anyhow::Result<()> {
    let url = format!("{}/history", server);
    let resp = client(30)?
        .get(&url)
        .query(&[("account", account), ("identity", identity)])
        .send();

    if json_output {
        let value: serde_json::Value = expect_json(&url, resp);
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let resp: HistoryResponse = expect_json(&url, resp);
    if resp.observations.is_empty() {
        eprintln!("No observations for {} ({})", account, identity);
        return Ok(());
    }
    for o in &resp.observations {
        println!("{}", format_observation(o));
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", server);
    let resp = client(10)?.get(&url).send();

    match resp {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Audience server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
            println!("Store:           {}", body["store"].as_str().unwrap_or("?"));
            if let Some(pg) = body["postgresql"].as_str() {
                println!("PostgreSQL:      {}", pg);
            }
        }
        Ok(r) => {
            eprintln!("audience-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("audience-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Submit {
            image,
            identity,
            date,
        } => do_submit(&server, &image, &identity, date.as_deref()),
        Commands::Analyze { input, json } => do_analyze(&server, &input, json),
        Commands::History {
            account,
            identity,
            json,
        } => do_history(&server, &account, &identity, json),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("audience-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(followers: i64, evolution: Option<i64>) -> ObservationView {
        ObservationView {
            date: "2024-03-07".to_string(),
            identity: "Lea".to_string(),
            platform: "TikTok".to_string(),
            account: "@mybrand".to_string(),
            followers,
            evolution,
        }
    }

    #[test]
    fn test_evolution_label_signs() {
        assert_eq!(evolution_label(Some(120)), "+120");
        assert_eq!(evolution_label(Some(-35)), "-35");
        assert_eq!(evolution_label(Some(0)), "0");
        assert_eq!(evolution_label(None), "?");
    }

    #[test]
    fn test_format_observation_contains_fields() {
        let line = format_observation(&observation(1200, Some(100)));
        assert!(line.starts_with("2024-03-07"));
        assert!(line.contains("@mybrand"));
        assert!(line.contains("1200"));
        assert!(line.ends_with("+100"));
    }

    #[test]
    fn test_format_account_unparsed() {
        let a = AccountView {
            account: "@beta".to_string(),
            followers: -1,
        };
        assert!(format_account(&a).contains("no follower count"));
    }

    #[test]
    fn test_read_text_arg_falls_back_to_literal() {
        let text = read_text_arg("@brand 1k followers").unwrap();
        assert_eq!(text, "@brand 1k followers");
    }

    #[test]
    fn test_submit_response_parses_server_shape() {
        let body = serde_json::json!({
            "identity": "Lea",
            "date": "2024-03-07",
            "platform": "TikTok",
            "summary": "07/03/2024 – LEA – 1 compte(s) détecté(s) et ajouté(s)",
            "observations": [{
                "id": "7b5c24ab-1234-5678-9abc-def012345678",
                "recorded_at": "2024-03-07T10:00:00Z",
                "date": "2024-03-07",
                "identity": "Lea",
                "platform": "TikTok",
                "account": "@mybrand",
                "followers": 1200,
                "evolution": null
            }]
        });
        let resp: SubmitResponse = serde_json::from_value(body).unwrap();
        assert_eq!(resp.observations.len(), 1);
        assert_eq!(resp.observations[0].evolution, None);
    }

    #[test]
    fn test_cli_parses_history() {
        let cli = Cli::try_parse_from([
            "audience-cli",
            "--server",
            "http://localhost:9000/",
            "history",
            "@mybrand",
            "--identity",
            "Lea",
        ])
        .unwrap();
        assert_eq!(cli.server, "http://localhost:9000/");
        assert!(matches!(cli.command, Commands::History { json: false, .. }));
    }
}
