use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "ember", about = "Ember — one-time secret vault", version)]
struct Cli {
    /// Ember server URL (default: http://localhost:8080 or $EMBER_SERVER)
    #[arg(long, env = "EMBER_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Bearer token for admin routes ($EMBER_ADMIN_TOKEN)
    #[arg(long, env = "EMBER_ADMIN_TOKEN")]
    admin_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Ember HTTP server
    Serve {
        /// Port to listen on (default: $EMBER_PORT or 8080)
        #[arg(long, env = "EMBER_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $EMBER_HOST or 0.0.0.0)
        #[arg(long, env = "EMBER_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Share a secret and print its one-time URL
    Share {
        /// Secret text, or `-` to read it from stdin
        #[arg(name = "TEXT", allow_hyphen_values = true)]
        text: String,
        /// Time to live: minutes (`15`) or a span like `2h`, `1d` (default 10 minutes)
        #[arg(long)]
        ttl: Option<String>,
    },
    /// Read a secret exactly once, by token or full URL
    Read {
        /// Claim token or one-time URL
        target: String,
    },
    /// Delete all expired secrets on the server immediately
    Reap,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("EMBER_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,
        Commands::Share { text, ttl } => cmd_share(&cli.server, &text, ttl.as_deref()).await,
        Commands::Read { target } => cmd_read(&cli.server, &target).await,
        Commands::Reap => cmd_reap(&cli.server, cli.admin_token.as_deref()).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let cfg = ember_server::ServerConfig {
        host,
        port,
        ..Default::default()
    };
    ember_server::run(cfg).await
}

async fn cmd_share(server: &str, text: &str, ttl: Option<&str>) -> Result<()> {
    let secret = if text == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read secret from stdin")?;
        // Strip the one trailing newline a pipe usually appends.
        match buf.strip_suffix('\n') {
            Some(s) => s.strip_suffix('\r').unwrap_or(s).to_owned(),
            None => buf,
        }
    } else {
        text.to_owned()
    };

    if secret.is_empty() {
        anyhow::bail!("refusing to share an empty secret");
    }

    let expire_minutes = ttl.map(parse_ttl_minutes).transpose()?;

    let client = Client::new();
    let resp = client
        .post(format!("{}/secrets", server.trim_end_matches('/')))
        .json(&serde_json::json!({
            "secret": secret,
            "expire_minutes": expire_minutes,
        }))
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let json: Value = resp.json().await.unwrap_or_default();
        anyhow::bail!(
            "server returned {status}: {}",
            json["error"].as_str().unwrap_or("")
        );
    }

    let json: Value = resp.json().await.context("parse response")?;
    let url = json["url"].as_str().context("response missing url")?;
    println!("{url}");
    Ok(())
}

async fn cmd_read(server: &str, target: &str) -> Result<()> {
    let token = extract_token(target);

    let client = Client::new();
    let resp = client
        .get(format!("{}/secrets/{}", server.trim_end_matches('/'), token))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;

    if status.is_success() {
        println!("{}", json["secret"].as_str().unwrap_or(""));
        Ok(())
    } else {
        anyhow::bail!("{}", json["error"].as_str().unwrap_or("unknown error"));
    }
}

async fn cmd_reap(server: &str, admin_token: Option<&str>) -> Result<()> {
    let client = Client::new();
    let mut req = client.post(format!("{}/reap", server.trim_end_matches('/')));
    if let Some(token) = admin_token {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await.context("HTTP request failed")?;

    if resp.status().is_success() {
        let json: Value = resp.json().await?;
        println!(
            "reaped {} expired secret(s)",
            json["reaped"].as_u64().unwrap_or(0)
        );
        Ok(())
    } else {
        anyhow::bail!("server returned {}", resp.status());
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Parse a TTL as bare minutes ("15") or a humantime span ("2h", "1d"),
/// rounding partial minutes up so a share never expires earlier than asked.
fn parse_ttl_minutes(s: &str) -> Result<u64> {
    if let Ok(minutes) = s.parse::<u64>() {
        return Ok(minutes);
    }
    let d: humantime::Duration = s.parse().with_context(|| format!("invalid ttl: {s}"))?;
    Ok(d.as_secs().div_ceil(60))
}

/// Accept either a bare token or a full one-time URL and return the token.
fn extract_token(input: &str) -> &str {
    input.rsplit('/').find(|s| !s.is_empty()).unwrap_or(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_accepts_bare_minutes() {
        assert_eq!(parse_ttl_minutes("15").unwrap(), 15);
        assert_eq!(parse_ttl_minutes("0").unwrap(), 0);
    }

    #[test]
    fn ttl_accepts_humantime_spans() {
        assert_eq!(parse_ttl_minutes("2h").unwrap(), 120);
        assert_eq!(parse_ttl_minutes("1d").unwrap(), 1440);
        assert_eq!(parse_ttl_minutes("10m").unwrap(), 10);
    }

    #[test]
    fn ttl_rounds_partial_minutes_up() {
        assert_eq!(parse_ttl_minutes("90s").unwrap(), 2);
        assert_eq!(parse_ttl_minutes("30s").unwrap(), 1);
        assert_eq!(parse_ttl_minutes("61s").unwrap(), 2);
    }

    #[test]
    fn ttl_rejects_garbage() {
        assert!(parse_ttl_minutes("soon").is_err());
        assert!(parse_ttl_minutes("-5").is_err());
    }

    #[test]
    fn token_extraction_handles_urls_and_bare_tokens() {
        assert_eq!(extract_token("deadbeef"), "deadbeef");
        assert_eq!(
            extract_token("http://localhost:8080/secrets/deadbeef"),
            "deadbeef"
        );
        assert_eq!(
            extract_token("https://ember.example.com/secrets/deadbeef/"),
            "deadbeef"
        );
    }
}
