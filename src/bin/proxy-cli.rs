use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for vhost-balancer", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxy system status
    Status,
    /// Show routes with queue depth and host health
    Info {
        #[arg(long)]
        vhost: Option<String>,
    },
    /// Show traffic statistics
    Stats {
        #[arg(long)]
        vhost: Option<String>,
    },
    /// Create a route
    CreateRoute {
        vhost: String,
        #[arg(long, default_value = "round-robin")]
        strategy: String,
        /// Basic auth caller URL
        #[arg(long)]
        auth: Option<String>,
    },
    /// Remove a route
    RemoveRoute { vhost: String },
    /// Register a backend on a route
    AddHost {
        vhost: String,
        id: String,
        hostname: String,
        port: u16,
        #[arg(long)]
        cluster: Option<String>,
        #[arg(long)]
        protocol: Option<String>,
    },
    /// Unregister a backend
    RemoveHost { vhost: String, id: String },
    /// Report a backend as dead
    Dead { vhost: String, id: String },
    /// Report a backend as alive
    Alive { vhost: String, id: String },
    /// Swap the selection strategy of a route
    Strategy { vhost: String, strategy: String },
    /// Toggle maintenance mode
    Maintenance {
        vhost: String,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Install a certificate (PEM files) for a domain
    Certificate {
        domain: String,
        cert_file: std::path::PathBuf,
        key_file: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/');

    let (method, path, body, query) = match cli.command {
        Commands::Status => (Method::GET, "/admin/status".to_string(), None, None),
        Commands::Info { vhost } => (Method::GET, "/admin/routes".to_string(), None, vhost),
        Commands::Stats { vhost } => (Method::GET, "/admin/stats".to_string(), None, vhost),
        Commands::CreateRoute {
            vhost,
            strategy,
            auth,
        } => (
            Method::POST,
            "/admin/routes".to_string(),
            Some(json!({ "vhost": vhost, "strategy": strategy, "auth": auth })),
            None,
        ),
        Commands::RemoveRoute { vhost } => {
            (Method::DELETE, format!("/admin/routes/{}", vhost), None, None)
        }
        Commands::AddHost {
            vhost,
            id,
            hostname,
            port,
            cluster,
            protocol,
        } => (
            Method::POST,
            format!("/admin/routes/{}/hosts", vhost),
            Some(json!({
                "id": id,
                "hostname": hostname,
                "port": port,
                "cluster": cluster,
                "protocol": protocol,
            })),
            None,
        ),
        Commands::RemoveHost { vhost, id } => (
            Method::DELETE,
            format!("/admin/routes/{}/hosts/{}", vhost, id),
            None,
            None,
        ),
        Commands::Dead { vhost, id } => (
            Method::POST,
            format!("/admin/routes/{}/hosts/{}/dead", vhost, id),
            None,
            None,
        ),
        Commands::Alive { vhost, id } => (
            Method::POST,
            format!("/admin/routes/{}/hosts/{}/alive", vhost, id),
            None,
            None,
        ),
        Commands::Strategy { vhost, strategy } => (
            Method::PUT,
            format!("/admin/routes/{}/strategy", vhost),
            Some(json!({ "strategy": strategy })),
            None,
        ),
        Commands::Maintenance { vhost, enabled } => (
            Method::PUT,
            format!("/admin/routes/{}/maintenance", vhost),
            Some(json!({ "enabled": enabled })),
            None,
        ),
        Commands::Certificate {
            domain,
            cert_file,
            key_file,
        } => (
            Method::POST,
            "/admin/certificates".to_string(),
            Some(json!({
                "domain": domain,
                "cert": std::fs::read_to_string(cert_file)?,
                "privkey": std::fs::read_to_string(key_file)?,
            })),
            None,
        ),
    };

    let mut request = client.request(method, format!("{}{}", base, path));
    if let Some(vhost) = query {
        request = request.query(&[("vhost", vhost)]);
    }
    if let Some(body) = body {
        request = request.json(&body);
    }
    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }

    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
