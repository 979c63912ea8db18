use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use octofhir_smart_launch::config::loader;
use octofhir_smart_launch::oauth::id_token::decode_untrusted;
use octofhir_smart_launch::observability;
use octofhir_smart_launch::{ConformanceResolver, IdTokenValidator, SmartLaunchConfig};

#[derive(Parser)]
#[command(name = "octofhir-smart")]
#[command(about = "Diagnostics for SMART on FHIR EHR launch endpoints")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "OCTOFHIR_SMART_CONFIG")]
    config: Option<String>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Allow plain HTTP URLs (testing only)
    #[arg(long, global = true)]
    allow_http: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch {issuer}/metadata and print the authorize and token endpoints
    Discover {
        /// Issuer (FHIR base URL)
        issuer: String,
    },
    /// Verify an identity token against a provider's JWKS and print its claims
    VerifyIdToken {
        /// OpenID configuration URL
        #[arg(long)]
        openid_config: Option<String>,
        /// Decode the claims without checking the signature
        #[arg(long, conflicts_with = "openid_config")]
        no_verify: bool,
        /// The identity token (JWT)
        token: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing_with_level(&cli.log_level);

    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Discover { issuer } => {
            let http = config.build_http_client()?;
            let info = ConformanceResolver::new(http, &config)
                .resolve(issuer)
                .await
                .with_context(|| format!("discovery failed for {issuer}"))?;
            println!("authorize: {}", info.authorize_url);
            println!("token:     {}", info.token_url);
        }
        Commands::VerifyIdToken {
            openid_config,
            no_verify,
            token,
        } => {
            let claims = if *no_verify {
                decode_untrusted(token)?
            } else {
                let url = openid_config
                    .as_deref()
                    .context("--openid-config is required unless --no-verify is given")?;
                let http = config.build_http_client()?;
                IdTokenValidator::new(http, &config)
                    .verify(token, url)
                    .await
                    .context("identity token verification failed")?
            };
            println!("{}", serde_json::to_string_pretty(&claims)?);
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<SmartLaunchConfig> {
    let mut config = loader::load_config(cli.config.as_deref()).context("loading configuration")?;
    if cli.allow_http {
        config = config.with_allow_http(true);
    }
    Ok(config)
}
