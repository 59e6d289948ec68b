//! # acmesolver
//!
//! HTTP-01 responder run by solver pods. Started by the controller as:
//!
//! ```text
//! acmesolver --listen-port=8089 --domain=example.com --token=<token> --key=<key authorization>
//! ```

use acme_http01_controller::acmesolver::{serve, ChallengeResponse};
use acme_http01_controller::observability;
use acme_http01_controller::solver::SOLVER_PORT;
use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(name = "acmesolver")]
#[command(about = "Serve one ACME HTTP-01 key authorization", long_about = None)]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = SOLVER_PORT as u16)]
    listen_port: u16,

    /// Domain the challenge is for; requests for other hosts get a 404
    #[arg(long)]
    domain: String,

    /// Challenge token issued by the CA
    #[arg(long)]
    token: String,

    /// Key authorization returned to the CA
    #[arg(long)]
    key: String,

    /// Log format (json, text)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    observability::init_tracing(&cli.log_format)?;

    serve(
        cli.listen_port,
        ChallengeResponse {
            domain: cli.domain,
            token: cli.token,
            key: cli.key,
        },
    )
    .await
}
