use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vigil_client::{
    ClientConfig, ConfigOverrides, ControlInput, DashboardClient, SendOutcome, TransportEvent,
};

#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Terminal dashboard for a live recognition feed")]
struct Args {
    #[command(flatten)]
    overrides: ConfigOverrides,

    /// Print only the status line instead of the full dashboard.
    #[arg(long, default_value_t = false)]
    compact: bool,

    /// Exit with an error once a capped reconnect policy gives up.
    #[arg(long, default_value_t = false)]
    exit_on_give_up: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = ClientConfig::from_env()?.with_overrides(&args.overrides)?;
    info!(endpoint = %config.endpoint, "starting dashboard");
    eprintln!("connecting to {}", config.endpoint);
    eprintln!("commands: global | auto | threshold <0..1> | connect | quit");

    let mut client = DashboardClient::new(config);
    client.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut pumping = true;
    let mut gave_up = None;

    loop {
        tokio::select! {
            event = client.pump(), if pumping => {
                let Some(event) = event else {
                    pumping = false;
                    continue;
                };
                if let TransportEvent::GaveUp { attempts } = event {
                    if args.exit_on_give_up {
                        gave_up = Some(attempts);
                        break;
                    }
                }
                if !matches!(event, TransportEvent::Error(_)) {
                    draw(&client, args.compact);
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if matches!(line, "quit" | "exit" | "q") {
                        break;
                    }
                    if line == "connect" {
                        client.connect();
                        pumping = true;
                        continue;
                    }
                    match line.parse::<ControlInput>() {
                        Ok(input) => match client.control(input) {
                            Ok(SendOutcome::Sent) => draw(&client, args.compact),
                            Ok(SendOutcome::Dropped) => {
                                eprintln!("offline: change kept locally, not sent");
                                draw(&client, args.compact);
                            }
                            Err(e) => eprintln!("{e}"),
                        },
                        Err(e) => eprintln!("{e}"),
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.teardown().await?;
    if let Some(attempts) = gave_up {
        anyhow::bail!("gave up reconnecting after {attempts} attempts");
    }
    Ok(())
}

fn draw(client: &DashboardClient, compact: bool) {
    let view = client.view();
    if compact {
        println!("{}", view.status);
    } else {
        println!("{view}");
    }
}
