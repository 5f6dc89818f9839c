use clap::Parser;
use crossbeam_channel::bounded;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use vigil_client::{ConfigState, Detection, FeedHub, FeedServer, INBOUND_CAP, OUTBOUND_CAP};

const AGES: &[&str] = &["18-24", "25-32", "33-40", "41-52", "Unknown"];
const GENDERS: &[&str] = &["Male", "Female", "Unknown"];

#[derive(Parser, Debug)]
#[command(name = "mock_feed", about = "Synthetic recognition feed for the dashboard")]
struct Args {
    #[arg(long, env = "VIGIL_FEED_ADDR", default_value = "127.0.0.1:8000")]
    addr: String,

    /// Write the bound address here (useful with port 0).
    #[arg(long, value_name = "PATH")]
    addr_file: Option<PathBuf>,

    #[arg(long, default_value_t = 500)]
    interval_ms: u64,

    #[arg(long)]
    run_for_ms: Option<u64>,

    #[arg(long)]
    seed: Option<u64>,
}

fn synthetic_people(rng: &mut StdRng) -> Vec<Detection> {
    let count = rng.gen_range(0..=3);
    (0..count)
        .map(|_| {
            let mut p = Detection::new(format!("P-{:03}", rng.gen_range(1..=12)));
            let x1 = rng.gen_range(0..560);
            let y1 = rng.gen_range(0..400);
            let (w, h) = (rng.gen_range(40..80), rng.gen_range(60..120));
            p.rect = Some([x1, y1, x1 + w, y1 + h]);
            p.centroid = Some(vec![(x1 + w / 2) as f32, (y1 + h / 2) as f32]);
            p.age = Some(AGES[rng.gen_range(0..AGES.len())].to_string());
            p.gender = Some(GENDERS[rng.gen_range(0..GENDERS.len())].to_string());
            p
        })
        .collect()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let (in_tx, in_rx) = bounded(INBOUND_CAP);
    let (out_tx, out_rx) = bounded(OUTBOUND_CAP);

    let server = match FeedServer::spawn(&args.addr, in_tx, out_rx) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Some(path) = &args.addr_file {
        let _ = fs::write(path, server.listen_addr().to_string());
    }

    println!("mock_feed listening on ws://{}/ws", server.listen_addr());

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let initial = ConfigState {
        global_detect: true,
        ..ConfigState::default()
    };
    let mut hub = FeedHub::new(in_rx, out_tx, initial);
    let interval = Duration::from_millis(args.interval_ms.max(1));

    let start = Instant::now();
    let mut last_publish = Instant::now();
    loop {
        hub.tick();
        if hub.clients() > 0 && last_publish.elapsed() >= interval {
            let people = if hub.config().global_detect {
                synthetic_people(&mut rng)
            } else {
                Vec::new()
            };
            hub.publish(people);
            last_publish = Instant::now();
        }
        thread::sleep(Duration::from_millis(33));
        if let Some(max) = args.run_for_ms {
            if start.elapsed() >= Duration::from_millis(max) {
                break;
            }
        }
    }

    server.shutdown();
}
