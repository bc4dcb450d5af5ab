mod astar;
mod network;
mod pathfind;
mod worker;

use astar::TileGrid;
use clap::Parser;
use log::{info, warn};
use pathfind::{PathPoll, PathQuery};
use rand::Rng;
use shared::Cell;
use worker::PathWorker;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Room to join
    #[arg(short = 'g', long, default_value = "demo")]
    game_id: String,

    /// Session name, random when omitted
    #[arg(short = 'c', long)]
    client_id: Option<String>,

    /// Side length of the demo grid
    #[arg(long, default_value = "32")]
    grid_size: i32,

    /// Ticks granted to each path query
    #[arg(long, default_value = "5")]
    tick_budget: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let mut rng = rand::thread_rng();

    let client_id = args
        .client_id
        .clone()
        .unwrap_or_else(|| format!("player-{}", rng.gen_range(1000..10000)));

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    info!("Joining game {} as {}", args.game_id, client_id);

    let worker = PathWorker::spawn();
    worker
        .initialize(random_grid(args.grid_size, &mut rng))
        .await?;

    let mut client = network::GameClient::connect(&args.server, &args.game_id, &client_id).await?;

    // One path query at a time, advanced once per broadcast turn. A
    // resolved query is replaced with a fresh random one.
    let mut query: Option<PathQuery> = None;

    while let Some(turn) = client.next_turn().await {
        info!(
            "Turn {} carried {} intents",
            turn.turn_number,
            turn.intents.len()
        );

        let active = query.get_or_insert_with(|| {
            let (start, end) = random_endpoints(args.grid_size, &mut rng);
            info!(
                "Requesting a path from ({}, {}) to ({}, {})",
                start.x, start.y, end.x, end.y
            );
            PathQuery::new(worker.clone(), start, end, args.tick_budget)
        });

        let resolved = match active.poll(turn.turn_number) {
            PathPoll::Pending => false,
            PathPoll::Completed => {
                let path = active.reconstruct_path()?;
                info!("Path of {} cells ready on turn {}", path.len(), turn.turn_number);
                client
                    .send_intent(serde_json::json!({ "action": "path", "length": path.len() }))
                    .await?;
                true
            }
            PathPoll::NotFound => {
                info!("No route between the chosen cells");
                true
            }
            PathPoll::Failed(error) => {
                warn!("Path query failed: {}", error);
                true
            }
        };
        if resolved {
            query = None;
        }

        if rng.gen_bool(0.3) {
            client
                .send_intent(serde_json::json!({ "action": "ping", "turn": turn.turn_number }))
                .await?;
        }
    }

    info!("Server closed the turn stream");
    Ok(())
}

fn random_grid<R: Rng>(size: i32, rng: &mut R) -> TileGrid {
    // A non-positive size leaves nothing to sample, so keep one cell.
    let size = size.max(1);
    let mut grid = TileGrid::new(size, size);
    for x in 0..size {
        for y in 0..size {
            if rng.gen_bool(0.2) {
                grid.set_blocked(Cell::new(x, y), true);
            }
        }
    }
    grid
}

fn random_endpoints<R: Rng>(size: i32, rng: &mut R) -> (Cell, Cell) {
    let size = size.max(1);
    let start = Cell::new(rng.gen_range(0..size), rng.gen_range(0..size));
    let end = Cell::new(rng.gen_range(0..size), rng.gen_range(0..size));
    (start, end)
}
