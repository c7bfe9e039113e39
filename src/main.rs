use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;
use zoo_core::{save_board, Board, BoardConfig, PatternSet, Point, SharedBoard, UpdateStats};

const SANDBOX_RULES: &str = include_str!("../demos/sandbox.json");

/// Command line: `zoo_studio [--rules FILE] [--config FILE] [--ticks N] [--save FILE]`
#[derive(Debug, Default)]
struct Args {
    rules: Option<PathBuf>,
    config: Option<PathBuf>,
    ticks: Option<usize>,
    save: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(flag) = iter.next() {
        let mut value = || iter.next().with_context(|| format!("{} needs a value", flag));
        match flag.as_str() {
            "--rules" => args.rules = Some(value()?.into()),
            "--config" => args.config = Some(value()?.into()),
            "--ticks" => args.ticks = Some(value()?.parse().context("--ticks expects a number")?),
            "--save" => args.save = Some(value()?.into()),
            other => anyhow::bail!("unknown argument '{}'", other),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    init_tracing();
    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => BoardConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => BoardConfig {
            seed: Some(1),
            ..BoardConfig::with_size(48, 32)
        },
    };
    let rules = match &args.rules {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        None => SANDBOX_RULES.to_string(),
    };
    let patterns = PatternSet::from_json_str(&rules, config.topology)?;
    let mut board = Board::new(config, patterns)?;
    if args.rules.is_none() {
        seed_sandbox(&mut board);
    }

    let board = SharedBoard::new(board);
    let monitor = board.spawn_configured_cache_monitor();

    let ticks = args.ticks.unwrap_or(200);
    let mut totals = UpdateStats::default();
    for tick in 0..ticks {
        let stats = board.tick();
        totals.merge(&stats);
        if tick % 50 == 0 {
            info!(tick, attempts = stats.attempts, accepted = stats.accepted, "tick");
        }
    }
    info!(
        attempts = totals.attempts,
        accepted = totals.accepted,
        rejected = totals.rejected,
        bind_failures = totals.bind_failures,
        "ran {} ticks",
        ticks
    );
    monitor.stop();

    board.with_board(|board| {
        for (name, count) in board.particle_counts() {
            info!("{:>12} {}", name, count);
        }
        match &args.save {
            Some(path) => save_board(board, path).with_context(|| format!("saving {}", path.display())),
            None => Ok(()),
        }
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Sand over a pool, a wall ledge, a vine and a spark.
fn seed_sandbox(board: &mut Board) {
    let (w, h) = (board.width() as i32, board.height() as i32);
    for x in 0..w {
        board.set_particle(Point::new(x, h - 1), "wall");
        for y in h - 6..h - 1 {
            board.set_particle(Point::new(x, y), "water");
        }
    }
    for x in w / 4..w / 2 {
        board.set_particle(Point::new(x, h / 2), "wall");
        for y in 0..4 {
            board.set_particle(Point::new(x, y), "sand");
        }
    }
    board.set_particle(Point::new(3 * w / 4, h - 7), "vine");
    board.set_particle(Point::new(3 * w / 4 + 1, h - 7), "fire9");
}
