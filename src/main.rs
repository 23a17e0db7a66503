use anyhow::{Context, Result};
use clap::Parser;
use regional_soup::{compression_ratio, Config, Engine};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "regional-soup")]
#[command(about = "Regional primordial soup: batched tape exchange under a region overlay")]
struct Cli {
    /// Load settings from a YAML config file
    #[arg(short, long)]
    config: Option<String>,

    /// Write a template config and exit
    #[arg(long, num_args = 0..=1, default_missing_value = "config.yaml")]
    generate_config: Option<String>,

    /// Number of prepare/absorb ticks (overrides config)
    #[arg(short, long)]
    ticks: Option<usize>,

    /// Fixed number of point mutations per tick instead of `noise * pairs`
    #[arg(short, long)]
    mutations_per_tick: Option<i32>,

    /// Ticks between status reports (overrides config)
    #[arg(short, long)]
    report_interval: Option<usize>,

    /// Seed for `init` (overrides config)
    #[arg(short, long, allow_negative_numbers = true)]
    seed: Option<i32>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_yaml(path).with_context(|| format!("loading {path}"))?,
        None => Config::default(),
    };
    if let Some(ticks) = cli.ticks {
        config.run.ticks = ticks;
    }
    if let Some(interval) = cli.report_interval {
        config.run.report_interval = interval;
    }
    if let Some(seed) = cli.seed {
        config.engine.seed = seed;
    }

    for warning in config.validate().context("config validation")? {
        eprintln!("Config warning: {}", warning);
    }
    Ok(config)
}

fn print_status(engine: &Engine, tick: usize, pairs: usize, elapsed: f64) {
    let census = engine.census();
    println!(
        "Tick {:8} | Pairs: {:6} | Committed: {:8} | H0: {:.4} bits | Brotli: {:.2}x | {:.1}s",
        tick,
        pairs,
        engine.committed_bytes(),
        census.entropy(),
        compression_ratio(engine.soup()),
        elapsed
    );

    let total = census.total().max(1) as f64;
    print!("Top bytes: ");
    for (byte, count) in census.top(10) {
        let c = if byte.is_ascii_graphic() || byte == b' ' {
            byte as char
        } else {
            '·'
        };
        print!("'{}'{:02X}:{:.1}% ", c, byte, count as f64 / total * 100.0);
    }
    println!();
}

fn run(config: Config, fixed_mutations: Option<i32>) -> Result<()> {
    let engine_config = config.engine.clone();
    let mut engine = Engine::new(engine_config).context("building engine")?;
    engine.init(config.engine.seed);

    println!("Regional Primordial Soup");
    println!("========================\n");
    println!("Configuration:");
    println!(
        "  Tapes: {} ({}x{} grid, {} bytes each)",
        engine.tape_count(),
        engine.width(),
        engine.height(),
        engine.tape_len()
    );
    println!("  Seed: {}", config.engine.seed);
    println!("  Max pairs per batch: {}", engine.max_pairs());
    match engine.region_grid_size() {
        0 => println!("  Regions: none (uniform)"),
        size => println!("  Regions: {size}x{size}"),
    }
    match fixed_mutations {
        Some(n) => println!("  Mutations: {n} per tick"),
        None => println!("  Mutations: {} per absorbed pair", config.run.noise),
    }
    println!("  Ticks: {}\n", config.run.ticks);

    let start = Instant::now();
    let mut pairs = 0;
    for tick in 1..=config.run.ticks {
        engine.prepare_batch();
        pairs = engine
            .absorb_batch()
            .with_context(|| format!("absorbing batch at tick {tick}"))?;

        let mutations = match fixed_mutations {
            Some(n) => n,
            None => i32::try_from((pairs as f64 * config.run.noise).floor() as u64)
                .context("mutation count overflow")?,
        };
        engine
            .mutate(mutations)
            .with_context(|| format!("mutating at tick {tick}"))?;

        let interval = config.run.report_interval;
        if interval > 0 && tick % interval == 0 {
            engine.update_counts();
            print_status(&engine, tick, pairs, start.elapsed().as_secs_f64());
        }
    }

    engine.update_counts();
    println!();
    print_status(&engine, config.run.ticks, pairs, start.elapsed().as_secs_f64());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Some(path) = &cli.generate_config {
        Config::write_template(path).with_context(|| format!("writing {path}"))?;
        println!("Generated config template: {}", path);
        return Ok(());
    }

    let config = load_config(&cli)?;
    run(config, cli.mutations_per_tick)
}
