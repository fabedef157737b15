use clap::Parser;
use distmat::decomposition::{Decompose, Method, SvdConfig};
use distmat::synthetic::{largest_principal_sine, low_rank};
use distmat::ReductionStrategy;
use log::*;
use rand::Rng;
use rand_xoshiro::Xoshiro256StarStar;
use serde::Serialize;
#[derive(Parser, Debug)]
#[clap(name = "BenchmarkSVD")]
#[clap(version = "1.0")]
#[clap(author,version,about,long_about=None)]
struct Args {
    /// Set the seed of a pseudorandom number generator.
    #[clap(short, long, default_value_t = 7)]
    seed: u64,
    /// The number of vectors.
    #[clap(short, long, default_value_t = 2000)]
    num: usize,
    /// The length of each vector.
    #[clap(short, long, default_value_t = 200)]
    dim: usize,
    /// The rank of the signal.
    #[clap(short, long, default_value_t = 3)]
    rank: usize,
    /// The standard deviation of the noise.
    #[clap(long, default_value_t = 0.01)]
    noise: f64,
    /// The number of partitions.
    #[clap(short, long, default_value_t = 16)]
    partitions: usize,
    /// The number of replicates for each setting.
    #[clap(long, default_value_t = 3)]
    replicates: usize,
    #[clap(short, long, default_value_t = 1)]
    threads: usize,
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Serialize)]
struct Summary {
    seed: u64,
    method: String,
    strategy: String,
    partitions: usize,
    elapsed_ms: u128,
    iterations: usize,
    converged: bool,
    sine: f64,
    latent: Vec<f64>,
}

fn main() -> std::io::Result<()> {
    let command_arg = Args::parse();
    let level = match command_arg.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    if let Err(why) = rayon::ThreadPoolBuilder::new()
        .num_threads(command_arg.threads)
        .build_global()
    {
        warn!("{:?}", why);
    }
    let mut rng: Xoshiro256StarStar = rand::SeedableRng::seed_from_u64(command_arg.seed);
    let settings = [
        (Method::Direct, ReductionStrategy::FoldCombine),
        (Method::Direct, ReductionStrategy::SharedAccumulator),
        (Method::Em, ReductionStrategy::FoldCombine),
        (Method::Em, ReductionStrategy::SharedAccumulator),
    ];
    for _ in 0..command_arg.replicates {
        let seed: u64 = rng.gen();
        let sample = low_rank(
            command_arg.num,
            command_arg.dim,
            command_arg.rank,
            command_arg.noise,
            seed,
            command_arg.partitions,
        )?;
        debug!("GEN\t{}\t{:?}", seed, sample.data.shape());
        for &(method, strategy) in settings.iter() {
            let mut config = SvdConfig::new(command_arg.rank, method);
            config.mean_subtract = false;
            config.strategy = strategy;
            config.seed = seed;
            let start = std::time::Instant::now();
            let result = sample.data.svd(&config)?;
            let elapsed_ms = (std::time::Instant::now() - start).as_millis();
            let summary = Summary {
                seed,
                method: method.to_string(),
                strategy: strategy.to_string(),
                partitions: sample.data.num_partitions(),
                elapsed_ms,
                iterations: result.status.iterations(),
                converged: result.status.is_converged(),
                sine: largest_principal_sine(&result.components, &sample.basis),
                latent: result.singular_values.iter().copied().collect(),
            };
            println!("{}", serde_json::to_string(&summary)?);
        }
    }
    Ok(())
}
