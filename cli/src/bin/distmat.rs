use distmat::decomposition::{Decompose, Method, SvdConfig};
use distmat::{KeyedDataset, Preprocess, ReductionStrategy};
use distmat_cli::pipeline::{linearize_keys, load_dataset, parse_groups, write_json, PipelineConfig};
use std::io::{BufWriter, Write};
use std::path::Path;
#[macro_use]
extern crate log;

fn main() -> std::io::Result<()> {
    let matches = distmat_cli::distmat_commands::distmat_parser().get_matches();
    if let Some(("pipeline", sub_m)) = matches.subcommand() {
        let path: &String = get_arg(sub_m, "profile")?;
        let file = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&file)
            .map_err(|why| std::io::Error::new(std::io::ErrorKind::InvalidData, why))?;
        return distmat_cli::pipeline::run_pipeline(&config);
    }
    if let Some((_, sub_m)) = matches.subcommand() {
        let level = match sub_m.get_count("verbose") {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    }
    match matches.subcommand() {
        Some(("svd", sub_m)) => svd(sub_m),
        Some(("stats", sub_m)) => stats(sub_m),
        Some(("query", sub_m)) => query(sub_m),
        _ => unreachable!(),
    }
}

fn svd(matches: &clap::ArgMatches) -> std::io::Result<()> {
    debug!("START\tSVD");
    set_threads(matches);
    let data = input_dataset(matches)?;
    let preprocess: Preprocess = parse_arg(matches, "preprocess")?;
    let data = preprocess.run(&data);
    let k: usize = parse_arg(matches, "k")?;
    let method: Method = parse_arg(matches, "method")?;
    let mut config = SvdConfig::new(k, method);
    config.max_iterations = parse_arg(matches, "iterations")?;
    config.tolerance = parse_arg(matches, "tol")?;
    config.seed = parse_arg(matches, "seed")?;
    config.strategy = parse_arg::<ReductionStrategy>(matches, "strategy")?;
    config.mean_subtract = !matches.get_flag("no_center");
    let result = data.svd(&config)?;
    if !result.status.is_converged() {
        warn!("SVD\tReturn the estimate without convergence");
    }
    let output: Option<&String> = matches.get_one("output");
    write_json(&result.to_record(method), output.map(Path::new))
}

fn stats(matches: &clap::ArgMatches) -> std::io::Result<()> {
    debug!("START\tStats");
    set_threads(matches);
    let data = input_dataset(matches)?;
    let (n, d) = data.shape();
    let stdout = std::io::stdout();
    let mut wtr = BufWriter::new(stdout.lock());
    writeln!(wtr, "N\t{}", n)?;
    writeln!(wtr, "D\t{}", d)?;
    writeln!(wtr, "Partitions\t{}", data.num_partitions())?;
    if let Some(dims) = data.dimensions() {
        writeln!(wtr, "KeyMin\t{:?}", dims.min)?;
        writeln!(wtr, "KeyMax\t{:?}", dims.max)?;
    }
    let mean = data.mean();
    writeln!(wtr, "MeanNorm\t{:.4}", mean.norm())?;
    writeln!(wtr, "MeanStd\t{:.4}", data.std().mean())?;
    Ok(())
}

fn query(matches: &clap::ArgMatches) -> std::io::Result<()> {
    debug!("START\tQuery");
    set_threads(matches);
    let data = input_dataset(matches)?;
    let preprocess: Preprocess = parse_arg(matches, "preprocess")?;
    let data = linearize_keys(&preprocess.run(&data))?;
    let groups = parse_groups(Path::new(get_arg(matches, "groups")?))?;
    let averages: Vec<Vec<f64>> = data
        .query(&groups)
        .iter()
        .map(|x| x.iter().copied().collect())
        .collect();
    let output: Option<&String> = matches.get_one("output");
    write_json(&averages, output.map(Path::new))
}

fn input_dataset(matches: &clap::ArgMatches) -> std::io::Result<KeyedDataset> {
    let input: &String = get_arg(matches, "input")?;
    let nkeys: usize = parse_arg(matches, "nkeys")?;
    let partitions: usize = parse_arg(matches, "partitions")?;
    load_dataset(Path::new(input), nkeys, partitions)
}

fn get_arg<'a>(matches: &'a clap::ArgMatches, id: &str) -> std::io::Result<&'a String> {
    matches.get_one::<String>(id).ok_or_else(|| {
        let why = format!("--{} is required", id);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, why)
    })
}

fn parse_arg<T>(matches: &clap::ArgMatches, id: &str) -> std::io::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let arg = get_arg(matches, id)?;
    arg.parse().map_err(|why: T::Err| {
        let why = format!("--{} {}: {}", id, arg, why);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, why)
    })
}

fn set_threads(matches: &clap::ArgMatches) {
    if let Some(threads) = matches
        .get_one("threads")
        .and_then(|num: &String| num.parse().ok())
    {
        debug!("Set Threads\t{}", threads);
        if let Err(why) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            debug!("{:?}", why);
        }
    }
}
