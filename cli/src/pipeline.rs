//! Pipelines -- load, preprocess, and decompose a dataset in one run.
//!
//! The whole run is described by a TOML file, which is deserialized into [PipelineConfig].
use definitions::{parse_record, Key, Record};
use distmat::decomposition::{Decompose, Method, SvdConfig};
use distmat::{KeyedDataset, Preprocess, ReductionStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// The configuration of the pipeline.
/// Fields other than `input_file` and `k` can be omitted, and then the default values are used.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PipelineConfig {
    /// The path to the input text file.
    input_file: PathBuf,
    /// The path to the output JSON file. If `None`, the result is written to the stdout.
    #[serde(default)]
    output: Option<PathBuf>,
    #[serde(default)]
    verbose: usize,
    #[serde(default = "default_threads")]
    threads: usize,
    /// Number of key fields in each line.
    #[serde(default = "default_nkeys")]
    nkeys: usize,
    #[serde(default = "default_partitions")]
    partitions: usize,
    /// Convert coordinate keys into linear indices before the decomposition.
    #[serde(default)]
    linear_keys: bool,
    #[serde(default)]
    preprocess: Preprocess,
    k: usize,
    #[serde(default = "default_method")]
    method: Method,
    #[serde(default = "default_mean_subtract")]
    mean_subtract: bool,
    #[serde(default = "default_max_iterations")]
    max_iterations: usize,
    #[serde(default = "default_tolerance")]
    tolerance: f64,
    #[serde(default = "default_seed")]
    seed: u64,
    #[serde(default)]
    strategy: ReductionStrategy,
}

fn default_threads() -> usize {
    1
}
fn default_nkeys() -> usize {
    1
}
fn default_partitions() -> usize {
    8
}
fn default_method() -> Method {
    Method::Direct
}
fn default_mean_subtract() -> bool {
    true
}
fn default_max_iterations() -> usize {
    distmat::decomposition::DEFAULT_MAX_ITERATIONS
}
fn default_tolerance() -> f64 {
    distmat::decomposition::DEFAULT_TOLERANCE
}
fn default_seed() -> u64 {
    distmat::decomposition::DEFAULT_SEED
}

impl PipelineConfig {
    pub fn svd_config(&self) -> SvdConfig {
        let mut config = SvdConfig::new(self.k, self.method);
        config.mean_subtract = self.mean_subtract;
        config.max_iterations = self.max_iterations;
        config.tolerance = self.tolerance;
        config.seed = self.seed;
        config.strategy = self.strategy;
        config
    }
}

pub fn run_pipeline(config: &PipelineConfig) -> std::io::Result<()> {
    let level = match config.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    if let Err(why) = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build_global()
    {
        warn!("{:?}", why);
    }
    let data = load_dataset(&config.input_file, config.nkeys, config.partitions)?;
    let data = match config.linear_keys {
        true => linearize_keys(&data)?,
        false => data,
    };
    debug!("PREPROCESS\t{:?}", config.preprocess);
    let data = config.preprocess.run(&data);
    let svd_config = config.svd_config();
    let result = data.svd(&svd_config)?;
    info!(
        "RESULT\t{}\t{:?}\t{:?}",
        config.method,
        result.status,
        result.singular_values.as_slice()
    );
    let record = result.to_record(config.method);
    write_json(&record, config.output.as_deref())
}

/// Read a text file, one record per line. Empty lines are skipped.
pub fn load_dataset(path: &Path, nkeys: usize, partitions: usize) -> std::io::Result<KeyedDataset> {
    debug!("Opening {:?}", path);
    let reader = std::fs::File::open(path).map(BufReader::new)?;
    let mut records: Vec<Record> = vec![];
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_record(&line, nkeys) {
            Ok(record) => records.push(record),
            Err(why) => {
                error!("{}", why);
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, why));
            }
        }
    }
    debug!("LOAD\t{}\t{}", records.len(), partitions);
    Ok(KeyedDataset::from_records(records, partitions)?)
}

/// Replace coordinate keys by their linear indices, using the extents of the keys.
pub fn linearize_keys(data: &KeyedDataset) -> std::io::Result<KeyedDataset> {
    let dims = match data.dimensions() {
        Some(dims) => dims.max,
        None => return Ok(data.clone()),
    };
    debug!("DIMS\t{:?}", dims);
    Ok(data.to_linear_keys(&dims)?)
}

/// Read groups of linear indices, one group per line. Empty lines are skipped.
pub fn parse_groups(path: &Path) -> std::io::Result<Vec<HashSet<Key>>> {
    debug!("Opening {:?}", path);
    let reader = std::fs::File::open(path).map(BufReader::new)?;
    let mut groups = vec![];
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let group: Result<HashSet<_>, _> = line
            .split_whitespace()
            .map(|index| index.parse::<u64>().map(Key::Linear))
            .collect();
        match group {
            Ok(group) => groups.push(group),
            Err(why) => {
                let why = format!("line {} of {:?}: {}", i + 1, path, why);
                error!("{}", why);
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, why));
            }
        }
    }
    debug!("GROUPS\t{}", groups.len());
    Ok(groups)
}

/// Write `record` as JSON to `path`, or to the stdout if `path` is `None`.
pub fn write_json<T: Serialize>(record: &T, path: Option<&Path>) -> std::io::Result<()> {
    match path {
        Some(path) => {
            let mut wtr = std::fs::File::create(path).map(BufWriter::new)?;
            serde_json::ser::to_writer(&mut wtr, record)?;
            wtr.flush()
        }
        None => {
            let stdout = std::io::stdout();
            let mut wtr = BufWriter::new(stdout.lock());
            serde_json::ser::to_writer(&mut wtr, record)?;
            writeln!(wtr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn minimal_profile() {
        let profile = "input_file = \"data.txt\"\nk = 2\n";
        let config: PipelineConfig = toml::from_str(profile).unwrap();
        assert_eq!(config.nkeys, 1);
        assert_eq!(config.preprocess, Preprocess::Raw);
        assert_eq!(config.output, None);
        let svd = config.svd_config();
        assert_eq!(svd.k, 2);
        assert_eq!(svd.method, Method::Direct);
        assert_eq!(svd.strategy, ReductionStrategy::FoldCombine);
        assert!(svd.mean_subtract);
    }
    #[test]
    fn full_profile() {
        let profile = r#"
input_file = "data.txt"
output = "out.json"
verbose = 2
threads = 4
nkeys = 3
partitions = 16
linear_keys = true
preprocess = "dff-percentile"
k = 5
method = "em"
mean_subtract = false
max_iterations = 50
tolerance = 1e-8
seed = 7
strategy = "accum"
"#;
        let config: PipelineConfig = toml::from_str(profile).unwrap();
        assert_eq!(config.preprocess, Preprocess::DffPercentile);
        let svd = config.svd_config();
        assert_eq!(svd.method, Method::Em);
        assert_eq!(svd.max_iterations, 50);
        assert_eq!(svd.strategy, ReductionStrategy::SharedAccumulator);
        assert!(!svd.mean_subtract);
    }
    #[test]
    fn load_and_linearize() {
        let dir = std::env::temp_dir().join(format!("distmat_load_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("grid.txt");
        {
            let mut wtr = std::fs::File::create(&path).map(BufWriter::new).unwrap();
            for y in 1..=3 {
                for x in 1..=2 {
                    writeln!(wtr, "{} {} {} {}", x, y, x as f64 * 0.5, y as f64).unwrap();
                }
            }
            writeln!(wtr).unwrap();
        }
        let data = load_dataset(&path, 2, 4).unwrap();
        assert_eq!(data.shape(), (6, 2));
        let data = linearize_keys(&data).unwrap();
        let mut keys: Vec<_> = data.keys();
        keys.sort();
        let expected: Vec<_> = (1..=6).map(definitions::Key::Linear).collect();
        assert_eq!(keys, expected);
        std::fs::remove_dir_all(&dir).unwrap();
    }
    #[test]
    fn groups_of_indices() {
        let dir = std::env::temp_dir().join(format!("distmat_groups_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("groups.txt");
        std::fs::write(&path, "1 2\n\n4 5 6\n").unwrap();
        let groups = parse_groups(&path).unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups[1].contains(&Key::Linear(5)));
        // Averages over a 2 x 3 grid after linearization.
        let grid = dir.join("grid.txt");
        {
            let mut wtr = std::fs::File::create(&grid).map(BufWriter::new).unwrap();
            for y in 1..=3 {
                for x in 1..=2 {
                    writeln!(wtr, "{} {} {}", x, y, (x + 2 * (y - 1)) as f64).unwrap();
                }
            }
        }
        let data = linearize_keys(&load_dataset(&grid, 2, 3).unwrap()).unwrap();
        let averages = data.query(&groups);
        assert!((averages[0][0] - 1.5).abs() < 1e-10);
        assert!((averages[1][0] - 5.).abs() < 1e-10);
        std::fs::write(&path, "1 two\n").unwrap();
        assert!(parse_groups(&path).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
