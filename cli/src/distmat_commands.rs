use clap::{Arg, ArgAction, Command};

fn arg_verbose() -> Arg {
    Arg::new("verbose")
        .short('v')
        .action(ArgAction::Count)
        .help("Debug mode")
}

fn arg_threads() -> Arg {
    Arg::new("threads")
        .short('t')
        .long("threads")
        .default_value("1")
        .help("number of threads")
}

fn arg_input() -> Arg {
    Arg::new("input")
        .short('i')
        .long("input")
        .value_name("FILE")
        .required(true)
        .help("Text file. Each line is `<k1> ... <kn> <v1> <v2> ...`, separated by spaces.")
}

fn arg_nkeys() -> Arg {
    Arg::new("nkeys")
        .short('n')
        .long("nkeys")
        .default_value("1")
        .help("Number of key fields at the beginning of each line.")
}

fn arg_partitions() -> Arg {
    Arg::new("partitions")
        .short('p')
        .long("partitions")
        .default_value("8")
        .help("Number of partitions.")
}

fn arg_preprocess() -> Arg {
    Arg::new("preprocess")
        .long("preprocess")
        .default_value("raw")
        .value_parser([
            "raw",
            "sub",
            "dff",
            "dff-percentile",
            "dff-detrend",
            "dff-detrendnonlin",
            "dff-highpass",
        ])
        .help("Preprocessing applied to each vector.")
}

fn arg_output() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .value_name("PATH")
        .help("Output JSON file. If not given, write to the stdout.")
}

fn subcommand_svd() -> Command {
    Command::new("svd")
        .version("0.1")
        .about("Decompose the vectors and write the result as JSON.")
        .arg(arg_verbose())
        .arg(arg_threads())
        .arg(arg_input())
        .arg(arg_nkeys())
        .arg(arg_partitions())
        .arg(arg_preprocess())
        .arg(
            Arg::new("k")
                .short('k')
                .long("k")
                .default_value("3")
                .help("Number of components."),
        )
        .arg(
            Arg::new("method")
                .short('m')
                .long("method")
                .default_value("direct")
                .value_parser(["direct", "em"])
                .help("`direct` needs d x d matrices in memory. `em` only needs k x d."),
        )
        .arg(
            Arg::new("iterations")
                .long("iterations")
                .default_value("20")
                .help("Maximum number of iterations of the EM method."),
        )
        .arg(
            Arg::new("tol")
                .long("tol")
                .default_value("0.00001")
                .help("Tolerance of the EM method."),
        )
        .arg(
            Arg::new("no_center")
                .long("no_center")
                .action(ArgAction::SetTrue)
                .help("Do not subtract the mean of each vector."),
        )
        .arg(
            Arg::new("strategy")
                .short('s')
                .long("strategy")
                .default_value("reduce")
                .value_parser(["reduce", "accum"])
                .help("How the partial results are merged."),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .default_value("42")
                .help("Seed value for random number generators"),
        )
        .arg(arg_output())
}

fn subcommand_stats() -> Command {
    Command::new("stats")
        .version("0.1")
        .about("Write the shape, the key extents, and the mean of the vectors to the stdout.")
        .arg(arg_verbose())
        .arg(arg_threads())
        .arg(arg_input())
        .arg(arg_nkeys())
        .arg(arg_partitions())
}

fn subcommand_query() -> Command {
    Command::new("query")
        .version("0.1")
        .about("Average the vectors of each group of linear indices, and write the averages as JSON.")
        .arg(arg_verbose())
        .arg(arg_threads())
        .arg(arg_input())
        .arg(arg_nkeys())
        .arg(arg_partitions())
        .arg(arg_preprocess())
        .arg(
            Arg::new("groups")
                .short('g')
                .long("groups")
                .value_name("FILE")
                .required(true)
                .help("Text file. Each line is a group of linear indices, separated by spaces."),
        )
        .arg(arg_output())
}

fn subcommand_pipeline() -> Command {
    Command::new("pipeline")
        .version("0.1")
        .about("Run pipeline based on the given TOML file.")
        .arg(
            Arg::new("profile")
                .short('p')
                .required(true)
                .help("TOML configuration file."),
        )
}

pub fn distmat_parser() -> Command {
    Command::new("distmat")
        .version("0.1")
        .about("Distributed matrix computation and large-scale SVD")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(subcommand_svd())
        .subcommand(subcommand_stats())
        .subcommand(subcommand_query())
        .subcommand(subcommand_pipeline())
}
