use std::fs;
use std::path::Path;
use std::process;

use clap::ArgEnum;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use runsort::{
    BufferPool, ExternalSorterBuilder, Record, RecordCursor, RecordWriter, SortError,
};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let records_per_block: usize = arg_parser.value_of_t_or_exit("records_per_block");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");

    let input = arg_parser.value_of("input").expect("value is required");
    let output = arg_parser.value_of("output").unwrap_or(input);

    if let Some(count) = arg_parser
        .is_present("gen")
        .then(|| arg_parser.value_of_t_or_exit::<u64>("gen"))
    {
        let seed: Option<u64> = arg_parser
            .is_present("seed")
            .then(|| arg_parser.value_of_t_or_exit("seed"));
        if let Err(err) = generate_records(Path::new(input), count, seed, records_per_block) {
            log::error!("input file generation error: {}", err);
            process::exit(1);
        }
        log::info!("generated {} records into {}", count, input);
    }

    let mut sorter_builder = ExternalSorterBuilder::new().with_records_per_block(records_per_block);
    if let Some(tmp_dir) = tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(Path::new(tmp_dir));
    }

    let sorter = match sorter_builder.build() {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let summary = match sorter.sort_file(Path::new(input), Path::new(output)) {
        Ok(summary) => summary,
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    };
    log::info!(
        "sorted {} records: {} runs, {} merge passes",
        summary.records,
        summary.runs,
        summary.merge_passes
    );

    if arg_parser.is_present("check") {
        match verify_sorted(Path::new(output), records_per_block) {
            Ok(true) => log::info!("output is sorted"),
            Ok(false) => {
                log::error!("output is NOT sorted");
                process::exit(1);
            }
            Err(err) => {
                log::error!("output verification error: {}", err);
                process::exit(1);
            }
        }
    }
}

/// Populates `path` with `count` random records.
fn generate_records(
    path: &Path,
    count: u64,
    seed: Option<u64>,
    records_per_block: usize,
) -> Result<(), SortError> {
    let file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|source| SortError::Open {
            path: path.into(),
            source,
        })?;

    let mut rng: StdRng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut writer = RecordWriter::new(BufferPool::new(file, records_per_block), 0);
    for id in 0..count {
        writer.put_record(Record::new(id as i64, rng.gen_range(0.0..1e9)))?;
    }
    return writer.finish();
}

/// Checks that the keys of `path` are in ascending order.
fn verify_sorted(path: &Path, records_per_block: usize) -> Result<bool, SortError> {
    let file = fs::File::open(path).map_err(|source| SortError::Open {
        path: path.into(),
        source,
    })?;
    let file_len = file.metadata().map_err(SortError::Io)?.len();

    let mut cursor = RecordCursor::new(BufferPool::new(file, records_per_block), 0, file_len);
    let mut previous: Option<Record> = None;
    while let Some(record) = cursor.next_record()? {
        if let Some(previous) = previous {
            if previous.key().total_cmp(&record.key()).is_gt() {
                return Ok(false);
            }
        }
        previous = Some(record);
    }
    return Ok(true);
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("runsort")
        .about("external sorter for fixed-length binary records")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file (defaults to sorting the input in place)")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("records_per_block")
                .short('b')
                .long("records-per-block")
                .help("block size in records")
                .takes_value(true)
                .default_value("512")
                .validator(|v| match v.parse::<usize>() {
                    Ok(n) if n > 0 => Ok(()),
                    Ok(_) => Err("block size must be at least 1 record".to_string()),
                    Err(err) => Err(format!("block size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("gen")
                .long("gen")
                .help("populate the input file with this many random records first")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("seed")
                .long("seed")
                .help("random seed for --gen")
                .takes_value(true)
                .requires("gen"),
        )
        .arg(
            clap::Arg::new("check")
                .long("check")
                .help("verify that the output is sorted")
                .takes_value(false),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
