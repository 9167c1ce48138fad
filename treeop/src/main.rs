//! treeop - Operations on huge directory trees.

mod output;
mod progress_term;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Instant;

use treeop_core::{paths, walk, LoadMode, MainDb, ProgressSink, ReadBenchStats};

use output::{
    format_percent, format_rate_mb, format_seconds, format_size, format_size_f64, parse_size,
    percent_of, render_file_list, render_histogram, render_stat_list, StatLine,
};
use progress_term::TermProgress;

/// Operations on huge directory trees.
#[derive(Parser, Debug)]
#[command(name = "treeop")]
#[command(about = "Operations on huge directory trees", version)]
#[command(
    after_help = "All sizes may be specified with kMGTPE suffixes indicating powers of 1024."
)]
struct Cli {
    /// Determine the intersection of the given dirs. Print statistics
    /// (bytes/files) for files unique to one dir and files shared between
    /// dirs.
    #[arg(short = 'i', long)]
    intersect: bool,

    /// Print statistics about each dir (number of files and total size etc).
    #[arg(short = 's', long)]
    stats: bool,

    /// List all files with stored meta-data.
    #[arg(short = 'l', long)]
    list_files: bool,

    /// List files only in A when used with --intersect.
    #[arg(long)]
    list_a: bool,

    /// List files only in B when used with --intersect.
    #[arg(long)]
    list_b: bool,

    /// List files in both A and B when used with --intersect.
    #[arg(long)]
    list_both: bool,

    /// Extract files only in A into DIR when used with --intersect.
    #[arg(long, value_name = "DIR")]
    extract_a: Option<PathBuf>,

    /// Extract files only in B into DIR when used with --intersect.
    #[arg(long, value_name = "DIR")]
    extract_b: Option<PathBuf>,

    /// Delete duplicates from later dirs, keeping the first dir's copies.
    #[arg(long)]
    remove_copies: bool,

    /// Replace duplicates with hardlinks to the oldest copy.
    #[arg(long)]
    hardlink_copies: bool,

    /// Treat files as identical only when their names also match.
    #[arg(long)]
    same_filename: bool,

    /// Measure raw read throughput; mutually exclusive with everything else.
    #[arg(long)]
    readbench: bool,

    /// Read buffer size for hashing and readbench.
    #[arg(long, value_name = "N", default_value = "1M", value_parser = parse_size)]
    bufsize: u64,

    /// Minimum file size considered by --hardlink-copies.
    #[arg(long, value_name = "N", default_value = "0", value_parser = parse_size)]
    min_size: u64,

    /// Refuse to add more links to a target with this many existing links.
    #[arg(long, value_name = "N", default_value = "60000", value_parser = parse_size)]
    max_hardlinks: u64,

    /// Print intended changes without modifying anything.
    #[arg(long)]
    dry_run: bool,

    /// Force creation of new .dirdb files (overwrite existing).
    #[arg(long)]
    new_dirdb: bool,

    /// Update .dirdb files, reusing hashes when inode/size/mtime match.
    #[arg(short = 'u', long)]
    update_dirdb: bool,

    /// Recursively remove all .dirdb files under specified dirs.
    #[arg(long)]
    remove_dirdb: bool,

    /// Calculate the minimum hash length in bits that makes all file
    /// contents unique.
    #[arg(long)]
    get_unique_hash_len: bool,

    /// Print size histogram for all files where N is the bucket size in
    /// bytes.
    #[arg(long, value_name = "N", value_parser = parse_size)]
    size_histogram: Option<u64>,

    /// Maximum file size to include in the size histogram.
    #[arg(long, value_name = "N", value_parser = parse_size)]
    max_size: Option<u64>,

    /// Print progress once per second. Specify twice for one line per
    /// update.
    #[arg(short = 'p', long, action = ArgAction::Count)]
    progress: u8,

    /// Max width for progress line.
    #[arg(short = 'W', long, value_name = "N", default_value_t = 199)]
    width: usize,

    /// Increase verbosity. Specify multiple times to be more verbose.
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Directories to operate on.
    #[arg(required = true, value_name = "DIR")]
    dirs: Vec<PathBuf>,
}

impl Cli {
    /// Whether any operation besides the implicit default was requested.
    fn has_operation(&self) -> bool {
        self.stats
            || self.list_files
            || self.size_histogram.is_some()
            || self.remove_dirdb
            || self.intersect
            || self.update_dirdb
            || self.list_a
            || self.list_b
            || self.list_both
            || self.extract_a.is_some()
            || self.extract_b.is_some()
            || self.get_unique_hash_len
            || self.remove_copies
            || self.hardlink_copies
            || self.readbench
    }

    fn show_stats(&self) -> bool {
        self.stats || !self.has_operation()
    }
}

fn validate(cli: &Cli) -> Result<()> {
    if cli.new_dirdb && cli.update_dirdb {
        bail!("Cannot combine --new-dirdb with --update-dirdb.");
    }
    if cli.readbench
        && (cli.intersect
            || cli.stats
            || cli.list_files
            || cli.list_a
            || cli.list_b
            || cli.list_both
            || cli.extract_a.is_some()
            || cli.extract_b.is_some()
            || cli.remove_copies
            || cli.hardlink_copies
            || cli.same_filename
            || cli.new_dirdb
            || cli.update_dirdb
            || cli.remove_dirdb
            || cli.get_unique_hash_len
            || cli.size_histogram.is_some())
    {
        bail!("--readbench cannot be combined with other operations.");
    }
    if (cli.list_a || cli.list_b || cli.list_both) && !cli.intersect {
        bail!("--list-a/--list-b/--list-both require --intersect.");
    }
    if (cli.extract_a.is_some() || cli.extract_b.is_some()) && !cli.intersect {
        bail!("--extract-a/--extract-b require --intersect.");
    }
    if cli.remove_copies && !cli.intersect {
        bail!("--remove-copies requires --intersect.");
    }
    if cli.intersect && cli.dirs.len() < 2 {
        bail!("--intersect requires at least two directories.");
    }
    let two_dir_ops = cli.list_a
        || cli.list_b
        || cli.list_both
        || cli.extract_a.is_some()
        || cli.extract_b.is_some();
    if two_dir_ops && cli.dirs.len() != 2 {
        bail!("--list-a/--list-b/--list-both/--extract-a/--extract-b require exactly two directories.");
    }
    if cli.dry_run
        && !(cli.remove_copies
            || cli.hardlink_copies
            || cli.remove_dirdb
            || cli.extract_a.is_some()
            || cli.extract_b.is_some())
    {
        bail!("--dry-run requires a mutating operation.");
    }
    if cli.bufsize == 0 {
        bail!("--bufsize must be greater than 0.");
    }
    if cli.size_histogram == Some(0) {
        bail!("--size-histogram bucket size must be greater than 0.");
    }

    for dir in &cli.dirs {
        if !dir.exists() {
            bail!("Path '{}' does not exist.", dir.display());
        }
        if !dir.is_dir() {
            bail!("Path '{}' is not a directory.", dir.display());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    validate(&cli)?;
    let buf_size = cli.bufsize as usize;
    let mut progress = TermProgress::new(cli.progress, cli.width, cli.verbose);

    if cli.readbench {
        cmd_readbench(&cli, buf_size, &mut progress)?;
    } else if cli.remove_dirdb {
        cmd_remove_dirdb(&cli, &mut progress)?;
    } else {
        let roots: Vec<PathBuf> = cli.dirs.iter().map(|d| paths::normalize_path(d)).collect();
        let mode = if cli.new_dirdb {
            LoadMode::ForceCreate
        } else if cli.update_dirdb {
            LoadMode::Update
        } else {
            LoadMode::Read
        };

        let mut db = MainDb::new(roots.clone(), cli.same_filename);
        for root in &roots {
            let start = Instant::now();
            let dirs = walk::process_tree(root, mode, buf_size, &mut progress)
                .with_context(|| format!("Failed to process {}", root.display()))?;
            db.add_dirs(dirs);
            db.set_root_elapsed(root, start.elapsed().as_secs_f64());
        }
        progress.finish();

        if cli.intersect {
            cmd_intersect(&cli, &db)?;
            if cli.remove_copies {
                cmd_remove_copies(&cli, &mut db, buf_size, &mut progress)?;
            }
        } else {
            if cli.show_stats() {
                cmd_stats(&db);
            }
            if let Some(batch) = cli.size_histogram {
                for line in render_histogram(&db.size_histogram(batch, cli.max_size), batch, cli.verbose) {
                    println!("{line}");
                }
            }
            if cli.list_files {
                cmd_list_files(&cli, &db);
            }
            if cli.get_unique_hash_len {
                println!("unique-hash-len: {}", db.min_unique_bits());
            }
        }

        if cli.hardlink_copies {
            cmd_hardlink_copies(&cli, &mut db, buf_size, &mut progress)?;
        }
    }

    if cli.verbose > 0 {
        println!("Done.");
    }
    Ok(())
}

fn cmd_stats(db: &MainDb) {
    for stats in db.root_stats() {
        let mut lines = vec![
            StatLine::new("files:", stats.file_count.to_string()),
            StatLine::new("dirs:", stats.dir_count.to_string()),
            StatLine::new("total-size:", format_size(stats.total_size, 3)),
            StatLine::with_extra(
                "redundant-files:",
                stats.redundant_files.to_string(),
                format!(
                    "({})",
                    format_percent(percent_of(stats.redundant_files, stats.file_count))
                ),
            ),
            StatLine::with_extra(
                "redundant-size:",
                format_size(stats.redundant_size, 3),
                format!(
                    "({})",
                    format_percent(percent_of(stats.redundant_size, stats.total_size))
                ),
            ),
            StatLine::with_extra(
                "dirdb-size:",
                format_size(stats.db_size, 3),
                format!(
                    "({})",
                    format_percent(percent_of(stats.db_size, stats.total_size))
                ),
            ),
            StatLine::new(
                "dirdb-bytes-per-file:",
                format_size_f64(
                    if stats.file_count == 0 {
                        0.0
                    } else {
                        stats.db_size as f64 / stats.file_count as f64
                    },
                    1,
                ),
            ),
        ];
        if stats.hashed_bytes > 0 && stats.hash_seconds > 0.0 {
            lines.push(StatLine::new("hash-size:", format_size(stats.hashed_bytes, 3)));
            lines.push(StatLine::new(
                "hash-rate:",
                format_rate_mb(stats.hashed_bytes as f64 / stats.hash_seconds),
            ));
        }
        if stats.elapsed_seconds > 0.0 {
            lines.push(StatLine::new("elapsed:", format_seconds(stats.elapsed_seconds)));
        }
        println!("{}", stats.path.display());
        for line in render_stat_list(&lines) {
            println!("{line}");
        }
    }
}

fn cmd_intersect(cli: &Cli, db: &MainDb) -> Result<()> {
    let stats = db.intersect();

    if stats.per_root.len() == 2 {
        let a = &stats.per_root[0];
        let b = &stats.per_root[1];
        println!("A: {}", a.path.display());
        println!("B: {}", b.path.display());
        let pct = |part: u64, total: u64, root: &str| {
            format!("({} of {root})", format_percent(percent_of(part, total)))
        };
        let lines = vec![
            StatLine::with_extra(
                "only-A-files:",
                a.unique_files.to_string(),
                pct(a.unique_files, a.total_files(), "A"),
            ),
            StatLine::with_extra(
                "only-A-size:",
                format_size(a.unique_bytes, 3),
                pct(a.unique_bytes, a.total_bytes(), "A"),
            ),
            StatLine::with_extra(
                "both-A-files:",
                a.shared_files.to_string(),
                pct(a.shared_files, a.total_files(), "A"),
            ),
            StatLine::with_extra(
                "both-A-size:",
                format_size(a.shared_bytes, 3),
                pct(a.shared_bytes, a.total_bytes(), "A"),
            ),
            StatLine::with_extra(
                "both-B-files:",
                b.shared_files.to_string(),
                pct(b.shared_files, b.total_files(), "B"),
            ),
            StatLine::with_extra(
                "both-B-size:",
                format_size(b.shared_bytes, 3),
                pct(b.shared_bytes, b.total_bytes(), "B"),
            ),
            StatLine::with_extra(
                "only-B-files:",
                b.unique_files.to_string(),
                pct(b.unique_files, b.total_files(), "B"),
            ),
            StatLine::with_extra(
                "only-B-size:",
                format_size(b.unique_bytes, 3),
                pct(b.unique_bytes, b.total_bytes(), "B"),
            ),
        ];
        for line in render_stat_list(&lines) {
            println!("{line}");
        }
    } else {
        for root in &stats.per_root {
            println!("{}", root.path.display());
            let lines = vec![
                StatLine::with_extra(
                    "unique-files:",
                    root.unique_files.to_string(),
                    format!(
                        "({})",
                        format_percent(percent_of(root.unique_files, root.total_files()))
                    ),
                ),
                StatLine::with_extra(
                    "unique-size:",
                    format_size(root.unique_bytes, 3),
                    format!(
                        "({})",
                        format_percent(percent_of(root.unique_bytes, root.total_bytes()))
                    ),
                ),
                StatLine::with_extra(
                    "shared-files:",
                    root.shared_files.to_string(),
                    format!(
                        "({})",
                        format_percent(percent_of(root.shared_files, root.total_files()))
                    ),
                ),
                StatLine::with_extra(
                    "shared-size:",
                    format_size(root.shared_bytes, 3),
                    format!(
                        "({})",
                        format_percent(percent_of(root.shared_bytes, root.total_bytes()))
                    ),
                ),
            ];
            for line in render_stat_list(&lines) {
                println!("{line}");
            }
        }
        println!("total");
        let lines = vec![
            StatLine::new("unique-files:", stats.total_unique_files.to_string()),
            StatLine::new("unique-size:", format_size(stats.total_unique_bytes, 3)),
            StatLine::new("shared-files:", stats.total_shared_files.to_string()),
            StatLine::new("shared-size:", format_size(stats.total_shared_bytes, 3)),
        ];
        for line in render_stat_list(&lines) {
            println!("{line}");
        }
    }

    let hash_len = if cli.verbose > 0 && (cli.list_a || cli.list_b || cli.list_both) {
        db.unique_hex_len()
    } else {
        0
    };

    if cli.list_a {
        println!("only-in-A:");
        print_refs(&db.files_only_in(0, 1), cli.verbose, hash_len, None);
    }
    if cli.list_b {
        println!("only-in-B:");
        print_refs(&db.files_only_in(1, 0), cli.verbose, hash_len, None);
    }
    if cli.list_both {
        println!("in-both:");
        let tagged = db.files_in_both(0, 1);
        let labels = ["A: ", "B: "];
        if cli.verbose > 0 {
            let rows: Vec<_> = tagged
                .iter()
                .map(|(tag, r)| (Some(labels[*tag].to_string()), r))
                .collect();
            for line in render_file_list(&rows, cli.verbose > 1, hash_len) {
                println!("{line}");
            }
        } else {
            for (tag, r) in &tagged {
                println!("{}{}", labels[*tag], r.path.display());
            }
        }
    }

    if let Some(dest) = &cli.extract_a {
        cmd_extract(cli, db, 0, 1, dest)?;
    }
    if let Some(dest) = &cli.extract_b {
        cmd_extract(cli, db, 1, 0, dest)?;
    }
    Ok(())
}

fn print_refs(
    refs: &[treeop_core::FileRef],
    verbose: u8,
    hash_len: usize,
    label: Option<&str>,
) {
    if verbose > 0 {
        let rows: Vec<_> = refs
            .iter()
            .map(|r| (label.map(|l| l.to_string()), r))
            .collect();
        for line in render_file_list(&rows, verbose > 1, hash_len) {
            println!("{line}");
        }
    } else {
        for r in refs {
            match label {
                Some(label) => println!("{label}{}", r.path.display()),
                None => println!("{}", r.path.display()),
            }
        }
    }
}

fn cmd_list_files(cli: &Cli, db: &MainDb) {
    let refs = db.all_files();
    let hash_len = db.unique_hex_len();
    let rows: Vec<_> = refs.iter().map(|r| (None, r)).collect();
    for line in render_file_list(&rows, cli.verbose > 1, hash_len) {
        println!("{line}");
    }
}

fn cmd_extract(cli: &Cli, db: &MainDb, src: usize, other: usize, dest: &PathBuf) -> Result<()> {
    let dest = paths::normalize_path(dest);
    let stats = db
        .extract_unique(src, other, &dest, cli.dry_run)
        .with_context(|| format!("Failed to extract into {}", dest.display()))?;
    for (from, to) in &stats.copies {
        if cli.dry_run {
            println!("Would copy {} -> {}", from.display(), to.display());
        } else if cli.verbose > 0 {
            println!("Copied {} -> {}", from.display(), to.display());
        }
    }
    Ok(())
}

fn cmd_remove_copies(
    cli: &Cli,
    db: &mut MainDb,
    buf_size: usize,
    progress: &mut TermProgress,
) -> Result<()> {
    let stats = db
        .remove_copies(cli.dry_run, buf_size, progress)
        .context("Failed to remove duplicate files")?;
    progress.finish();
    for path in &stats.removed {
        if cli.dry_run {
            println!("Would remove {}", path.display());
        } else if cli.verbose > 0 {
            println!("Removed {}", path.display());
        }
    }
    let lines = vec![
        StatLine::new("removed-files:", stats.removed_files.to_string()),
        StatLine::new("removed-size:", format_size(stats.removed_bytes, 3)),
    ];
    for line in render_stat_list(&lines) {
        println!("{line}");
    }
    Ok(())
}

fn cmd_hardlink_copies(
    cli: &Cli,
    db: &mut MainDb,
    buf_size: usize,
    progress: &mut TermProgress,
) -> Result<()> {
    let stats = db
        .hardlink_copies(
            cli.min_size,
            cli.max_hardlinks,
            cli.dry_run,
            buf_size,
            progress,
        )
        .context("Failed to replace duplicates with hardlinks")?;
    progress.finish();
    for (replaced, target) in &stats.replacements {
        if cli.dry_run {
            println!(
                "Would replace {} with link to {}",
                replaced.display(),
                target.display()
            );
        } else if cli.verbose > 0 {
            println!(
                "Replaced {} with link to {}",
                replaced.display(),
                target.display()
            );
        }
    }
    let lines = vec![
        StatLine::new("created-links:", stats.created_links.to_string()),
        StatLine::new("removed-size:", format_size(stats.removed_bytes, 3)),
    ];
    for line in render_stat_list(&lines) {
        println!("{line}");
    }
    Ok(())
}

fn cmd_readbench(cli: &Cli, buf_size: usize, progress: &mut TermProgress) -> Result<()> {
    let mut total = ReadBenchStats::default();
    for dir in &cli.dirs {
        let root = paths::normalize_path(dir);
        let stats = treeop_core::readbench::read_tree(&root, buf_size, progress)
            .with_context(|| format!("Failed to read {}", root.display()))?;
        total.add(&stats);
    }
    progress.finish();

    let rate = if total.seconds > 0.0 {
        total.bytes as f64 / total.seconds
    } else {
        0.0
    };
    let lines = vec![
        StatLine::new("files:", total.files.to_string()),
        StatLine::new("dirs:", total.dirs.to_string()),
        StatLine::new("read-size:", format_size(total.bytes, 3)),
        StatLine::new("elapsed:", format_seconds(total.seconds)),
        StatLine::new("read-rate:", format_rate_mb(rate)),
    ];
    for line in render_stat_list(&lines) {
        println!("{line}");
    }
    Ok(())
}

fn cmd_remove_dirdb(cli: &Cli, progress: &mut TermProgress) -> Result<()> {
    for dir in &cli.dirs {
        let root = paths::normalize_path(dir);
        let removed = walk::remove_sidecars(&root, cli.dry_run, progress)
            .with_context(|| format!("Failed to remove sidecars under {}", root.display()))?;
        for path in removed {
            if cli.dry_run {
                println!("Would remove {}", path.display());
            } else if cli.verbose > 0 {
                println!("Removed {}", path.display());
            }
        }
    }
    Ok(())
}
