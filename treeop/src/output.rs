//! Output formatting for CLI commands.
//!
//! Number, size, date and table rendering live here so the core stays free
//! of presentation concerns.

use std::collections::BTreeMap;

use chrono::DateTime;
use treeop_core::{FileRef, SizeBucket};

/// Seconds between the Windows epoch (1601-01-01) and the Unix epoch.
const WINDOWS_TO_UNIX_EPOCH: u64 = 11_644_473_600;

const SIZE_UNITS: [&str; 7] = ["bytes", "kB", "MB", "GB", "TB", "PB", "EB"];

/// Parse a size with an optional binary suffix (k/M/G/T/P/E, powers of 1024).
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size value".to_string());
    }
    let (digits, factor) = match s.chars().last() {
        Some('k') | Some('K') => (&s[..s.len() - 1], 1u64 << 10),
        Some('M') => (&s[..s.len() - 1], 1u64 << 20),
        Some('G') => (&s[..s.len() - 1], 1u64 << 30),
        Some('T') => (&s[..s.len() - 1], 1u64 << 40),
        Some('P') => (&s[..s.len() - 1], 1u64 << 50),
        Some('E') => (&s[..s.len() - 1], 1u64 << 60),
        _ => (s, 1u64),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size value '{s}'"))?;
    value
        .checked_mul(factor)
        .ok_or_else(|| format!("size value '{s}' is out of range"))
}

/// Format a byte count with a binary unit, e.g. "1.500 kB".
///
/// Plain byte counts keep no decimals; zero renders as "0".
pub fn format_size(bytes: u64, precision: usize) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    let mut value = bytes as f64;
    let mut whole = bytes;
    let mut unit = 0;
    while whole >= 1024 && unit + 1 < SIZE_UNITS.len() {
        whole >>= 10;
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, SIZE_UNITS[0])
    } else {
        format!("{value:.precision$} {}", SIZE_UNITS[unit])
    }
}

/// Format a fractional byte count (e.g. sidecar bytes per file).
pub fn format_size_f64(bytes: f64, precision: usize) -> String {
    if bytes <= 0.0 {
        return "0".to_string();
    }
    let mut value = bytes;
    let mut whole = bytes as u64;
    let mut unit = 0;
    while whole >= 1024 && unit + 1 < SIZE_UNITS.len() {
        whole >>= 10;
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.precision$} {}", SIZE_UNITS[unit])
}

/// Format a percentage with one decimal, e.g. "12.5%".
pub fn format_percent(percent: f64) -> String {
    format!("{percent:.1}%")
}

/// Percentage of `part` in `total`, tolerating an empty total.
pub fn percent_of(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * part as f64 / total as f64
    }
}

/// Format a hashing rate in MB/s.
pub fn format_rate_mb(bytes_per_sec: f64) -> String {
    format!("{:.1}MB/s", bytes_per_sec / (1024.0 * 1024.0))
}

/// Format an elapsed time, e.g. "9.3s", "2m 03s", "1h 02m".
pub fn format_seconds(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{seconds:.1}s");
    }
    let total = seconds as u64;
    if total < 3600 {
        return format!("{}m {:02}s", total / 60, total % 60);
    }
    format!("{}h {:02}m", total / 3600, (total % 3600) / 60)
}

/// Render a FILETIME timestamp as "YYYY-MM-DD HH:MM:SS" UTC.
///
/// Zero and pre-Unix-epoch values render as "0000-00-00 00:00:00".
pub fn format_file_time(file_time: u64) -> String {
    const ZERO: &str = "0000-00-00 00:00:00";
    if file_time == 0 {
        return ZERO.to_string();
    }
    let seconds = file_time / 10_000_000;
    if seconds < WINDOWS_TO_UNIX_EPOCH {
        return ZERO.to_string();
    }
    let unix = (seconds - WINDOWS_TO_UNIX_EPOCH) as i64;
    match DateTime::from_timestamp(unix, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ZERO.to_string(),
    }
}

/// One row of an aligned statistics list.
#[derive(Debug, Clone)]
pub struct StatLine {
    pub label: String,
    pub value: String,
    pub extra: String,
}

impl StatLine {
    pub fn new(label: &str, value: String) -> Self {
        StatLine {
            label: label.to_string(),
            value,
            extra: String::new(),
        }
    }

    pub fn with_extra(label: &str, value: String, extra: String) -> Self {
        StatLine {
            label: label.to_string(),
            value,
            extra,
        }
    }
}

/// Column position of the decimal point in a value like "1.234 kB".
fn decimal_pos(value: &str) -> usize {
    let number = value.split(' ').next().unwrap_or(value);
    number.find('.').unwrap_or(number.len())
}

/// Render labeled values with labels padded and numbers aligned on the
/// decimal point, extras (percentages) in a trailing column.
pub fn render_stat_list(lines: &[StatLine]) -> Vec<String> {
    let label_width = lines.iter().map(|l| l.label.len()).max().unwrap_or(0);
    let value_decimal = lines.iter().map(|l| decimal_pos(&l.value)).max().unwrap_or(0);
    let extra_decimal = lines
        .iter()
        .filter(|l| !l.extra.is_empty())
        .map(|l| decimal_pos(&l.extra))
        .max()
        .unwrap_or(0);

    let aligned_values: Vec<String> = lines
        .iter()
        .map(|l| {
            let pad = value_decimal.saturating_sub(decimal_pos(&l.value));
            format!("{}{}", " ".repeat(pad), l.value)
        })
        .collect();
    let value_width = aligned_values.iter().map(|v| v.len()).max().unwrap_or(0);

    lines
        .iter()
        .zip(&aligned_values)
        .map(|(line, value)| {
            let mut out = format!("{:label_width$} {value}", line.label);
            if !line.extra.is_empty() {
                let pad = value_width - value.len();
                let extra_pad = extra_decimal.saturating_sub(decimal_pos(&line.extra));
                out.push_str(&" ".repeat(pad + 1 + extra_pad));
                out.push_str(&line.extra);
            }
            out
        })
        .collect()
}

/// Render file rows: size, hash prefix, optional inode, date, optional
/// link count, path, with every column right-aligned except the path.
pub fn render_file_list(
    refs: &[(Option<String>, &FileRef)],
    show_inode_links: bool,
    hash_len: usize,
) -> Vec<String> {
    struct Row {
        size: String,
        hash: String,
        inode: String,
        date: String,
        links: String,
        path: String,
    }

    let rows: Vec<Row> = refs
        .iter()
        .map(|(label, r)| {
            let hex = r.hash.to_hex();
            let path = r.path.display().to_string();
            Row {
                size: r.size.to_string(),
                hash: hex[..hash_len.min(hex.len())].to_string(),
                inode: r.inode.to_string(),
                date: format_file_time(r.date),
                links: r.num_links.to_string(),
                path: match label {
                    Some(label) => format!("{label}{path}"),
                    None => path,
                },
            }
        })
        .collect();

    let width = |f: fn(&Row) -> usize| rows.iter().map(f).max().unwrap_or(0);
    let w_size = width(|r| r.size.len());
    let w_hash = width(|r| r.hash.len());
    let w_inode = width(|r| r.inode.len());
    let w_date = width(|r| r.date.len());
    let w_links = width(|r| r.links.len());

    rows.iter()
        .map(|row| {
            let mut out = format!("{:>w_size$} {:>w_hash$} ", row.size, row.hash);
            if show_inode_links {
                out.push_str(&format!("{:>w_inode$} ", row.inode));
            }
            out.push_str(&format!("{:>w_date$} ", row.date));
            if show_inode_links {
                out.push_str(&format!("{:>w_links$} ", row.links));
            }
            out.push_str(&row.path);
            out
        })
        .collect()
}

/// Histogram axis unit derived from the bucket width.
fn histogram_unit(batch: u64) -> (u64, &'static str) {
    let mut factor = 1u64;
    let mut unit = 0;
    let mut size = batch;
    while size >= 1024 && unit + 1 < SIZE_UNITS.len() {
        size >>= 10;
        factor <<= 10;
        unit += 1;
    }
    (factor, SIZE_UNITS[unit])
}

/// Render the size histogram: one line per bucket from zero to the largest
/// occupied bucket. Verbosity 1 adds the range end, verbosity 2 a bar chart.
pub fn render_histogram(
    buckets: &BTreeMap<u64, SizeBucket>,
    batch: u64,
    verbose: u8,
) -> Vec<String> {
    let Some(max_start) = buckets.keys().next_back().copied() else {
        return Vec::new();
    };
    let (factor, unit) = histogram_unit(batch);
    let show_end = verbose > 0;
    let show_bar = verbose > 1;

    let starts: Vec<u64> = (0..=max_start / batch).map(|i| i * batch).collect();
    let w_start = starts
        .iter()
        .map(|s| (s / factor).to_string().len())
        .max()
        .unwrap_or(1);
    let w_end = ((max_start + batch) / factor).to_string().len();
    let empty = SizeBucket::default();
    let w_count = starts
        .iter()
        .map(|s| buckets.get(s).unwrap_or(&empty).count.to_string().len())
        .max()
        .unwrap_or(1);
    let totals: Vec<String> = starts
        .iter()
        .map(|s| format_size(buckets.get(s).unwrap_or(&empty).total_size, 3))
        .collect();
    let w_total = totals.iter().map(|t| t.len()).max().unwrap_or(1);
    let max_total = starts
        .iter()
        .map(|s| buckets.get(s).unwrap_or(&empty).total_size)
        .max()
        .unwrap_or(0);

    starts
        .iter()
        .zip(&totals)
        .map(|(start, total)| {
            let bucket = buckets.get(start).unwrap_or(&empty);
            let range = if show_end {
                format!(
                    "{:>w_start$} {unit}..{:>w_end$} {unit}:",
                    start / factor,
                    (start + batch) / factor
                )
            } else {
                format!("{:>w_start$} {unit}:", start / factor)
            };
            let mut line = format!("{range} {:>w_count$} {total:>w_total$}", bucket.count);
            if show_bar && max_total > 0 {
                let available = 79usize.saturating_sub(line.len() + 1);
                let mut bar_len =
                    ((bucket.total_size as u128 * available as u128) / max_total as u128) as usize;
                if bucket.total_size > 0 && bar_len == 0 {
                    bar_len = 1;
                }
                line.push(' ');
                line.push_str(&"#".repeat(bar_len));
            }
            line
        })
        .collect()
}

/// Shorten a path to `max_len` characters, keeping the tail.
pub fn abbreviate_path(path: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }
    if path.len() <= max_len {
        return path.to_string();
    }
    if max_len <= 3 {
        return path[path.len() - max_len..].to_string();
    }
    format!("...{}", &path[path.len() - (max_len - 3)..])
}
