//! Latency statistics from subscriber sidecar files.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use crate::error::CollectorError;

pub const STATISTICS_FILE: &str = "latency_statistics.csv";
const STATISTICS_HEADER: &str = "topic,run,count,mean_ms,median_ms,min_ms,max_ms,std_dev_ms";

#[derive(Debug, Clone, PartialEq)]
pub struct LatencyStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation; `None` below two samples.
    pub std_dev: Option<f64>,
}

impl LatencyStats {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        let std_dev = (n > 1).then(|| {
            let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        });

        Some(Self {
            count: n,
            mean,
            median,
            min: sorted[0],
            max: sorted[n - 1],
            std_dev,
        })
    }
}

/// Latency samples of one run, keyed by `{file_topic}-{message_topic}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencySet {
    pub groups: BTreeMap<String, Vec<f64>>,
}

impl LatencySet {
    /// Load every `*.latency.csv` in `dir`, in file-name order.
    pub fn load(dir: &Path) -> Result<Self, CollectorError> {
        let entries = std::fs::read_dir(dir).map_err(|e| CollectorError::io(dir, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CollectorError::io(dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".latency.csv") {
                files.push((name, entry.path()));
            }
        }
        if files.is_empty() {
            return Err(CollectorError::NoLatencyData(dir.to_path_buf()));
        }
        files.sort();

        let mut set = LatencySet::default();
        for (name, path) in files {
            let text = std::fs::read_to_string(&path).map_err(|e| CollectorError::io(&path, e))?;
            let rows = set.add_file(&name, &text);
            tracing::info!(file = %name, rows, "latency samples loaded");
        }
        Ok(set)
    }

    /// Add one sidecar's rows; returns how many were usable.
    pub fn add_file(&mut self, file_name: &str, text: &str) -> usize {
        let file_topic = file_topic(file_name);
        let mut added = 0;
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() || (n == 0 && line.starts_with("timestamp,")) {
                continue;
            }
            match parse_row(line) {
                Some((topic, latency)) => {
                    self.groups.entry(format!("{file_topic}-{topic}")).or_default().push(latency);
                    added += 1;
                }
                None => tracing::warn!(file = %file_name, line = n + 1, "malformed latency row skipped"),
            }
        }
        added
    }

    pub fn statistics(&self) -> BTreeMap<&str, LatencyStats> {
        self.groups
            .iter()
            .filter_map(|(k, v)| LatencyStats::from_samples(v).map(|s| (k.as_str(), s)))
            .collect()
    }
}

/// `subscriber-<topic>-<n>.latency.csv` → `<topic>`, else `unknown`.
pub fn file_topic(file_name: &str) -> &str {
    let Some(start) = file_name.find("subscriber-") else {
        return "unknown";
    };
    let rest = &file_name[start + "subscriber-".len()..];
    for (i, _) in rest.match_indices('-') {
        let tail = &rest[i + 1..];
        let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
        let after = &tail[digits..];
        if digits > 0 && (after.starts_with(".latency.csv") || after.starts_with(".latency.log")) {
            return &rest[..i];
        }
    }
    "unknown"
}

/// `timestamp,topic,message_id,send,receive,latency` → (topic, latency)
fn parse_row(line: &str) -> Option<(String, f64)> {
    if line.contains('"') {
        let cols = split_quoted(line)?;
        if cols.len() != 6 {
            return None;
        }
        let latency = cols[5].trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
        return Some((cols[1].clone(), latency));
    }
    // Unquoted rows: a topic may still contain commas, the other columns never do.
    let cols: Vec<&str> = line.split(',').collect();
    if cols.len() < 6 {
        return None;
    }
    let latency = cols[cols.len() - 1].trim().parse::<f64>().ok().filter(|v| v.is_finite())?;
    let topic = cols[1..cols.len() - 4].join(",");
    Some((topic, latency))
}

/// Split one CSV line with `"`-quoted fields (`""` inside quotes is a quote).
fn split_quoted(line: &str) -> Option<Vec<String>> {
    let mut cols = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut quoted = false;
    while let Some(c) = chars.next() {
        match (quoted, c) {
            (true, '"') if chars.peek() == Some(&'"') => {
                chars.next();
                field.push('"');
            }
            (true, '"') => quoted = false,
            (false, '"') if field.is_empty() => quoted = true,
            (false, ',') => cols.push(std::mem::take(&mut field)),
            (_, c) => field.push(c),
        }
    }
    if quoted {
        return None;
    }
    cols.push(field);
    Some(cols)
}

// ── Comparison ──

#[derive(Debug, Clone, PartialEq)]
pub struct StatsRow {
    pub topic: String,
    pub run: String,
    pub stats: LatencyStats,
}

/// Statistics of one or two runs, by topic then run order.
pub fn compare(runs: &[(&str, &LatencySet)]) -> Vec<StatsRow> {
    let mut by_topic: BTreeMap<&str, Vec<StatsRow>> = BTreeMap::new();
    for (run, set) in runs {
        for (topic, stats) in set.statistics() {
            by_topic.entry(topic).or_default().push(StatsRow {
                topic: topic.to_string(),
                run: run.to_string(),
                stats,
            });
        }
    }
    by_topic.into_values().flatten().collect()
}

fn fmt_ms(v: f64) -> String {
    format!("{v:.3}")
}

pub fn to_csv(rows: &[StatsRow]) -> String {
    let mut out = String::from(STATISTICS_HEADER);
    out.push('\n');
    for r in rows {
        let s = &r.stats;
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            r.topic,
            r.run,
            s.count,
            fmt_ms(s.mean),
            fmt_ms(s.median),
            fmt_ms(s.min),
            fmt_ms(s.max),
            s.std_dev.map(fmt_ms).unwrap_or_default()
        );
    }
    out
}

/// Write `latency_statistics.csv` into `out_dir`, creating it if needed.
pub fn write_statistics(rows: &[StatsRow], out_dir: &Path) -> Result<PathBuf, CollectorError> {
    std::fs::create_dir_all(out_dir).map_err(|e| CollectorError::io(out_dir, e))?;
    let path = out_dir.join(STATISTICS_FILE);
    std::fs::write(&path, to_csv(rows)).map_err(|e| CollectorError::io(&path, e))?;
    Ok(path)
}

pub fn render_table(rows: &[StatsRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<40} {:<12} {:>6} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "topic", "run", "count", "mean", "median", "min", "max", "std_dev"
    );
    for r in rows {
        let s = &r.stats;
        let std_dev = s.std_dev.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".into());
        let _ = writeln!(
            out,
            "{:<40} {:<12} {:>6} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>10}",
            r.topic, r.run, s.count, s.mean, s.median, s.min, s.max, std_dev
        );
    }
    out
}
