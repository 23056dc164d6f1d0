//! CSV storage of acquisition runs.
//!
//! Layout of a run file:
//!
//! ```text
//! # run_id: 6f1c…
//! # experiment: single-qubit tomography
//! # started_at: 2024-05-02T10:11:12Z
//! # n_sigma: 2
//! Setting,Avg_ch1,Err_ch1
//! H,1021.3,4.1
//! …
//! Sample,H_ch1,V_ch1,…
//! 0,1019,3,…
//! ```
//!
//! The statistics block holds one row per setting in measurement order. The
//! raw block starts at the `Sample` row and has one column per setting and
//! channel; a setting that ended early leaves its trailing cells empty.

use crate::acquisition::{AcquisitionRun, Sample};
use crate::analysis::statistics::SeriesStats;
use crate::error::{AppResult, DaqError};
use crate::experiment::Channel;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const SETTING_HEADER: &str = "Setting";
const SAMPLE_HEADER: &str = "Sample";

/// Writes one run to a CSV file.
pub struct CsvWriter {
    path: PathBuf,
    n_sigma: f64,
}

impl CsvWriter {
    /// Writer targeting `path`, error bars `n_sigma` standard errors wide.
    pub fn new(path: impl Into<PathBuf>, n_sigma: f64) -> Self {
        Self {
            path: path.into(),
            n_sigma,
        }
    }

    /// File name for an output base name (`tomography_counts` → `tomography_counts.csv`).
    ///
    /// The extension is appended to the whole base name, so dots inside it
    /// (`run_1.5mW`) are kept.
    pub fn path_for(file_base: &str) -> PathBuf {
        if file_base.ends_with(".csv") {
            PathBuf::from(file_base)
        } else {
            PathBuf::from(format!("{file_base}.csv"))
        }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `run`, replacing any existing file.
    pub fn write(&self, run: &AcquisitionRun) -> AppResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&self.path)?;
        writeln!(file, "# run_id: {}", run.run_id)?;
        writeln!(file, "# experiment: {:?}", run.variant)?;
        writeln!(file, "# started_at: {}", run.started_at.to_rfc3339())?;
        writeln!(file, "# n_sigma: {}", self.n_sigma)?;

        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);

        let mut header = vec![SETTING_HEADER.to_string()];
        for channel in &run.channels {
            header.push(format!("Avg_{channel}"));
            header.push(format!("Err_{channel}"));
        }
        writer.write_record(&header)?;
        for series in &run.settings {
            let mut row = vec![series.label().to_string()];
            for &channel in &run.channels {
                let stats = series.stats(channel, self.n_sigma);
                row.push(stats.mean.to_string());
                row.push(stats.error.to_string());
            }
            writer.write_record(&row)?;
        }

        let mut raw_header = vec![SAMPLE_HEADER.to_string()];
        for series in &run.settings {
            for channel in &run.channels {
                raw_header.push(format!("{}_{channel}", series.label()));
            }
        }
        writer.write_record(&raw_header)?;

        let rows = run
            .settings
            .iter()
            .flat_map(|s| s.series.values().map(Vec::len))
            .max()
            .unwrap_or(0);
        for i in 0..rows {
            let mut row = vec![i.to_string()];
            for series in &run.settings {
                for &channel in &run.channels {
                    row.push(
                        series
                            .samples(channel)
                            .get(i)
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                    );
                }
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;

        info!(path = %self.path.display(), settings = run.settings.len(), "Run saved");
        Ok(())
    }
}

/// One setting read back from a run file.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSetting {
    /// Setting label
    pub label: String,
    /// Mean and error bar per channel, as written
    pub stats: BTreeMap<Channel, SeriesStats>,
    /// Raw samples per channel
    pub samples: BTreeMap<Channel, Vec<Sample>>,
}

/// A run file read back for offline analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedRun {
    /// Channels in column order
    pub channels: Vec<Channel>,
    /// Settings in file order
    pub settings: Vec<SavedSetting>,
}

impl SavedRun {
    /// Stored mean of `channel` per setting label.
    pub fn averages(&self, channel: Channel) -> BTreeMap<String, f64> {
        self.settings
            .iter()
            .filter_map(|s| s.stats.get(&channel).map(|st| (s.label.clone(), st.mean)))
            .collect()
    }

    /// Setting labelled `label`.
    pub fn setting(&self, label: &str) -> Option<&SavedSetting> {
        self.settings.iter().find(|s| s.label == label)
    }
}

fn parse_channel(name: &str) -> AppResult<Channel> {
    Channel::from_name(name).ok_or_else(|| DaqError::Parse(format!("Unknown channel '{name}'")))
}

fn parse_f64(field: &str, what: &str) -> AppResult<f64> {
    field
        .trim()
        .parse()
        .map_err(|e| DaqError::Parse(format!("Bad {what} '{field}': {e}")))
}

/// Read a run file written by [`CsvWriter`].
pub fn read_run(path: impl AsRef<Path>) -> AppResult<SavedRun> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)?;
    let mut records = reader.records();

    let header = records
        .next()
        .ok_or_else(|| DaqError::Parse(format!("{} is empty", path.display())))??;
    if header.get(0) != Some(SETTING_HEADER) {
        return Err(DaqError::Parse(format!(
            "{} does not start with a '{SETTING_HEADER}' header",
            path.display()
        )));
    }
    let channels = header
        .iter()
        .skip(1)
        .step_by(2)
        .map(|col| {
            col.strip_prefix("Avg_")
                .ok_or_else(|| DaqError::Parse(format!("Expected an Avg_ column, found '{col}'")))
                .and_then(parse_channel)
        })
        .collect::<AppResult<Vec<_>>>()?;

    let mut settings = Vec::new();
    let mut raw_columns: Vec<(usize, Channel)> = Vec::new();
    for record in records.by_ref() {
        let record = record?;
        let Some(first) = record.get(0) else {
            continue;
        };
        if first == SAMPLE_HEADER {
            for col in record.iter().skip(1) {
                let (label, channel) = col
                    .rsplit_once('_')
                    .ok_or_else(|| DaqError::Parse(format!("Bad raw column '{col}'")))?;
                let idx = settings
                    .iter()
                    .position(|s: &SavedSetting| s.label == label)
                    .ok_or_else(|| DaqError::MissingSetting(label.to_string()))?;
                raw_columns.push((idx, parse_channel(channel)?));
            }
            break;
        }

        let mut stats = BTreeMap::new();
        for (i, &channel) in channels.iter().enumerate() {
            let mean = parse_f64(record.get(1 + 2 * i).unwrap_or(""), "mean")?;
            let error = parse_f64(record.get(2 + 2 * i).unwrap_or(""), "error")?;
            stats.insert(channel, SeriesStats { mean, error, n: 0 });
        }
        settings.push(SavedSetting {
            label: first.to_string(),
            stats,
            samples: channels.iter().map(|&c| (c, Vec::new())).collect(),
        });
    }

    for record in records {
        let record = record?;
        for (field, &(idx, channel)) in record.iter().skip(1).zip(&raw_columns) {
            if field.trim().is_empty() {
                continue;
            }
            let value: Sample = field
                .trim()
                .parse()
                .map_err(|e| DaqError::Parse(format!("Bad sample '{field}': {e}")))?;
            settings[idx].samples.entry(channel).or_default().push(value);
        }
    }

    for setting in &mut settings {
        for (channel, stats) in &mut setting.stats {
            stats.n = setting.samples.get(channel).map_or(0, Vec::len);
        }
    }

    info!(path = %path.display(), settings = settings.len(), "Run loaded");
    Ok(SavedRun { channels, settings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::SettingSeries;
    use crate::experiment::{Setting, VariantKind};
    use chrono::Utc;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn run_with(series: Vec<SettingSeries>, channels: Vec<Channel>) -> AcquisitionRun {
        AcquisitionRun {
            run_id: Uuid::new_v4(),
            variant: VariantKind::TwoQubit,
            started_at: Utc::now(),
            samples_per_setting: 3,
            channels,
            settings: series,
        }
    }

    fn series(label: &str, data: &[(Channel, &[Sample])]) -> SettingSeries {
        let channels: Vec<Channel> = data.iter().map(|(c, _)| *c).collect();
        let mut s = SettingSeries::new(Setting::parse(label).unwrap(), &channels);
        for (c, values) in data {
            s.series.insert(*c, values.to_vec());
        }
        s
    }

    #[test]
    fn written_file_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counts.csv");
        let channels = vec![Channel::Ch1, Channel::Coinc12];
        let run = run_with(
            vec![
                series("HH", &[(Channel::Ch1, &[10, 12, 14]), (Channel::Coinc12, &[1, 2, 3])]),
                // ended early after one sample
                series("HV", &[(Channel::Ch1, &[7]), (Channel::Coinc12, &[0])]),
            ],
            channels.clone(),
        );

        CsvWriter::new(&path, 2.0).write(&run).unwrap();
        let saved = read_run(&path).unwrap();

        assert_eq!(saved.channels, channels);
        assert_eq!(saved.settings.len(), 2);
        let hh = saved.setting("HH").unwrap();
        assert_eq!(hh.samples[&Channel::Ch1], vec![10, 12, 14]);
        assert_eq!(hh.stats[&Channel::Ch1].n, 3);
        assert!((hh.stats[&Channel::Ch1].mean - 12.0).abs() < 1e-12);
        // n_sigma 2, std 2, n 3
        assert!((hh.stats[&Channel::Ch1].error - 4.0 / 3f64.sqrt()).abs() < 1e-12);

        let hv = saved.setting("HV").unwrap();
        assert_eq!(hv.samples[&Channel::Coinc12], vec![0]);
        assert_eq!(hv.stats[&Channel::Ch1].error, 0.0);

        let averages = saved.averages(Channel::Coinc12);
        assert_eq!(averages["HH"], 2.0);
        assert_eq!(averages["HV"], 0.0);
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.csv");
        std::fs::write(&path, "a,b,c\n1,2,3\n").unwrap();
        assert!(matches!(read_run(&path), Err(DaqError::Parse(_))));
    }

    #[test]
    fn output_path_gets_csv_extension() {
        assert_eq!(CsvWriter::path_for("tomography_counts"), PathBuf::from("tomography_counts.csv"));
        assert_eq!(CsvWriter::path_for("out/run.csv"), PathBuf::from("out/run.csv"));
    }

    #[test]
    fn dotted_base_names_stay_distinct() {
        let a = CsvWriter::path_for("run_1.5mW");
        let b = CsvWriter::path_for("run_1.2mW");
        assert_eq!(a, PathBuf::from("run_1.5mW.csv"));
        assert_eq!(b, PathBuf::from("run_1.2mW.csv"));
        assert_ne!(a, b);
    }
}
