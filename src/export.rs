//! Writing composites to disk.
//!
//! Per composite, CSV or Parquet with the columns
//! `wavelength, flux, variance, rms, scatter_percent, count`. Missing bins are
//! `NaN` in CSV and null in Parquet. JSON holds the whole [`CompositeSet`].

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, StringArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::info;
use parquet::arrow::ArrowWriter;
use serde::Serialize;

use crate::pipeline::{CompositeSet, CompositeSpectrum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Parquet,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
            ExportFormat::Json => "json",
        }
    }
}

#[derive(Serialize)]
struct Row {
    wavelength: f64,
    flux: f64,
    variance: f64,
    rms: f64,
    scatter_percent: f64,
    count: u32,
}

fn rows(composite: &CompositeSpectrum) -> impl Iterator<Item = Row> + '_ {
    let variance = composite.variance();
    let scatter = composite.scatter_percent();
    (0..composite.grid().len()).map(move |i| Row {
        wavelength: composite.grid().wavelength(i),
        flux: composite.flux()[i],
        variance: variance[i],
        rms: composite.rms()[i],
        scatter_percent: scatter[i],
        count: composite.count()[i],
    })
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

pub fn write_csv<W: Write>(composite: &CompositeSpectrum, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in rows(composite) {
        csv.serialize(row).context("writing CSV row")?;
    }
    csv.flush().context("flushing CSV")?;
    Ok(())
}

/// Extinction curve as `wavelength, k, correction` rows.
pub fn write_curve_csv<W: Write>(
    wavelength: &[f64],
    k: &[f64],
    correction: &[f64],
    writer: W,
) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["wavelength", "k", "correction"])
        .context("writing CSV header")?;
    for ((w, k), c) in wavelength.iter().zip(k).zip(correction) {
        csv.write_record([w.to_string(), k.to_string(), c.to_string()])
            .context("writing CSV row")?;
    }
    csv.flush().context("flushing CSV")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

fn nullable(values: impl IntoIterator<Item = f64>) -> Float64Array {
    values
        .into_iter()
        .map(|v| if v.is_nan() { None } else { Some(v) })
        .collect()
}

/// Composite as one Arrow record batch.
pub fn to_record_batch(composite: &CompositeSpectrum) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("wavelength", DataType::Float64, false),
        Field::new("flux", DataType::Float64, true),
        Field::new("variance", DataType::Float64, true),
        Field::new("rms", DataType::Float64, true),
        Field::new("scatter_percent", DataType::Float64, true),
        Field::new("count", DataType::UInt32, false),
    ]));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Float64Array::from(composite.wavelengths())),
        Arc::new(nullable(composite.flux().iter().copied())),
        Arc::new(nullable(composite.variance())),
        Arc::new(nullable(composite.rms().iter().copied())),
        Arc::new(nullable(composite.scatter_percent())),
        Arc::new(UInt32Array::from(composite.count().to_vec())),
    ];

    RecordBatch::try_new(schema, columns).context("building composite record batch")
}

pub fn write_parquet(composite: &CompositeSpectrum, path: &Path) -> Result<()> {
    let batch = to_record_batch(composite)?;
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// One row per composite: label, members, covered range, median scatter.
pub fn summary_batch(set: &CompositeSet) -> Result<RecordBatch> {
    let label: StringArray = set.iter().map(|c| Some(c.label())).collect();
    let members = UInt32Array::from(
        set.iter()
            .map(|c| c.members().len() as u32)
            .collect::<Vec<_>>(),
    );
    let coverage: Vec<Option<(f64, f64)>> =
        set.iter().map(CompositeSpectrum::coverage_range).collect();
    let from: Float64Array = coverage.iter().map(|r| r.map(|(lo, _)| lo)).collect();
    let to: Float64Array = coverage.iter().map(|r| r.map(|(_, hi)| hi)).collect();
    let scatter: Float64Array = set
        .iter()
        .map(|c| crate::data::model::median(c.scatter_percent()))
        .collect();

    let schema = Arc::new(Schema::new(vec![
        Field::new("label", DataType::Utf8, true),
        Field::new("members", DataType::UInt32, false),
        Field::new("from", DataType::Float64, true),
        Field::new("to", DataType::Float64, true),
        Field::new("median_scatter_percent", DataType::Float64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(label),
            Arc::new(members),
            Arc::new(from),
            Arc::new(to),
            Arc::new(scatter),
        ],
    )
    .context("building summary record batch")
}

// ---------------------------------------------------------------------------
// Whole sets
// ---------------------------------------------------------------------------

pub fn write_json(set: &CompositeSet, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), set)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// File name stem for a composite label.
pub fn file_stem(label: &str, index: usize) -> String {
    let stem: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        format!("composite{index}")
    } else {
        stem
    }
}

/// Write `set` into `dir`, returning the files written.
pub fn write_set(set: &CompositeSet, dir: &Path, format: ExportFormat) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut written = Vec::new();
    if format == ExportFormat::Json {
        let path = dir.join("composites.json");
        write_json(set, &path)?;
        written.push(path);
    } else {
        for (i, composite) in set.iter().enumerate() {
            let path = dir
                .join(file_stem(composite.label(), i))
                .with_extension(format.extension());
            if format == ExportFormat::Parquet {
                write_parquet(composite, &path)?;
            } else {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("creating {}", path.display()))?;
                write_csv(composite, file)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            written.push(path);
        }
    }
    for path in &written {
        info!("wrote {}", path.display());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("low-z", 0), "low-z");
        assert_eq!(file_stem("dm15 1.0/1.2", 1), "dm15_1_0_1_2");
        assert_eq!(file_stem("", 3), "composite3");
    }

    #[test]
    fn test_curve_csv() {
        let mut out = Vec::new();
        write_curve_csv(&[4000.0, 5000.0], &[4.0, 3.5], &[1.5, 1.4], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "wavelength,k,correction\n4000,4,1.5\n5000,3.5,1.4\n");
    }
}
