use std::collections::HashMap;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a single titre observation constrains the true log2 titre.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum TitreType {
    /// Exact observation.
    Point,
    /// True value lies in `[log2_titre, log2_titre + interval_width]`.
    Interval,
    /// True value lies below the recorded titre (`<x` in the table).
    ThresholdLower,
    /// True value lies above the recorded titre (`>x` in the table).
    ThresholdUpper,
    /// No numeric value; contributes zero to the likelihood.
    Missing,
}

/// One row of the raw assay table, before virus/serum resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssayRow {
    pub virus_isolate: String,
    pub virus_strain: String,
    pub virus_date: f64,
    pub serum_isolate: String,
    pub serum_strain: String,
    pub serum_date: f64,
    pub titre: String,
}

/// A virus strain present in the assay table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Virus {
    pub name: String,
    pub date: f64,
    /// Years since the earliest sampled strain in the table.
    pub offset: f64,
}

/// An antiserum present in the assay table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Serum {
    pub name: String,
    pub date: f64,
    pub offset: f64,
}

/// A single resolved assay measurement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Measurement {
    pub virus: usize,
    pub serum: usize,
    pub titre_type: TitreType,
    pub log2_titre: f64,
}

/// Parsed, immutable assay table: viruses, sera and their pairwise titres.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeasurementTable {
    pub viruses: Vec<Virus>,
    pub sera: Vec<Serum>,
    pub measurements: Vec<Measurement>,
    /// Maximum observed log2 titre per serum, the initial potency value.
    pub max_serum_titre: Vec<f64>,
    /// Maximum observed log2 titre per virus, the initial avidity value.
    pub max_virus_titre: Vec<f64>,
    pub earliest_date: f64,
    pub interval_width: f64,
    pub threshold_count: usize,
}

fn parse_titre(raw: &str, use_intervals: bool) -> (TitreType, f64) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return (TitreType::Missing, f64::NAN);
    }
    let pattern = Regex::new(r"^([<>]?)\s*([0-9]+\.?[0-9]*)$").unwrap();
    let captures = pattern
        .captures(trimmed)
        .unwrap_or_else(|| panic!("malformed titre string: {:?}", raw));
    let value: f64 = captures[2].parse().unwrap();
    if value <= 0.0 {
        panic!("titre must be positive, got {:?}", raw);
    }
    let titre_type = match &captures[1] {
        "<" => TitreType::ThresholdLower,
        ">" => TitreType::ThresholdUpper,
        _ if use_intervals => TitreType::Interval,
        _ => TitreType::Point,
    };
    (titre_type, value.log2())
}

impl MeasurementTable {
    /// Builds the table from parsed assay rows.
    ///
    /// With `interval_width > 0` plain numeric titres become interval-censored
    /// observations of that width. With `merge_isolates` sera are keyed by
    /// strain name rather than isolate, pooling repeat bleeds.
    ///
    /// # Panics
    ///
    /// Panics on malformed titre strings or non-finite dates; the table is
    /// load-time input and bad records are unrecoverable.
    pub fn from_rows(rows: &[AssayRow], interval_width: f64, merge_isolates: bool) -> Self {
        let use_intervals = interval_width > 0.0;

        let mut virus_index: HashMap<String, usize> = HashMap::new();
        let mut serum_index: HashMap<String, usize> = HashMap::new();
        let mut viruses: Vec<Virus> = Vec::new();
        let mut sera: Vec<Serum> = Vec::new();
        let mut measurements: Vec<Measurement> = Vec::new();
        let mut threshold_count = 0usize;

        for (row_number, row) in rows.iter().enumerate() {
            if !row.virus_date.is_finite() || !row.serum_date.is_finite() {
                panic!("missing or non-finite date in assay row {}", row_number + 1);
            }

            let virus_key = &row.virus_strain;
            let virus = *virus_index.entry(virus_key.clone()).or_insert_with(|| {
                viruses.push(Virus {
                    name: virus_key.clone(),
                    date: row.virus_date,
                    offset: 0.0,
                });
                viruses.len() - 1
            });

            let serum_key = if merge_isolates {
                &row.serum_strain
            } else {
                &row.serum_isolate
            };
            let serum = *serum_index.entry(serum_key.clone()).or_insert_with(|| {
                sera.push(Serum {
                    name: serum_key.clone(),
                    date: row.serum_date,
                    offset: 0.0,
                });
                sera.len() - 1
            });

            let (titre_type, log2_titre) = parse_titre(&row.titre, use_intervals);
            if matches!(titre_type, TitreType::ThresholdLower | TitreType::ThresholdUpper) {
                threshold_count += 1;
            }
            measurements.push(Measurement {
                virus,
                serum,
                titre_type,
                log2_titre,
            });
        }

        let earliest_date = viruses
            .iter()
            .map(|v| v.date)
            .chain(sera.iter().map(|s| s.date))
            .map(OrderedFloat)
            .min()
            .map(|d| d.0)
            .unwrap_or(0.0);

        for virus in viruses.iter_mut() {
            virus.offset = virus.date - earliest_date;
        }
        for serum in sera.iter_mut() {
            serum.offset = serum.date - earliest_date;
        }

        let mut max_serum_titre = vec![0.0; sera.len()];
        let mut max_virus_titre = vec![0.0; viruses.len()];
        for m in measurements.iter() {
            if m.log2_titre.is_nan() {
                continue;
            }
            if m.log2_titre > max_serum_titre[m.serum] {
                max_serum_titre[m.serum] = m.log2_titre;
            }
            if m.log2_titre > max_virus_titre[m.virus] {
                max_virus_titre[m.virus] = m.log2_titre;
            }
        }

        MeasurementTable {
            viruses,
            sera,
            measurements,
            max_serum_titre,
            max_virus_titre,
            earliest_date,
            interval_width,
            threshold_count,
        }
    }

    pub fn virus_count(&self) -> usize {
        self.viruses.len()
    }

    pub fn serum_count(&self) -> usize {
        self.sera.len()
    }

    pub fn measurement_count(&self) -> usize {
        self.measurements.len()
    }

    /// Per-virus sampling-date offsets, in table order.
    pub fn virus_offsets(&self) -> Vec<f64> {
        self.viruses.iter().map(|v| v.offset).collect()
    }

    /// One-line load report, analogous to the constructor printouts of the
    /// surrounding tooling.
    pub fn summary(&self) -> String {
        format!(
            "{} viruses, {} sera, {} measurements ({} thresholded), interval width {}",
            self.virus_count(),
            self.serum_count(),
            self.measurement_count(),
            self.threshold_count,
            self.interval_width
        )
    }

    /// Virus names in registry order, used to bind viruses to tree tips.
    pub fn virus_names(&self) -> Vec<&str> {
        self.viruses.iter().map(|v| v.name.as_str()).collect_vec()
    }
}
