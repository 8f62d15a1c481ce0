//! Plain-language interpretation of index means.

use std::fmt;

use log::debug;

use crate::{
    config::EfficiencyThresholds,
    dates::DateRange,
    error::Result,
    mosaic::Mosaic,
    tile::{read_tile, IndexBand, PixelRecord, TileStore},
};

/// What each index shows and which values are healthy. Printed next to the quick-look.
pub const BAND_LEGEND: [(IndexBand, &str); 4] = [
    (
        IndexBand::Ndvi,
        "Plant density and vigour. Healthy vegetation: 0.3 to 0.8; below 0 indicates water, \
         around 0 bare soil.",
    ),
    (
        IndexBand::Ndre,
        "Chlorophyll content. Below 0.4 indicates stress, above 0.6 healthy vegetation and \
         ripening fruit.",
    ),
    (
        IndexBand::Ndmi,
        "Canopy moisture. -0.4 to 0.4 indicates water stress, up to 0.8 is fine; negative \
         values mean dry soil or water stress.",
    ),
    (
        IndexBand::Gci,
        "Leaf chlorophyll. Above 2 indicates good chlorophyll; low values mean stress or \
         young/yellowing leaves.",
    ),
];

pub const COMBINATIONS: &str = "\
Reading the four indices together:
  A. Healthy, well-watered vegetation: NDVI, NDRE, NDMI and GCI high.
  B. Dense vegetation poor in chlorophyll: NDVI and NDRE high, GCI low.
  C. Sparse vegetation with healthy leaves: NDVI medium, NDMI and GCI high.
  D. Dense vegetation under water stress: NDVI and NDRE high, NDMI low.
  E. Sparse vegetation or heavy stress: all low.
  F. Bare soil or post-harvest: NDVI, NDRE and NDMI very low, GCI irrelevant.";

// first threshold the value does not exceed wins
const NDVI_RULES: [(f64, &str); 4] = [
    (0.0, "non-vegetated or waterlogged area"),
    (0.3, "sparse vegetation"),
    (0.6, "moderate vegetation density"),
    (1.0, "densely vegetated area"),
];

const NDRE_RULES: [(f64, &str); 4] = [
    (0.2, "highly stressed, unproductive vegetation"),
    (0.4, "moderately stressed vegetation"),
    (0.6, "productive vegetation"),
    (1.0, "healthy, vigorous vegetation"),
];

const NDMI_RULES: [(f64, &str); 5] = [
    (0.0, "non-vegetated area"),
    (0.1, "vegetation under high water stress (or heading)"),
    (0.4, "poor hydration"),
    (0.6, "regular vegetation with water needs"),
    (1.0, "vegetation with abundant water reserves"),
];

const GCI_RULES: [(f64, &str); 5] = [
    (1.0, "scarce chlorophyll, inactive vegetation"),
    (2.0, "little chlorophyll, barely active vegetation"),
    (3.0, "sufficient chlorophyll, active vegetation"),
    (4.0, "high chlorophyll, very active vegetation"),
    (10.0, "abundant chlorophyll, abundantly active vegetation"),
];

fn rules(band: IndexBand) -> &'static [(f64, &'static str)] {
    match band {
        IndexBand::Ndvi => &NDVI_RULES,
        IndexBand::Ndre => &NDRE_RULES,
        IndexBand::Ndmi => &NDMI_RULES,
        IndexBand::Gci => &GCI_RULES,
    }
}

/// Class text for `value`, or `None` above the last threshold.
pub fn classify(band: IndexBand, value: f64) -> Option<&'static str> {
    rules(band)
        .iter()
        .find(|(threshold, _)| value <= *threshold)
        .map(|(_, text)| *text)
}

/// Mean of each index, `None` when nothing contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndexMeans {
    pub ndvi: Option<f64>,
    pub ndre: Option<f64>,
    pub ndmi: Option<f64>,
    pub gci: Option<f64>,
}

impl IndexMeans {
    pub fn get(&self, band: IndexBand) -> Option<f64> {
        match band {
            IndexBand::Ndvi => self.ndvi,
            IndexBand::Ndre => self.ndre,
            IndexBand::Ndmi => self.ndmi,
            IndexBand::Gci => self.gci,
        }
    }

    fn set(&mut self, band: IndexBand, value: Option<f64>) {
        match band {
            IndexBand::Ndvi => self.ndvi = value,
            IndexBand::Ndre => self.ndre = value,
            IndexBand::Ndmi => self.ndmi = value,
            IndexBand::Gci => self.gci = value,
        }
    }

    pub fn from_mosaic(mosaic: &Mosaic) -> Self {
        let mut means = IndexMeans::default();
        for band in IndexBand::ALL {
            means.set(band, mosaic.band_mean(band));
        }
        means
    }

    /// GCI/NDRE, the share of chlorophyll that is biochemically active.
    pub fn efficiency(&self) -> Option<f64> {
        match (self.gci, self.ndre) {
            (Some(gci), Some(ndre)) if ndre != 0.0 => Some(gci / ndre),
            _ => None,
        }
    }
}

impl fmt::Display for IndexMeans {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, band) in IndexBand::ALL.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match self.get(*band) {
                Some(value) => write!(f, "{}: {:.4}", band.name(), value)?,
                None => write!(f, "{}: no data", band.name())?,
            }
        }
        Ok(())
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Per-index means of one tile. Rows with any index exactly zero are dropped first; missing
/// values are skipped.
pub fn tile_means(records: &[PixelRecord]) -> IndexMeans {
    let kept: Vec<&PixelRecord> = records
        .iter()
        .filter(|r| IndexBand::ALL.iter().all(|band| r.index(*band) != Some(0.0)))
        .collect();

    let mut means = IndexMeans::default();
    for band in IndexBand::ALL {
        means.set(
            band,
            mean(kept.iter().filter_map(|r| r.index(band)).map(f64::from)),
        );
    }
    means
}

/// Mean of daily means. Days without a value for an index don't count towards it.
pub fn period_means(days: &[IndexMeans]) -> IndexMeans {
    let mut means = IndexMeans::default();
    for band in IndexBand::ALL {
        means.set(band, mean(days.iter().filter_map(|day| day.get(band))));
    }
    means
}

/// Reads every cached tile of `range` and averages their daily means. Returns the number of
/// tiles found alongside.
pub fn summarize_period(store: &TileStore, range: &DateRange) -> Result<(IndexMeans, usize)> {
    let mut days = Vec::new();
    for day in range.days() {
        if !store.contains(&day) {
            continue;
        }
        let path = store.path_for(&day);
        let means = tile_means(&read_tile(&path)?);
        debug!("{}: {:?}", day.label(), means);
        days.push(means);
    }

    Ok((period_means(&days), days.len()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Efficiency {
    Young,
    Healthy,
    SlightlyStressed,
    Inefficient,
    Diseased,
}

impl Efficiency {
    pub fn classify(ratio: f64, t: &EfficiencyThresholds) -> Self {
        if ratio < t.young {
            Efficiency::Young
        } else if ratio <= t.healthy {
            Efficiency::Healthy
        } else if ratio < t.stressed {
            Efficiency::SlightlyStressed
        } else if ratio < t.inefficient {
            Efficiency::Inefficient
        } else {
            Efficiency::Diseased
        }
    }

    pub fn message(&self, t: &EfficiencyThresholds) -> String {
        match self {
            Efficiency::Young => format!("young or pruned vegetation (0-{})", t.young),
            Efficiency::Healthy => format!("healthy vegetation ({}-{})", t.young, t.healthy),
            Efficiency::SlightlyStressed => format!(
                "slightly stressed vegetation, watch for pathogens ({}-{})",
                t.healthy, t.stressed
            ),
            Efficiency::Inefficient => format!(
                "inefficient vegetation, inactive chlorophyll, monitor for disease ({}-{})",
                t.stressed, t.inefficient
            ),
            Efficiency::Diseased => {
                format!("severely diseased vegetation (>{}), pathologies", t.inefficient)
            }
        }
    }
}

/// One sentence from the NDVI, NDMI and GCI classes, followed by the GCI/NDRE efficiency line.
/// NDRE is reported through the ratio only.
pub fn describe(means: &IndexMeans, thresholds: &EfficiencyThresholds) -> String {
    let parts: Vec<&str> = [IndexBand::Ndvi, IndexBand::Ndmi, IndexBand::Gci]
        .iter()
        .filter_map(|band| means.get(*band).and_then(|value| classify(*band, value)))
        .collect();

    let mut text = parts.join(", ");

    if let Some(ratio) = means.efficiency() {
        let class = Efficiency::classify(ratio, thresholds);
        text.push_str(&format!(
            "\n\nAvailable over biochemically active chlorophyll (GCI/NDRE): {:.2} - {}",
            ratio,
            class.message(thresholds)
        ));
    }

    text
}

/// Legend lines, one per index.
pub fn legend() -> String {
    BAND_LEGEND
        .iter()
        .map(|(band, text)| format!("{}: {}", band.name(), text))
        .collect::<Vec<_>>()
        .join("\n")
}

// -- Tests -------------------------------------------------------------------
