//! Declarative classification tables.
//!
//! One table per metric kind (metric → alert) plus the per-feed tables the
//! adapters use to turn a provider score into a [`Severity`]. The cutoffs are
//! carried over from the dashboards these feeds were tuned on; treat them as
//! operational defaults, not domain constants.

use once_cell::sync::Lazy;

use crate::model::{MetricKind, Severity};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    /// Inclusive lower bound.
    pub min: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    pub name: &'static str,
    /// Compare `|value|` instead of `value` (percent moves in both directions).
    pub absolute: bool,
    /// Sorted by `min` descending; first match wins.
    bands: Vec<Band>,
}

impl ThresholdTable {
    pub fn new(name: &'static str, absolute: bool, mut bands: Vec<Band>) -> Self {
        bands.sort_by(|a, b| b.min.total_cmp(&a.min));
        Self {
            name,
            absolute,
            bands,
        }
    }

    /// The band the value falls into, if any. Non-finite values never match.
    pub fn matching_band(&self, value: f64) -> Option<Band> {
        if !value.is_finite() {
            return None;
        }
        let v = if self.absolute { value.abs() } else { value };
        self.bands.iter().copied().find(|b| v >= b.min)
    }

    pub fn classify(&self, value: f64) -> Option<Severity> {
        self.matching_band(value).map(|b| b.severity)
    }

    pub fn classify_or(&self, value: f64, floor: Severity) -> Severity {
        self.classify(value).unwrap_or(floor)
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }
}

fn band(min: f64, severity: Severity) -> Band {
    Band { min, severity }
}

/// Metric → alert tables. Kinds without a table never alert.
pub fn metric_table(kind: MetricKind) -> Option<&'static ThresholdTable> {
    static PRICE_CHANGE: Lazy<ThresholdTable> = Lazy::new(|| {
        ThresholdTable::new(
            "price_change_24h",
            true,
            vec![band(10.0, Severity::High), band(20.0, Severity::Critical)],
        )
    });
    // G1 minor storm starts at Kp 5, G3 strong at 7, G4 severe at 8.
    static KP: Lazy<ThresholdTable> = Lazy::new(|| {
        ThresholdTable::new(
            "kp_index",
            false,
            vec![
                band(5.0, Severity::Medium),
                band(7.0, Severity::High),
                band(8.0, Severity::Critical),
            ],
        )
    });
    static GAS: Lazy<ThresholdTable> = Lazy::new(|| {
        ThresholdTable::new(
            "gas_price_gwei",
            false,
            vec![band(100.0, Severity::Medium), band(300.0, Severity::High)],
        )
    });
    static FEE: Lazy<ThresholdTable> = Lazy::new(|| {
        ThresholdTable::new(
            "fee_rate_sat_vb",
            false,
            vec![band(100.0, Severity::Medium), band(300.0, Severity::High)],
        )
    });
    static DEGRADED: Lazy<ThresholdTable> = Lazy::new(|| {
        ThresholdTable::new(
            "degraded_components",
            false,
            vec![band(1.0, Severity::Medium), band(3.0, Severity::High)],
        )
    });
    static EMERGENCIES: Lazy<ThresholdTable> = Lazy::new(|| {
        ThresholdTable::new(
            "aircraft_emergencies",
            false,
            vec![band(1.0, Severity::Medium), band(5.0, Severity::High)],
        )
    });
    static KEV_ADDITIONS: Lazy<ThresholdTable> = Lazy::new(|| {
        ThresholdTable::new(
            "kev_additions_7d",
            false,
            vec![band(10.0, Severity::Medium)],
        )
    });

    match kind {
        MetricKind::PriceChangePercent24h => Some(&*PRICE_CHANGE),
        MetricKind::KpIndex => Some(&*KP),
        MetricKind::GasPriceGwei => Some(&*GAS),
        MetricKind::FeeRateSatVb => Some(&*FEE),
        MetricKind::DegradedComponents => Some(&*DEGRADED),
        MetricKind::AircraftEmergencies => Some(&*EMERGENCIES),
        MetricKind::KevAdditions7d => Some(&*KEV_ADDITIONS),
        MetricKind::PriceUsd | MetricKind::BlockHeight | MetricKind::AircraftTracked => None,
    }
}

/// ThreatFox `confidence_level` (0–100).
pub static IOC_CONFIDENCE: Lazy<ThresholdTable> = Lazy::new(|| {
    ThresholdTable::new(
        "ioc_confidence",
        false,
        vec![
            band(50.0, Severity::Medium),
            band(75.0, Severity::High),
            band(90.0, Severity::Critical),
        ],
    )
});

/// GOES X-ray flare class mapped to a log-scale magnitude (C=1, M=2, X=3).
pub static FLARE_CLASS: Lazy<ThresholdTable> = Lazy::new(|| {
    ThresholdTable::new(
        "flare_class",
        false,
        vec![
            band(1.0, Severity::Medium),
            band(2.0, Severity::High),
            band(3.0, Severity::Critical),
        ],
    )
});
