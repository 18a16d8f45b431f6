use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::grid::{GridSnapshot, WeightedPoint};

/// On-disk encoding of a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    /// `{"generated_at": ..., "grid_size": N, "points": [{lat, lon, weight}]}`
    #[default]
    Json,

    /// `function getHeatmap()` returning Google Maps heatmap entries
    GoogleMapsJs,
}

#[derive(Serialize)]
struct JsonExport<'a> {
    generated_at: String,
    grid_size: usize,
    points: &'a [WeightedPoint],
}

impl ExportFormat {
    /// Encodes the snapshot. Pure: no I/O.
    pub fn render(self, snapshot: &GridSnapshot, generated_at: DateTime<Utc>) -> Result<String> {
        let points: Vec<WeightedPoint> = snapshot.points().collect();

        match self {
            ExportFormat::Json => {
                let doc = JsonExport {
                    generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                    grid_size: snapshot.geometry().size(),
                    points: &points,
                };
                Ok(serde_json::to_string_pretty(&doc)?)
            }

            ExportFormat::GoogleMapsJs => {
                let mut out = String::with_capacity(64 + points.len() * 80);
                out.push_str("function getHeatmap() {\n");
                out.push_str("var HeatmapData = [\n");
                for p in &points {
                    writeln!(
                        out,
                        "  {{location: new google.maps.LatLng({}, {}), weight: {}}},",
                        p.lat, p.lon, p.weight
                    )?;
                }
                out.push_str("];\n");
                out.push_str("return HeatmapData;\n");
                out.push_str("}\n");
                Ok(out)
            }
        }
    }
}
