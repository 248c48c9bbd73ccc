//! Runs the pipeline against synthetic submissions with a canned
//! classifier and prints the resulting triage queue.
//!
//!     cargo run --example triage_demo

use std::io::Cursor;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing_subscriber::EnvFilter;

use civiceye_common::{GeoPoint, IssueType, MediaKind, MediaSample, PipelineConfig};
use civiceye_pipeline::{
    Frame, FrameClassifier, FrameSignal, MemoryIncidentStore, Pipeline, UniformZoneRisk, VecSink,
    ZoneRisk,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// Stands in for the real model: severity keyed off mean brightness so
/// the synthetic samples produce a spread of scores.
struct CannedClassifier {
    issue_type: IssueType,
}

#[async_trait]
impl FrameClassifier for CannedClassifier {
    async fn classify(&self, frame: &Frame) -> Result<FrameSignal> {
        let mean: f64 = frame
            .rgb
            .pixels()
            .map(|p| f64::from(p.0[0]))
            .sum::<f64>()
            / f64::from(frame.rgb.width() * frame.rgb.height());
        Ok(FrameSignal {
            issue_type: self.issue_type,
            confidence: 0.9,
            raw_severity_signal: mean / 255.0,
            area_affected_ratio: 0.3,
        })
    }

    fn name(&self) -> &str {
        "canned"
    }
}

fn png(level: u8) -> Result<Vec<u8>> {
    let img = RgbImage::from_pixel(64, 64, Rgb([level, level, level]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("civiceye=info".parse()?))
        .init();

    let config = PipelineConfig::from_env()?;
    let store = Arc::new(MemoryIncidentStore::new());
    let pipeline = Pipeline::new(
        CannedClassifier {
            issue_type: IssueType::Pothole,
        },
        UniformZoneRisk(ZoneRisk::Medium),
        Arc::clone(&store),
        VecSink::new(),
        &config,
    );

    let base = GeoPoint {
        lat: 44.9778,
        lng: -93.265,
        accuracy_radius_m: 10.0,
    };
    let mut samples = Vec::new();
    for i in 0..6u8 {
        // Three near-identical reports at one corner, three spread out.
        let lat_offset = if i < 3 { 0.0 } else { f64::from(i) * 0.002 };
        samples.push(MediaSample::new(
            png(60 + i * 30)?,
            MediaKind::Image,
            Utc::now() - Duration::hours(i64::from(i)),
            GeoPoint {
                lat: base.lat + lat_offset,
                ..base
            },
            Some(format!("synthetic report {i}")),
        ));
    }

    let stats = pipeline.process_batch(samples).await;
    println!("{stats}");

    println!("=== Triage Queue ===");
    for (rank, (incident, priority)) in pipeline.triage_queue(Utc::now()).await?.iter().enumerate()
    {
        println!(
            "{:>2}. {:<18} reports={:<3} severity={:.2} priority={:.2}",
            rank + 1,
            incident.issue_type.to_string(),
            incident.report_count,
            incident.aggregated_severity,
            priority.value,
        );
    }

    Ok(())
}
