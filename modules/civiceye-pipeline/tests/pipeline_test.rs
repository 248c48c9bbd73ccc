//! End-to-end pipeline tests with a stub classifier: media in, ranked
//! reports out, failure quarantine semantics.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use civiceye_common::{
    CivicEyeError, GeoPoint, IssueType, MediaKind, MediaSample, PipelineConfig, Urgency,
};
use civiceye_pipeline::{
    Frame, FrameClassifier, FrameSignal, IncidentStore, MemoryIncidentStore, Pipeline,
    UniformZoneRisk, VecSink, ZoneRisk,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

// ---------------------------------------------------------------------------
// Stub classifiers
// ---------------------------------------------------------------------------

/// Always returns the same signal.
struct FixedClassifier(FrameSignal);

#[async_trait]
impl FrameClassifier for FixedClassifier {
    async fn classify(&self, _frame: &Frame) -> anyhow::Result<FrameSignal> {
        Ok(self.0)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Always fails with a transport error.
struct DownClassifier;

#[async_trait]
impl FrameClassifier for DownClassifier {
    async fn classify(&self, _frame: &Frame) -> anyhow::Result<FrameSignal> {
        anyhow::bail!("connection refused")
    }

    fn name(&self) -> &str {
        "down"
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn png_bytes(level: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(64, 64, Rgb([level, level, level]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn jpeg_bytes(level: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(64, 64, Rgb([level, level, level]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

fn point(lat: f64, lng: f64) -> GeoPoint {
    GeoPoint {
        lat,
        lng,
        accuracy_radius_m: 10.0,
    }
}

fn north_of(p: &GeoPoint, meters: f64) -> GeoPoint {
    GeoPoint {
        lat: p.lat + meters / 111_320.0,
        lng: p.lng,
        accuracy_radius_m: p.accuracy_radius_m,
    }
}

fn image_sample(location: GeoPoint, description: Option<&str>) -> MediaSample {
    MediaSample::new(
        png_bytes(120),
        MediaKind::Image,
        Utc::now(),
        location,
        description.map(str::to_string),
    )
}

fn signal(issue_type: IssueType, confidence: f64, raw: f64, area: f64) -> FrameSignal {
    FrameSignal {
        issue_type,
        confidence,
        raw_severity_signal: raw,
        area_affected_ratio: area,
    }
}

fn fast_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.classifier_attempts = 1;
    cfg.classifier_timeout = std::time::Duration::from_secs(2);
    cfg
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn image_sample_flows_end_to_end() {
    let store = Arc::new(MemoryIncidentStore::new());
    let pipeline = Pipeline::new(
        FixedClassifier(signal(IssueType::Pothole, 0.9, 0.7, 0.4)),
        UniformZoneRisk(ZoneRisk::High),
        Arc::clone(&store),
        VecSink::new(),
        &fast_config(),
    );

    let sample = image_sample(point(44.9778, -93.265), Some("deep pothole"));
    let report = pipeline.process(sample.clone()).await.unwrap();

    assert_eq!(report.sample_id, sample.id);
    assert_eq!(report.detection.issue_type, IssueType::Pothole);
    // 0.6*0.7 + 0.25*0.4 + 0.15*1.0 = 0.67
    assert!((report.severity - 0.67).abs() < 1e-9);
    assert_eq!(report.urgency, Urgency::High);
    assert_eq!(report.description.as_deref(), Some("deep pothole"));

    let incidents = store.active_incidents().await.unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].id, report.incident_id);
}

#[tokio::test]
async fn video_sample_flows_end_to_end() {
    let store = Arc::new(MemoryIncidentStore::new());
    let mut cfg = fast_config();
    cfg.frame_stride = 1;
    let pipeline = Pipeline::new(
        FixedClassifier(signal(IssueType::GarbageOverflow, 0.8, 0.5, 0.3)),
        UniformZoneRisk(ZoneRisk::Medium),
        Arc::clone(&store),
        VecSink::new(),
        &cfg,
    );

    let mut payload = Vec::new();
    for level in [10u8, 80, 160, 240] {
        payload.extend_from_slice(&jpeg_bytes(level));
    }
    let sample = MediaSample::new(
        payload,
        MediaKind::Video,
        Utc::now(),
        point(44.9778, -93.265),
        None,
    );

    let report = pipeline.process(sample).await.unwrap();
    assert_eq!(report.detection.issue_type, IssueType::GarbageOverflow);
    assert_eq!(store.active_incidents().await.unwrap().len(), 1);
}

#[tokio::test]
async fn emitted_reports_are_immutable_under_later_updates() {
    let store = Arc::new(MemoryIncidentStore::new());
    let pipeline = Pipeline::new(
        FixedClassifier(signal(IssueType::Pothole, 0.9, 0.7, 0.4)),
        UniformZoneRisk(ZoneRisk::Low),
        Arc::clone(&store),
        VecSink::new(),
        &fast_config(),
    );

    let loc = point(44.9778, -93.265);
    let first = pipeline.process(image_sample(loc, None)).await.unwrap();
    let second = pipeline.process(image_sample(loc, None)).await.unwrap();

    // Same incident, but the first report's record is untouched.
    assert_eq!(first.incident_id, second.incident_id);
    let incident = store.get(first.incident_id).await.unwrap().unwrap();
    assert_eq!(incident.report_count, 2);
    assert_ne!(first.id, second.id);
}

// ---------------------------------------------------------------------------
// Failure semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_model_output_quarantines_without_store_mutation() {
    let store = Arc::new(MemoryIncidentStore::new());
    let sink = VecSink::new();
    let pipeline = Pipeline::new(
        FixedClassifier(signal(IssueType::Pothole, 1.2, 0.5, 0.1)),
        UniformZoneRisk(ZoneRisk::Low),
        Arc::clone(&store),
        sink,
        &fast_config(),
    );

    let err = pipeline
        .process(image_sample(point(44.9778, -93.265), None))
        .await
        .unwrap_err();
    assert!(matches!(err, CivicEyeError::InvalidModelOutput(_)));
    assert!(!err.is_retryable());
    assert!(
        store.active_incidents().await.unwrap().is_empty(),
        "no incident may be created or updated for a quarantined unit"
    );
}

#[tokio::test]
async fn classifier_outage_is_retryable_after_exhausted_attempts() {
    let store = Arc::new(MemoryIncidentStore::new());
    let pipeline = Pipeline::new(
        DownClassifier,
        UniformZoneRisk(ZoneRisk::Low),
        Arc::clone(&store),
        VecSink::new(),
        &fast_config(),
    );

    let err = pipeline
        .process(image_sample(point(44.9778, -93.265), None))
        .await
        .unwrap_err();
    assert!(matches!(err, CivicEyeError::ClassifierUnavailable(_)));
    assert!(err.is_retryable());
    assert!(store.active_incidents().await.unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_deadline_fails_the_unit_between_stages() {
    let store = Arc::new(MemoryIncidentStore::new());
    let mut cfg = fast_config();
    cfg.unit_deadline = std::time::Duration::ZERO;
    let pipeline = Pipeline::new(
        FixedClassifier(signal(IssueType::Pothole, 0.9, 0.7, 0.4)),
        UniformZoneRisk(ZoneRisk::Low),
        Arc::clone(&store),
        VecSink::new(),
        &cfg,
    );

    let err = pipeline
        .process(image_sample(point(44.9778, -93.265), None))
        .await
        .unwrap_err();
    assert!(matches!(err, CivicEyeError::DeadlineExceeded(_)));
    assert!(err.is_retryable());
    assert!(store.active_incidents().await.unwrap().is_empty());
}

#[tokio::test]
async fn one_failing_unit_never_blocks_the_batch() {
    let store = Arc::new(MemoryIncidentStore::new());
    let pipeline = Pipeline::new(
        FixedClassifier(signal(IssueType::WaterLeak, 0.85, 0.6, 0.2)),
        UniformZoneRisk(ZoneRisk::Medium),
        Arc::clone(&store),
        VecSink::new(),
        &fast_config(),
    );

    let loc = point(44.9778, -93.265);
    let samples = vec![
        image_sample(loc, None),
        // Undecodable payload: rejected as EmptyMedia, quarantined.
        MediaSample::new(vec![0xDE, 0xAD], MediaKind::Image, Utc::now(), loc, None),
        image_sample(loc, None),
    ];

    let stats = pipeline.process_batch(samples).await;
    assert_eq!(stats.reports_emitted, 2);
    assert_eq!(stats.quarantined, 1);
    assert_eq!(stats.failed_retryable, 0);
    assert_eq!(stats.incidents_created, 1);
    assert_eq!(stats.reports_merged, 1);
}

// ---------------------------------------------------------------------------
// Triage scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_pothole_outranks_single_broken_light_of_equal_age() {
    let store = Arc::new(MemoryIncidentStore::new());

    // Pothole reported 5 times within 40 meters over 3 days, high-risk
    // zone, confidence 0.9, raw severity 0.7.
    let pothole_pipeline = Pipeline::new(
        FixedClassifier(signal(IssueType::Pothole, 0.9, 0.7, 1.0)),
        UniformZoneRisk(ZoneRisk::High),
        Arc::clone(&store),
        VecSink::new(),
        &fast_config(),
    );
    let base = point(44.9778, -93.265);
    for i in 0..5 {
        let sample = MediaSample::new(
            png_bytes(120),
            MediaKind::Image,
            Utc::now() - Duration::days(3) + Duration::hours(i * 12),
            north_of(&base, (i as f64) * 8.0), // spread stays under 40m
            None,
        );
        pothole_pipeline.process(sample).await.unwrap();
    }

    // One broken-light report of equal age, severity 0.3.
    let light_pipeline = Pipeline::new(
        FixedClassifier(signal(IssueType::BrokenLight, 0.9, 0.5, 0.0)),
        UniformZoneRisk(ZoneRisk::Low),
        Arc::clone(&store),
        VecSink::new(),
        &fast_config(),
    );
    let light_sample = MediaSample::new(
        png_bytes(120),
        MediaKind::Image,
        Utc::now() - Duration::days(3),
        point(44.99, -93.28),
        None,
    );
    let light_report = light_pipeline.process(light_sample).await.unwrap();
    assert!((light_report.severity - 0.3).abs() < 1e-9);

    let incidents = store.active_incidents().await.unwrap();
    assert_eq!(incidents.len(), 2, "five pothole reports collapse to one incident");

    let pothole = incidents
        .iter()
        .find(|i| i.issue_type == IssueType::Pothole)
        .unwrap();
    assert_eq!(pothole.report_count, 5);
    assert!(
        (0.75..=1.0).contains(&pothole.aggregated_severity),
        "aggregated severity {} outside expected band",
        pothole.aggregated_severity
    );

    let queue = pothole_pipeline.triage_queue(Utc::now()).await.unwrap();
    assert_eq!(queue[0].0.issue_type, IssueType::Pothole);
    assert_eq!(queue[1].0.issue_type, IssueType::BrokenLight);
    assert!(queue[0].1.value > queue[1].1.value);
}
