//! Integration tests for startup phase tracking through the monitor

mod support;

use perfguard_core::{
    BottleneckReason, BottleneckSeverity, MonitorConfig, PhaseOptions, StartupConfig,
    StartupTargets,
};
use serde_json::json;
use support::{mock_monitor, Event};

/// Validates the bottleneck union on phases of [10, 10, 10, 50] ms.
///
/// # Test Steps
/// 1. Run four sequential phases through the monitor
/// 2. Generate the report
/// 3. Verify the 50ms phase is listed twice (mean-ratio and absolute rules)
/// 4. Verify the score deducts 20 per High bottleneck
#[test]
fn test_bottleneck_detection_report() {
    let (monitor, clock, _listener) = mock_monitor(MonitorConfig::default());

    for (name, ms) in [("load_config", 10), ("open_db", 10), ("warm_cache", 10), ("sync", 50)] {
        assert!(monitor.start_phase(name, PhaseOptions::default()));
        clock.advance_millis(ms);
        assert!(monitor.end_phase(name).is_some());
    }

    let report = monitor.generate_report();
    assert_eq!(report.statistics.mean_ms, 20.0);
    assert_eq!(report.bottlenecks.len(), 2);

    let reasons: Vec<_> = report.bottlenecks.iter().map(|b| (b.phase.as_str(), b.reason)).collect();
    assert_eq!(
        reasons,
        vec![
            ("sync", BottleneckReason::RelativeToMean),
            ("sync", BottleneckReason::AbsoluteThreshold),
        ]
    );
    assert!(report.bottlenecks.iter().all(|b| b.severity == BottleneckSeverity::High));
    assert_eq!(report.performance_score, 60.0);
    assert_eq!(report.statistics.slowest.as_ref().map(|t| t.name.as_str()), Some("sync"));
}

/// Validates a realistic nested startup against tight targets.
///
/// # Test Steps
/// 1. Configure 40ms total / 20ms framework / 10ms render targets
/// 2. Run framework_init (with two children) then initial_render
/// 3. Leave a trailing phase open and complete startup
/// 4. Verify the tree, the target analysis and the event order
#[test]
fn test_nested_startup_against_targets() {
    let config = MonitorConfig {
        startup: StartupConfig {
            targets: StartupTargets {
                total_startup_time: 40.0,
                framework_init: 20.0,
                initial_render: 10.0,
            },
            ..StartupConfig::default()
        },
        ..MonitorConfig::default()
    };
    let (monitor, clock, listener) = mock_monitor(config);

    monitor.start_phase("framework_init", PhaseOptions::default());
    for child in ["plugins", "routes"] {
        monitor.start_phase(child, PhaseOptions::default());
        clock.advance_millis(12);
        monitor.end_phase(child);
    }
    monitor.end_phase("framework_init");

    monitor.start_phase("initial_render", PhaseOptions::default());
    clock.advance_millis(8);
    monitor.end_phase("initial_render");

    monitor.start_phase("background_sync", PhaseOptions::default());
    clock.advance_millis(5);

    let profile = monitor.complete_startup();
    assert_eq!(profile.total_duration_ms, 37.0);
    assert_eq!(profile.phases[0].sub_phases, vec!["plugins", "routes"]);
    assert_eq!(profile.phases[1].parent.as_deref(), Some("framework_init"));

    let targets = &profile.targets;
    assert_eq!(targets.framework_init.actual_ms, Some(24.0));
    assert!(!targets.framework_init.met);
    assert!(targets.initial_render.met);
    assert!(targets.total_startup.met);

    assert_eq!(
        listener.events().last(),
        Some(&Event::StartupComplete(5)),
        "startup completion is the final event"
    );
    assert!(listener.events().contains(&Event::PhaseEnded("background_sync".into())));

    let report = monitor.generate_report();
    assert_eq!(report.profile, profile);
    assert!(report.recommendations.iter().any(|r| r.starts_with("Framework initialization")));
}

/// Validates the depth limit is enforced through the facade.
#[test]
fn test_depth_limit() {
    let config = MonitorConfig {
        startup: StartupConfig { max_phase_depth: 3, ..StartupConfig::default() },
        ..MonitorConfig::default()
    };
    let (monitor, _clock, _listener) = mock_monitor(config);

    for depth in 0..3 {
        assert!(monitor.start_phase(format!("level{depth}"), PhaseOptions::default()));
    }
    assert!(!monitor.start_phase("level3", PhaseOptions::default()));
    assert_eq!(monitor.complete_startup().phases.len(), 3);
}

/// Validates phase metadata and the serialized report shape.
#[test]
fn test_report_serializes() -> anyhow::Result<()> {
    let (monitor, clock, _listener) = mock_monitor(MonitorConfig::default());
    let metadata = [("module".to_string(), json!("auth"))].into_iter().collect();

    monitor.start_phase("auth_init", PhaseOptions::with_metadata(metadata));
    clock.advance_millis(3);
    monitor.end_phase("auth_init");

    let value = serde_json::to_value(monitor.generate_report())?;
    assert_eq!(value["profile"]["phases"][0]["metadata"]["module"], json!("auth"));
    assert_eq!(value["performance_score"], json!(100.0));
    assert_eq!(value["profile"]["targets"]["framework_init"]["met"], json!(true));
    Ok(())
}
