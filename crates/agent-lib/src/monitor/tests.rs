//! Tests for the monitor
//!
//! The resctrl tests use a mock resctrl tree in a temp directory.

#[cfg(test)]
mod monitor_tests {
    use crate::config::{BYTES_PER_GB, BYTES_PER_MB};
    use crate::monitor::{
        ccd_utilization, node_totals, sum_mb, CounterSample, CounterSource, MbQosGroup, Monitor,
        MonitorConfig, ResctrlCounterSource,
    };
    use crate::task::QosGroup;
    use crate::topology::Topology;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::{BTreeMap, HashMap};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::fs;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_749_596_247 + secs, 0).unwrap()
    }

    fn sample(secs: i64, counters: &[(QosGroup, &[(u32, u64)])]) -> CounterSample {
        CounterSample {
            timestamp: at(secs),
            counters: counters
                .iter()
                .map(|(group, ccds)| (*group, ccds.iter().copied().collect::<BTreeMap<_, _>>()))
                .collect::<HashMap<_, _>>(),
        }
    }

    const MB: u64 = BYTES_PER_MB;

    #[test]
    fn test_first_sample_reports_no_data() {
        let monitor = Monitor::new(MonitorConfig::default());
        let snapshot = monitor.update(&sample(0, &[(QosGroup::System, &[(1, 1_000 * MB)])]));

        assert_eq!(snapshot.timestamp, Some(at(0)));
        assert!(snapshot.groups.is_empty());
        assert_eq!(monitor.tracked_counters(), 1);
    }

    #[test]
    fn test_rates_in_mbps_per_group_and_ccd() {
        let monitor = Monitor::new(MonitorConfig::default());
        monitor.update(&sample(
            0,
            &[
                (QosGroup::System, &[(1, 1_000 * MB)]),
                (QosGroup::Shared(30), &[(2, 1_000 * MB), (3, 2_000 * MB)]),
            ],
        ));
        let snapshot = monitor.update(&sample(
            10,
            &[
                (QosGroup::System, &[(1, 2_000 * MB)]),
                (QosGroup::Shared(30), &[(2, 3_000 * MB), (3, 2_500 * MB)]),
            ],
        ));

        assert_eq!(snapshot.groups[&QosGroup::System].ccd_mb, BTreeMap::from([(1, 100)]));
        assert_eq!(
            snapshot.groups[&QosGroup::Shared(30)].ccd_mb,
            BTreeMap::from([(2, 200), (3, 50)])
        );
        assert_eq!(sum_mb(&snapshot.groups), 350);
        assert_eq!(monitor.latest(), snapshot);
    }

    #[test]
    fn test_ccd_set_matches_measurements() {
        let monitor = Monitor::new(MonitorConfig::default());
        monitor.update(&sample(0, &[(QosGroup::Shared(50), &[(4, 10 * MB), (5, 10 * MB)])]));
        // CCD 5 missing from the second sample
        let snapshot = monitor.update(&sample(10, &[(QosGroup::Shared(50), &[(4, 20 * MB)])]));

        let group = &snapshot.groups[&QosGroup::Shared(50)];
        assert_eq!(group.ccds().collect::<Vec<_>>(), vec![4]);
        assert_eq!(
            group.ccds().collect::<Vec<_>>(),
            group.ccd_mb.keys().copied().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_missing_ccd_resumes_over_longer_interval() {
        let monitor = Monitor::new(MonitorConfig::default());
        monitor.update(&sample(0, &[(QosGroup::System, &[(1, 100 * MB)])]));
        monitor.update(&sample(10, &[]));
        let snapshot = monitor.update(&sample(20, &[(QosGroup::System, &[(1, 300 * MB)])]));

        assert_eq!(snapshot.groups[&QosGroup::System].ccd_mb[&1], 10);
    }

    #[test]
    fn test_duplicate_timestamp_keeps_previous_rate() {
        let monitor = Monitor::new(MonitorConfig::default());
        monitor.update(&sample(0, &[(QosGroup::System, &[(1, 100 * MB)])]));
        monitor.update(&sample(10, &[(QosGroup::System, &[(1, 200 * MB)])]));
        let snapshot = monitor.update(&sample(10, &[(QosGroup::System, &[(1, 900 * MB)])]));

        assert_eq!(snapshot.groups[&QosGroup::System].ccd_mb[&1], 10);
    }

    #[test]
    fn test_counter_reset_reports_zero_then_recovers() {
        let monitor = Monitor::new(MonitorConfig::default());
        monitor.update(&sample(0, &[(QosGroup::System, &[(1, 500 * MB)])]));
        let snapshot = monitor.update(&sample(10, &[(QosGroup::System, &[(1, 100 * MB)])]));
        assert_eq!(snapshot.groups[&QosGroup::System].ccd_mb[&1], 0);

        let snapshot = monitor.update(&sample(20, &[(QosGroup::System, &[(1, 200 * MB)])]));
        assert_eq!(snapshot.groups[&QosGroup::System].ccd_mb[&1], 10);
    }

    #[test]
    fn test_overflow_reports_zero_and_rebaselines() {
        let monitor = Monitor::new(MonitorConfig::default());
        monitor.update(&sample(0, &[(QosGroup::System, &[(1, 100)])]));
        let snapshot =
            monitor.update(&sample(10, &[(QosGroup::System, &[(1, 4_001 * BYTES_PER_GB)])]));
        assert_eq!(snapshot.groups[&QosGroup::System].ccd_mb[&1], 0);

        let snapshot = monitor.update(&sample(
            20,
            &[(QosGroup::System, &[(1, 4_001 * BYTES_PER_GB + 100 * MB)])],
        ));
        assert_eq!(snapshot.groups[&QosGroup::System].ccd_mb[&1], 10);
    }

    #[test]
    fn test_stale_counters_are_dropped() {
        let monitor = Monitor::new(MonitorConfig {
            stale_after: Duration::from_secs(30),
            ..Default::default()
        });
        monitor.update(&sample(0, &[(QosGroup::Dedicated, &[(1, 100 * MB)])]));
        monitor.update(&sample(10, &[(QosGroup::System, &[(2, 100 * MB)])]));
        assert_eq!(monitor.tracked_counters(), 2);

        monitor.update(&sample(60, &[(QosGroup::System, &[(2, 200 * MB)])]));
        assert_eq!(monitor.tracked_counters(), 1);
    }

    #[test]
    fn test_node_totals_and_utilization() {
        let topology = Topology::builder()
            .add_ccd(1, 0, [0])
            .add_ccd(2, 1, [1])
            .assign_node(0, 0)
            .assign_node(1, 0)
            .build()
            .unwrap();
        let groups = BTreeMap::from([
            (QosGroup::System, MbQosGroup::new(BTreeMap::from([(1, 1_000)]))),
            (
                QosGroup::Shared(30),
                MbQosGroup::new(BTreeMap::from([(1, 500), (2, 2_000), (99, 7)])),
            ),
        ]);

        let totals = node_totals(&groups, &topology);
        assert_eq!(totals, BTreeMap::from([(0, 1_500), (1, 2_000)]));

        let utilization = ccd_utilization(&groups, "Lake");
        let expected = (1_500 * MB) as f64 / (98 * BYTES_PER_GB) as f64;
        assert!((utilization[&1] - expected).abs() < 1e-9);
    }

    async fn write_counter(root: &Path, group: &str, ccd: &str, content: &str) {
        let dir = root.join(group).join("mon_data").join(ccd);
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join("mbm_total_bytes"), content).await.unwrap();
    }

    #[tokio::test]
    async fn test_resctrl_source_reads_groups() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        write_counter(root, "system", "mon_L3_00", "1000\n").await;
        write_counter(root, "shared-30", "mon_L3_02", "2000\n").await;
        write_counter(root, "shared-30", "mon_L3_03", "Unavailable\n").await;
        write_counter(root, "dedicated", "mon_L3_04", "4000\n").await;
        // Root group data and non-qos folders are ignored
        write_counter(root, "", "mon_L3_00", "99\n").await;
        fs::create_dir_all(root.join("info")).await.unwrap();

        let source = ResctrlCounterSource::new(root);
        assert!(source.is_available().await);

        let sample = source.sample().await.unwrap();
        assert_eq!(sample.counters.len(), 3);
        assert_eq!(sample.counters[&QosGroup::System], BTreeMap::from([(0, 1000)]));
        assert_eq!(sample.counters[&QosGroup::Shared(30)], BTreeMap::from([(2, 2000)]));
        assert_eq!(sample.counters[&QosGroup::Dedicated], BTreeMap::from([(4, 4000)]));
    }

    #[tokio::test]
    async fn test_resctrl_source_skips_plain_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        write_counter(root, "dedicated", "mon_L3_01", "500\n").await;
        fs::write(root.join("system"), "not a group").await.unwrap();
        fs::write(root.join("tasks"), "1\n").await.unwrap();

        let sample = ResctrlCounterSource::new(root).sample().await.unwrap();
        assert_eq!(sample.counters.len(), 1);
        assert_eq!(sample.counters[&QosGroup::Dedicated], BTreeMap::from([(1, 500)]));
    }

    #[tokio::test]
    async fn test_resctrl_source_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let source = ResctrlCounterSource::new(temp_dir.path().join("absent"));

        assert!(!source.is_available().await);
        assert!(source.sample().await.is_err());
    }
}
