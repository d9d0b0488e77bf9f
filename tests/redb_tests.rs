use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use seriesdb::{LabelExpr, Labels, MergePolicy, MockClock, Point, Query, StoreConfig, Tsdb};
use tempfile::TempDir;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn host(name: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert("host".to_string(), name.to_string());
    labels
}

fn mem(host_name: &str, secs: i64, used: f64) -> Point {
    Point::new("mem", at(secs))
        .label("host", host_name)
        .field("used", used)
        .field("free", 100.0 - used)
}

#[test]
fn test_points_and_series_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("series.redb");

    {
        let db = Tsdb::builder().redb(&path).open().unwrap();
        assert!(matches!(db.options().store, StoreConfig::Redb { .. }));
        db.insert(&[mem("a", 10, 20.0), mem("a", 20, 30.0), mem("b", 15, 50.0)])
            .unwrap();
    }

    let db = Tsdb::builder().redb(&path).open().unwrap();
    db.insert(&[mem("a", 30, 40.0)]).unwrap();

    assert_eq!(db.series("mem", &host("a")).unwrap().unwrap().counter, 3);
    assert_eq!(db.list_series("mem").unwrap().len(), 2);

    let query = Query::new("mem")
        .range(at(1), at(60))
        .label_filter(LabelExpr::equal("host", "a"));
    let points = db.query_points(&query).unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[2].fields["free"], 60.0);

    let windows = db
        .query_data_points(&query.resample(Duration::from_secs(60), MergePolicy::Max))
        .unwrap();
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].fields["used"], 40.0);
}

#[test]
fn test_reverse_scan_on_disk() {
    let dir = TempDir::new().unwrap();
    let db = Tsdb::builder()
        .redb(dir.path().join("reverse.redb"))
        .open()
        .unwrap();

    let points: Vec<Point> = (1..=10).map(|s| mem("a", s, s as f64)).collect();
    db.insert(&points).unwrap();

    let newest = db
        .query_points(&Query::new("mem").range(at(3), at(8)).reverse().limit(2))
        .unwrap();
    let times: Vec<i64> = newest.iter().map(|p| p.time.timestamp()).collect();
    assert_eq!(times, vec![8, 7]);
}

#[test]
fn test_retention_on_disk() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(MockClock::new());
    let db = Tsdb::builder()
        .redb(dir.path().join("ttl.redb"))
        .retention(Duration::from_secs(30))
        .clock(clock.clone())
        .open()
        .unwrap();

    db.insert(&[mem("a", 1, 10.0)]).unwrap();
    clock.advance(Duration::from_secs(20));
    db.insert(&[mem("a", 2, 10.0)]).unwrap();

    let query = Query::new("mem").range(at(1), at(10));
    assert_eq!(db.query_points(&query).unwrap().len(), 2);

    clock.advance(Duration::from_secs(15));
    let remaining = db.query_points(&query).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].time, at(2));

    assert_eq!(db.purge_expired().unwrap(), 1);
    assert_eq!(db.series("mem", &host("a")).unwrap().unwrap().counter, 2);
}
